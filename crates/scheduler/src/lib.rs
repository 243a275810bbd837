//! lazyimg scheduler library
//!
//! Drives image entries through their lifecycle from item visibility.
//!
//! A [`VisibilityScheduler`] polls a host [`ItemTree`] for geometry, starts
//! decodes for entries that became visible, and releases textures of
//! entries that stayed hidden longer than the unload delay. Decodes run on a
//! [`DecodePool`] or inline during [`VisibilityScheduler::tick`].
//!
//! # Example
//!
//! ```
//! use lazyimg_scheduler::{ItemGeometry, Rect, VisibilityPolicy};
//!
//! let viewport = Rect::new(0.0, 0.0, 800.0, 600.0);
//! let below = ItemGeometry::new(Rect::new(0.0, 650.0, 100.0, 100.0), viewport);
//!
//! let strict = VisibilityPolicy { margin: 0.0, require_full: false };
//! let prefetch = VisibilityPolicy { margin: 100.0, require_full: false };
//!
//! assert!(!strict.is_visible(&below));
//! assert!(prefetch.is_visible(&below));
//! ```

mod cancel;
mod clock;
mod decode;
mod geometry;
mod poll;
mod scheduler;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use cancel::{CancellationRegistry, CancellationToken};
pub use clock::{Clock, ManualClock, SystemClock};
pub use decode::{DecodeExecutor, DecodeJob, DecodePool, DecodeQueue};
pub use geometry::{GeometryProbe, ItemGeometry, ItemTree, Rect, VisibilityPolicy};
pub use poll::PollLoop;
pub use scheduler::{DecodeOutcome, EntrySnapshot, SchedulerStats, TickReport, VisibilityScheduler};
