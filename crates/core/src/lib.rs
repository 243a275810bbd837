//! lazyimg
//!
//! Visibility-driven image cache. Images are registered against items of a
//! host GUI tree; the controller keeps a texture resident only while the
//! item is visible, plus a grace period after it scrolls away so that fast
//! scrolling back and forth does not thrash the texture registry.
//!
//! The host supplies two collaborators:
//!
//! - a [`TextureRegistry`] that owns texture memory
//! - an [`ItemTree`] that reports item geometry and accepts event handlers
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use lazyimg::{
//!     AllocationError, ControllerConfig, HandlerRef, ImageController, ItemGeometry, ItemId,
//!     ItemTree, Rect, RegisterOptions, TextureHandle, TextureRegistry,
//! };
//!
//! struct Registry;
//!
//! impl TextureRegistry for Registry {
//!     fn allocate(
//!         &self,
//!         _pixels: &lazyimg::RgbaImage,
//!         _width: u32,
//!         _height: u32,
//!     ) -> Result<TextureHandle, AllocationError> {
//!         Ok(TextureHandle::from_raw(1))
//!     }
//!
//!     fn release(&self, _handle: TextureHandle) {}
//! }
//!
//! struct Page;
//!
//! impl ItemTree for Page {
//!     fn query(&self, _item: ItemId) -> Option<ItemGeometry> {
//!         let viewport = Rect::new(0.0, 0.0, 800.0, 600.0);
//!         Some(ItemGeometry::new(Rect::new(0.0, 0.0, 320.0, 240.0), viewport))
//!     }
//!
//!     fn bind_handler(&self, _item: ItemId, _handler: &HandlerRef) -> bool {
//!         true
//!     }
//! }
//!
//! let config = ControllerConfig::manual().with_unload_delay(Duration::from_secs(5));
//! let controller = ImageController::new(config, Arc::new(Registry), Arc::new(Page)).unwrap();
//!
//! let pixels = lazyimg::RgbaImage::new(640, 480);
//! let entry = controller
//!     .register(pixels, RegisterOptions::new(1).width(320))
//!     .unwrap();
//!
//! controller.tick();
//! let snapshot = controller.snapshot(entry).unwrap();
//! assert!(snapshot.status.is_loaded());
//! assert_eq!(snapshot.rendered_size, Some((320, 240)));
//! ```

pub mod controller;

pub use controller::{ControllerBuilder, EntryHandle, ImageController, RegisterOptions};

pub use lazyimg_cache::{
    compute_size, AllocationError, ConfigError, ControllerConfig, Decoder, EntryId, EntryStatus,
    HandlerRef, ImageCrateDecoder, ImageError, ImageSource, ItemId, RgbaImage, SizeMode,
    SizeRequest, TextureHandle, TextureRegistry, TextureStats,
};
pub use lazyimg_scheduler::{
    Clock, DecodeOutcome, EntrySnapshot, ItemGeometry, ItemTree, ManualClock, Rect,
    SchedulerStats, SystemClock, TickReport, VisibilityPolicy, VisibilityScheduler,
};
