//! lazyimg cache library
//!
//! Data model for the visibility-driven image cache: tracked entries and
//! their lifecycle, render-size computation, the decoder boundary, and the
//! facade over the host texture registry.

pub mod config;
pub mod entry;
pub mod error;
pub mod resize;
pub mod source;
pub mod texture;

pub use config::ControllerConfig;
pub use entry::{
    EntryId, EntryState, EntryStatus, ForcedUnload, HandlerRef, ImageEntry, ItemId, JobId,
    Transition,
};
pub use error::{AllocationError, ConfigError, ImageError};
pub use resize::{compute_size, resample, SizeMode, SizeRequest};
pub use source::{Decoder, ImageCrateDecoder, ImageSource, SourceKey};
/// Decoded RGBA8 pixels, as produced by a [`Decoder`].
pub use image::RgbaImage;
pub use texture::{TextureHandle, TextureRegistry, TextureRegistryAdapter, TextureStats};
