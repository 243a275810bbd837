//! Image sources and the decoder boundary.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbaImage;

use crate::error::ImageError;

/// Where an entry's pixels come from. Immutable once registered.
#[derive(Clone)]
pub enum ImageSource {
    /// Image file on disk, decoded on every load.
    Path(PathBuf),
    /// Encoded file contents (PNG, JPEG, ...) held in memory.
    Encoded(Arc<[u8]>),
    /// Already-decoded RGBA pixels shared with the caller.
    Pixels(Arc<RgbaImage>),
}

impl ImageSource {
    /// Short human-readable description used in logs and errors.
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Encoded(bytes) => format!("<{} encoded bytes>", bytes.len()),
            Self::Pixels(pixels) => {
                format!("<{}x{} pixel buffer>", pixels.width(), pixels.height())
            }
        }
    }
}

impl ImageSource {
    /// Identity shared by registrations of the same file or the same
    /// encoded bytes. Pixel buffers have none: their size is known up front.
    pub fn key(&self) -> Option<SourceKey> {
        match self {
            Self::Path(path) => Some(SourceKey::Path(path.clone())),
            Self::Encoded(bytes) => Some(SourceKey::Encoded(bytes.clone())),
            Self::Pixels(_) => None,
        }
    }

    /// Natural size available without decoding.
    pub fn known_size(&self) -> Option<(u32, u32)> {
        match self {
            Self::Pixels(pixels) => Some(pixels.dimensions()),
            Self::Path(_) | Self::Encoded(_) => None,
        }
    }
}

/// Key under which facts about a source are shared between entries.
///
/// Encoded sources compare by content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceKey {
    Path(PathBuf),
    Encoded(Arc<[u8]>),
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ImageSource").field(&self.describe()).finish()
    }
}

impl From<PathBuf> for ImageSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for ImageSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<&str> for ImageSource {
    fn from(value: &str) -> Self {
        Self::Path(PathBuf::from(value))
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Encoded(value.into())
    }
}

impl From<RgbaImage> for ImageSource {
    fn from(value: RgbaImage) -> Self {
        Self::Pixels(Arc::new(value))
    }
}

impl From<Arc<RgbaImage>> for ImageSource {
    fn from(value: Arc<RgbaImage>) -> Self {
        Self::Pixels(value)
    }
}

/// Turns a source into RGBA pixels at its natural size.
///
/// Called from decode workers, never while the entry set is locked.
pub trait Decoder: Send + Sync {
    fn decode(&self, source: &ImageSource) -> Result<RgbaImage, ImageError>;
}

/// [`Decoder`] backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateDecoder;

impl Decoder for ImageCrateDecoder {
    fn decode(&self, source: &ImageSource) -> Result<RgbaImage, ImageError> {
        let decoded = match source {
            ImageSource::Path(path) => image::open(path),
            ImageSource::Encoded(bytes) => image::load_from_memory(bytes),
            ImageSource::Pixels(pixels) => return Ok(RgbaImage::clone(pixels)),
        };

        decoded
            .map(|image| image.to_rgba8())
            .map_err(|err| ImageError::Decode {
                source_desc: source.describe(),
                reason: err.to_string(),
            })
    }
}
