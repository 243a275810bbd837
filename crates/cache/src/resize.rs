//! Render-size computation for decoded images.
//!
//! The natural size of an image is cached on its entry after the first
//! decode, so every reload resolves the same request to the same size.

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::error::ImageError;

/// How a single scalar `size` request is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeMode {
    /// Scale so the longer natural axis equals `size`, keeping the aspect ratio.
    #[default]
    LongerAxis,
    /// Use `size` for both axes.
    BothAxes,
}

impl SizeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LongerAxis => "longer_axis",
            Self::BothAxes => "both_axes",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "longer_axis" => Some(Self::LongerAxis),
            "both_axes" => Some(Self::BothAxes),
            _ => None,
        }
    }
}

/// Requested render dimensions. `None` means "derive it".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeRequest {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub size: Option<u32>,
}

impl SizeRequest {
    pub fn with_width(mut self, width: Option<u32>) -> Self {
        self.width = width;
        self
    }

    pub fn with_height(mut self, height: Option<u32>) -> Self {
        self.height = height;
        self
    }

    pub fn with_size(mut self, size: Option<u32>) -> Self {
        self.size = size;
        self
    }

    /// Reject explicit zero values before any natural size is known.
    pub fn validate(&self) -> Result<(), ImageError> {
        for (axis, value) in [
            ("width", self.width),
            ("height", self.height),
            ("size", self.size),
        ] {
            if value == Some(0) {
                return Err(ImageError::Configuration(format!(
                    "{axis} must be positive"
                )));
            }
        }
        Ok(())
    }
}

/// Resolve `request` against the natural size of the image.
///
/// # Errors
/// Returns [`ImageError::Configuration`] if any input is zero or the result
/// would have a zero-length axis.
pub fn compute_size(
    natural: (u32, u32),
    request: &SizeRequest,
    mode: SizeMode,
) -> Result<(u32, u32), ImageError> {
    let (natural_w, natural_h) = natural;
    if natural_w == 0 || natural_h == 0 {
        return Err(ImageError::Configuration(format!(
            "natural size {natural_w}x{natural_h} has a zero axis"
        )));
    }
    request.validate()?;

    let (w, h) = if let Some(size) = request.size {
        match mode {
            SizeMode::BothAxes => (size, size),
            SizeMode::LongerAxis if natural_w >= natural_h => {
                (size, scale(size, natural_h, natural_w))
            }
            SizeMode::LongerAxis => (scale(size, natural_w, natural_h), size),
        }
    } else {
        match (request.width, request.height) {
            (None, None) => natural,
            (Some(w), None) => (w, scale(w, natural_h, natural_w)),
            (None, Some(h)) => (scale(h, natural_w, natural_h), h),
            (Some(w), Some(h)) => (w, h),
        }
    };

    if w == 0 || h == 0 {
        return Err(ImageError::Configuration(format!(
            "request {request:?} resolves to {w}x{h} for a {natural_w}x{natural_h} image"
        )));
    }
    Ok((w, h))
}

/// `value * numerator / denominator`, rounded to nearest.
fn scale(value: u32, numerator: u32, denominator: u32) -> u32 {
    let scaled = (u64::from(value) * u64::from(numerator) + u64::from(denominator) / 2)
        / u64::from(denominator);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// Resample `pixels` to `size`, or hand them back untouched if they already match.
pub fn resample(pixels: RgbaImage, size: (u32, u32)) -> RgbaImage {
    if pixels.dimensions() == size {
        return pixels;
    }
    imageops::resize(&pixels, size.0, size.1, FilterType::Triangle)
}
