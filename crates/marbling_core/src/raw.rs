//! Decoded input images, one variant per color mode.

use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{NormalizationError, NormalizeResult};

/// Channel layout of a [`RawImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorMode {
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
    Palette,
    /// Untyped 8-bit buffer with the given number of interleaved channels.
    Interleaved(usize),
}

impl ColorMode {
    #[must_use]
    pub fn channels(self) -> usize {
        match self {
            Self::Gray | Self::Palette => 1,
            Self::GrayAlpha => 2,
            Self::Rgb => 3,
            Self::Rgba => 4,
            Self::Interleaved(n) => n,
        }
    }

    #[must_use]
    pub fn name(self) -> String {
        match self {
            Self::Gray => "Gray".to_string(),
            Self::GrayAlpha => "GrayAlpha".to_string(),
            Self::Rgb => "Rgb".to_string(),
            Self::Rgba => "Rgba".to_string(),
            Self::Palette => "Palette".to_string(),
            Self::Interleaved(n) => format!("Interleaved{n}"),
        }
    }
}

/// Palette-indexed image. `alpha` holds optional per-entry opacity; entries
/// past its end are opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteImage {
    width: u32,
    height: u32,
    indices: Vec<u8>,
    palette: Vec<[u8; 3]>,
    alpha: Option<Vec<u8>>,
}

impl PaletteImage {
    pub fn new(
        width: u32,
        height: u32,
        indices: Vec<u8>,
        palette: Vec<[u8; 3]>,
        alpha: Option<Vec<u8>>,
    ) -> NormalizeResult<Self> {
        let expected = width as usize * height as usize;
        if indices.len() != expected {
            return Err(NormalizationError::MalformedPixelBuffer {
                expected,
                actual: indices.len(),
            });
        }
        Ok(Self {
            width,
            height,
            indices,
            palette,
            alpha,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn indices(&self) -> &[u8] {
        &self.indices
    }

    /// RGBA color of a palette entry, or `None` if the index is out of range.
    pub fn entry(&self, index: u8) -> Option<[u8; 4]> {
        let idx = index as usize;
        let [r, g, b] = *self.palette.get(idx)?;
        let a = self
            .alpha
            .as_ref()
            .and_then(|alpha| alpha.get(idx))
            .copied()
            .unwrap_or(u8::MAX);
        Some([r, g, b, a])
    }

    pub fn palette_len(&self) -> usize {
        self.palette.len()
    }
}

/// Row-major 8-bit buffer with an arbitrary channel count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterleavedImage {
    width: u32,
    height: u32,
    channels: usize,
    data: Vec<u8>,
}

impl InterleavedImage {
    pub fn new(width: u32, height: u32, channels: usize, data: Vec<u8>) -> NormalizeResult<Self> {
        let expected = width as usize * height as usize * channels;
        if data.len() != expected {
            return Err(NormalizationError::MalformedPixelBuffer {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// An uploaded image, resolved to its color mode once at decode time.
#[derive(Debug, Clone)]
pub enum RawImage {
    Gray(GrayImage),
    GrayAlpha(GrayAlphaImage),
    Rgb(RgbImage),
    Rgba(RgbaImage),
    Palette(PaletteImage),
    Interleaved(InterleavedImage),
}

/// Basic facts about a [`RawImage`], for logging and introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub width: u32,
    pub height: u32,
    pub mode: String,
    pub channels: usize,
}

impl RawImage {
    /// Decode PNG/JPEG (or any format `image` recognizes) from memory.
    pub fn decode(bytes: &[u8]) -> NormalizeResult<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|source| NormalizationError::Decode { source })?;
        Ok(Self::from(img))
    }

    pub fn color_mode(&self) -> ColorMode {
        match self {
            Self::Gray(_) => ColorMode::Gray,
            Self::GrayAlpha(_) => ColorMode::GrayAlpha,
            Self::Rgb(_) => ColorMode::Rgb,
            Self::Rgba(_) => ColorMode::Rgba,
            Self::Palette(_) => ColorMode::Palette,
            Self::Interleaved(buf) => ColorMode::Interleaved(buf.channels()),
        }
    }

    /// `(width, height)` in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Gray(img) => img.dimensions(),
            Self::GrayAlpha(img) => img.dimensions(),
            Self::Rgb(img) => img.dimensions(),
            Self::Rgba(img) => img.dimensions(),
            Self::Palette(img) => img.dimensions(),
            Self::Interleaved(buf) => buf.dimensions(),
        }
    }

    pub fn summary(&self) -> ImageSummary {
        let (width, height) = self.dimensions();
        let mode = self.color_mode();
        ImageSummary {
            width,
            height,
            mode: mode.name(),
            channels: mode.channels(),
        }
    }
}

impl From<DynamicImage> for RawImage {
    /// 16-bit and float images are reduced to their 8-bit counterparts.
    fn from(img: DynamicImage) -> Self {
        match img {
            DynamicImage::ImageLuma8(i) => Self::Gray(i),
            DynamicImage::ImageLumaA8(i) => Self::GrayAlpha(i),
            DynamicImage::ImageRgb8(i) => Self::Rgb(i),
            DynamicImage::ImageRgba8(i) => Self::Rgba(i),
            other => {
                let color = other.color();
                match (color.has_color(), color.has_alpha()) {
                    (true, true) => Self::Rgba(other.to_rgba8()),
                    (true, false) => Self::Rgb(other.to_rgb8()),
                    (false, true) => Self::GrayAlpha(other.to_luma_alpha8()),
                    (false, false) => Self::Gray(other.to_luma8()),
                }
            }
        }
    }
}
