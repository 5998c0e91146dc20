//! Error types for image decoding and normalization.

use thiserror::Error;

/// Failure modes of [`crate::ImageNormalizer::normalize`] and of building a
/// [`crate::RawImage`].
#[derive(Error, Debug)]
pub enum NormalizationError {
    /// The input bytes are not a decodable PNG/JPEG image.
    #[error("failed to decode image: {source}")]
    Decode {
        #[source]
        source: image::ImageError,
    },

    /// A raw pixel buffer does not match its declared geometry.
    #[error("pixel buffer has {actual} bytes, expected {expected}")]
    MalformedPixelBuffer { expected: usize, actual: usize },

    /// The color mode or channel count is not one the normalizer accepts.
    #[error("unsupported color mode: {mode}")]
    UnsupportedColorMode { mode: String },

    /// Either spatial dimension is below the configured minimum.
    #[error("image too small: {width}x{height} (minimum {min}x{min})")]
    ImageTooSmall { width: u32, height: u32, min: u32 },

    /// A normalizer setting makes every image unusable, e.g. a zero target size.
    #[error("invalid normalizer config: {reason}")]
    InvalidConfig { reason: String },

    /// The produced tensor broke its shape or range guarantee. Indicates a bug.
    #[error("normalization invariant violated: {reason}")]
    NormalizationInvariantViolation { reason: String },
}

impl NormalizationError {
    pub(crate) fn unsupported(mode: impl Into<String>) -> Self {
        Self::UnsupportedColorMode { mode: mode.into() }
    }

    pub(crate) fn invariant(reason: impl Into<String>) -> Self {
        Self::NormalizationInvariantViolation {
            reason: reason.into(),
        }
    }

    /// True when the caller supplied bad input; false for defensive failures
    /// and misconfiguration.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        !matches!(
            self,
            Self::NormalizationInvariantViolation { .. } | Self::InvalidConfig { .. }
        )
    }
}

/// Result alias for normalization operations.
pub type NormalizeResult<T> = std::result::Result<T, NormalizationError>;
