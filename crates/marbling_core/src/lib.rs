//! Core of the beef marbling grader.
//!
//! - [`ImageNormalizer`] turns any decoded upload ([`RawImage`]) into the
//!   `[1, H, W, 3]` float tensor the classifier expects.
//! - [`MarblingModel`] wraps a [`Classifier`] backend and turns its raw
//!   scores into a `HIGH`/`LOW` grade.
//! - [`fat`] estimates the fat-area share of a cross-section by HSV
//!   thresholding, for the desktop inspection tool.

pub mod classifier;
pub mod error;
pub mod export;
pub mod fat;
pub mod normalize;
#[cfg(feature = "ort")]
pub mod onnx;
pub mod raw;

pub use classifier::{
    Classifier, InferenceStats, MarblingGrade, MarblingModel, ModelInfo, PredictionResult,
    WarmupReport, interpret_scores,
};
pub use error::{NormalizationError, NormalizeResult};
pub use export::{ScanOptions, export_fat_csv, is_supported_image, scan_folder};
pub use fat::{FatMeasurement, HsvThresholds, measure_batch, measure_file};
pub use normalize::{CanonicalTensor, ImageNormalizer, NormalizerConfig};
#[cfg(feature = "ort")]
pub use onnx::OnnxClassifier;
pub use raw::{ColorMode, ImageSummary, InterleavedImage, PaletteImage, RawImage};
