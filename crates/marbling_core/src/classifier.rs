use anyhow::{Context, Result, bail};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use crate::normalize::{CanonicalTensor, ImageNormalizer, RGB_CHANNELS};
use crate::raw::RawImage;

/// Marbling grade predicted for a cross-section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarblingGrade {
    Low,
    High,
}

impl MarblingGrade {
    /// Labels in model output order.
    pub const LABELS: [MarblingGrade; 2] = [MarblingGrade::Low, MarblingGrade::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::High => "HIGH",
        }
    }

    /// Cut name shown to operators.
    pub fn classification(self) -> &'static str {
        match self {
            Self::High => "上カルビ",
            Self::Low => "並カルビ",
        }
    }
}

impl std::fmt::Display for MarblingGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub grade: MarblingGrade,
    /// Probability of `grade`, in [0,1].
    pub confidence: f32,
    /// `[p_low, p_high]`.
    pub probabilities: [f32; 2],
    /// Wall time of the model call in seconds.
    pub inference_time: f64,
}

/// A binary marbling model. Implementations are loaded once and shared
/// read-only between requests.
pub trait Classifier: Send + Sync {
    /// Fixed input signature, `[1, H, W, 3]`.
    fn input_shape(&self) -> [usize; 4];

    /// Raw outputs for the single batch element: one sigmoid value or one
    /// value per class.
    fn predict(&self, tensor: &CanonicalTensor) -> Result<Vec<f32>>;

    /// Location of the backing model, if any.
    fn model_path(&self) -> Option<&Path> {
        None
    }
}

/// Map raw model outputs to a grade and a two-class distribution.
pub fn interpret_scores(scores: &[f32]) -> Result<(MarblingGrade, f32, [f32; 2])> {
    if scores.iter().any(|s| !s.is_finite()) {
        bail!("model output contains NaN or infinity");
    }
    match scores {
        [p_high] => {
            let p_high = *p_high;
            if !(0.0..=1.0).contains(&p_high) {
                bail!("single model output {p_high} is not a probability");
            }
            let p_low = 1.0 - p_high;
            let grade = if p_high > 0.5 {
                MarblingGrade::High
            } else {
                MarblingGrade::Low
            };
            Ok((grade, p_high.max(p_low), [p_low, p_high]))
        }
        [low, high] => {
            let probs = if is_distribution(scores) {
                vec![*low, *high]
            } else {
                softmax(scores)
            };
            let grade = if probs[1] > probs[0] {
                MarblingGrade::High
            } else {
                MarblingGrade::Low
            };
            let confidence = match grade {
                MarblingGrade::High => probs[1],
                MarblingGrade::Low => probs[0],
            };
            Ok((grade, confidence, [probs[0], probs[1]]))
        }
        [] => bail!("model returned no scores"),
        other => bail!("expected 1 or 2 model outputs, got {}", other.len()),
    }
}

/// Model input shape from ONNX-style dimensions, where `None` marks a
/// dynamic axis. A dynamic batch is fixed to 1; height and width must be
/// concrete and the layout must be NHWC with three channels.
pub fn nhwc_input_shape(dims: &[Option<usize>]) -> Result<[usize; 4]> {
    let [batch, height, width, channels] = dims else {
        bail!("model input has rank {}, expected 4 (NHWC)", dims.len());
    };
    if channels != &Some(RGB_CHANNELS) {
        bail!("model input is not NHWC with {RGB_CHANNELS} channels: {dims:?}");
    }
    if !matches!(batch, None | Some(1)) {
        bail!("model input batch must be 1 or dynamic: {dims:?}");
    }
    let (Some(height), Some(width)) = (*height, *width) else {
        bail!("model input height and width must be fixed: {dims:?}");
    };
    Ok([1, height, width, RGB_CHANNELS])
}

fn is_distribution(values: &[f32]) -> bool {
    let sum: f32 = values.iter().sum();
    values.iter().all(|v| (0.0..=1.0).contains(v)) && (sum - 1.0).abs() < 1e-3
}

pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum == 0.0 {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|x| x / sum).collect()
}

/// Running totals over all predictions served by a [`MarblingModel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceStats {
    pub prediction_count: u64,
    pub total_inference_time: f64,
    pub average_inference_time: f64,
    pub predictions_per_second: f64,
}

#[derive(Debug, Default)]
struct StatsState {
    count: u64,
    total_secs: f64,
}

impl StatsState {
    fn snapshot(&self) -> InferenceStats {
        InferenceStats {
            prediction_count: self.count,
            total_inference_time: self.total_secs,
            average_inference_time: self.total_secs / self.count.max(1) as f64,
            predictions_per_second: self.count as f64 / self.total_secs.max(0.001),
        }
    }
}

/// Timings collected by [`MarblingModel::warmup`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WarmupReport {
    pub runs: usize,
    pub total_time: f64,
    pub average_time: f64,
    pub min_time: f64,
    pub max_time: f64,
}

/// Descriptive data about the loaded model, served by the info endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_path: Option<PathBuf>,
    pub model_name: Option<String>,
    pub file_size_mb: Option<f64>,
    pub input_shape: [usize; 4],
    pub class_names: Vec<String>,
    #[serde(flatten)]
    pub stats: InferenceStats,
    pub status: String,
}

/// Classifier wrapper that checks inputs, interprets outputs and keeps
/// statistics.
pub struct MarblingModel {
    classifier: Box<dyn Classifier>,
    stats: Mutex<StatsState>,
}

impl MarblingModel {
    pub fn new(classifier: Box<dyn Classifier>) -> Self {
        Self {
            classifier,
            stats: Mutex::new(StatsState::default()),
        }
    }

    pub fn input_shape(&self) -> [usize; 4] {
        self.classifier.input_shape()
    }

    /// Fails when `normalizer` cannot produce what the model expects.
    pub fn ensure_compatible(&self, normalizer: &ImageNormalizer) -> Result<()> {
        let produced = normalizer.output_shape();
        let expected = self.input_shape();
        if produced != expected {
            bail!("normalizer produces {produced:?} but the model expects {expected:?}");
        }
        Ok(())
    }

    pub fn predict(&self, tensor: &CanonicalTensor) -> Result<PredictionResult> {
        let start = Instant::now();
        let expected = self.input_shape();
        if tensor.shape() != expected {
            bail!(
                "input shape {:?} does not match model input {:?}",
                tensor.shape(),
                expected
            );
        }
        let scores = self
            .classifier
            .predict(tensor)
            .context("model inference failed")?;
        let (grade, confidence, probabilities) = interpret_scores(&scores)?;
        let inference_time = start.elapsed().as_secs_f64();

        if let Ok(mut stats) = self.stats.lock() {
            stats.count += 1;
            stats.total_secs += inference_time;
        }

        tracing::debug!(
            "predicted {grade} ({confidence:.3}) in {:.4}s",
            inference_time
        );
        Ok(PredictionResult {
            grade,
            confidence,
            probabilities,
            inference_time,
        })
    }

    /// Run the model a few times on a uniform mid-grey image. Does not touch
    /// the statistics.
    pub fn warmup(&self, normalizer: &ImageNormalizer, runs: usize) -> Result<WarmupReport> {
        let cfg = normalizer.config();
        let dummy = RawImage::Rgb(RgbImage::from_pixel(
            cfg.target_width,
            cfg.target_height,
            Rgb([128, 128, 128]),
        ));
        let tensor = normalizer.normalize(&dummy)?;

        let mut times = Vec::with_capacity(runs);
        for _ in 0..runs {
            let start = Instant::now();
            self.classifier.predict(&tensor)?;
            times.push(start.elapsed().as_secs_f64());
        }
        let total_time: f64 = times.iter().sum();
        let report = WarmupReport {
            runs,
            total_time,
            average_time: total_time / runs.max(1) as f64,
            min_time: times.iter().cloned().reduce(f64::min).unwrap_or(0.0),
            max_time: times.iter().cloned().reduce(f64::max).unwrap_or(0.0),
        };
        tracing::info!(
            "model warmup finished: {} runs, average {:.3}s",
            report.runs,
            report.average_time
        );
        Ok(report)
    }

    pub fn stats(&self) -> InferenceStats {
        self.stats
            .lock()
            .map(|s| s.snapshot())
            .unwrap_or_default()
    }

    pub fn reset_stats(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            *stats = StatsState::default();
        }
        tracing::info!("inference statistics reset");
    }

    pub fn class_names(&self) -> Vec<String> {
        MarblingGrade::LABELS
            .iter()
            .map(|g| g.as_str().to_string())
            .collect()
    }

    pub fn info(&self) -> ModelInfo {
        let path = self.classifier.model_path().map(Path::to_path_buf);
        let model_name = path
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned());
        let file_size_mb = path
            .as_deref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| (m.len() as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0);
        ModelInfo {
            model_path: path,
            model_name,
            file_size_mb,
            input_shape: self.input_shape(),
            class_names: self.class_names(),
            stats: self.stats(),
            status: "ready".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rstest::rstest;
    use tempfile::tempdir;

    struct FixedClassifier {
        scores: Vec<f32>,
        path: Option<PathBuf>,
    }

    impl Classifier for FixedClassifier {
        fn input_shape(&self) -> [usize; 4] {
            [1, 224, 224, 3]
        }

        fn predict(&self, _tensor: &CanonicalTensor) -> Result<Vec<f32>> {
            Ok(self.scores.clone())
        }

        fn model_path(&self) -> Option<&Path> {
            self.path.as_deref()
        }
    }

    fn model(scores: Vec<f32>) -> MarblingModel {
        MarblingModel::new(Box::new(FixedClassifier { scores, path: None }))
    }

    fn grey_tensor() -> CanonicalTensor {
        let image = RawImage::Rgb(RgbImage::from_pixel(64, 64, Rgb([128, 128, 128])));
        ImageNormalizer::default().normalize(&image).unwrap()
    }

    #[rstest]
    #[case(&[0.9], MarblingGrade::High, 0.9)]
    #[case(&[0.2], MarblingGrade::Low, 0.8)]
    #[case(&[0.5], MarblingGrade::Low, 0.5)]
    #[case(&[0.3, 0.7], MarblingGrade::High, 0.7)]
    #[case(&[0.6, 0.4], MarblingGrade::Low, 0.6)]
    fn scores_map_to_grade(
        #[case] scores: &[f32],
        #[case] grade: MarblingGrade,
        #[case] confidence: f32,
    ) {
        let (g, c, probs) = interpret_scores(scores).unwrap();
        assert_eq!(g, grade);
        assert_abs_diff_eq!(c, confidence, epsilon = 1e-6);
        assert_abs_diff_eq!(probs[0] + probs[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn logits_are_softmaxed() {
        let (grade, confidence, probs) = interpret_scores(&[-1.0, 3.0]).unwrap();
        assert_eq!(grade, MarblingGrade::High);
        assert!(confidence > 0.9);
        assert_abs_diff_eq!(probs[0] + probs[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn unusable_outputs_are_rejected() {
        assert!(interpret_scores(&[]).is_err());
        assert!(interpret_scores(&[0.1, 0.2, 0.7]).is_err());
        assert!(interpret_scores(&[f32::NAN]).is_err());
    }

    #[rstest]
    #[case(2.3)]
    #[case(-0.4)]
    fn single_logit_is_not_graded(#[case] score: f32) {
        let err = interpret_scores(&[score]).unwrap_err();
        assert!(err.to_string().contains("not a probability"), "{err}");
    }

    #[rstest]
    #[case(&[Some(1), Some(224), Some(224), Some(3)], [1, 224, 224, 3])]
    #[case(&[None, Some(256), Some(192), Some(3)], [1, 256, 192, 3])]
    fn model_dims_become_input_shape(#[case] dims: &[Option<usize>], #[case] shape: [usize; 4]) {
        assert_eq!(nhwc_input_shape(dims).unwrap(), shape);
    }

    #[rstest]
    #[case(&[Some(1), Some(3), Some(224), Some(224)])]
    #[case(&[Some(4), Some(224), Some(224), Some(3)])]
    #[case(&[None, None, None, Some(3)])]
    #[case(&[Some(224), Some(224), Some(3)])]
    fn unusable_model_dims_are_rejected(#[case] dims: &[Option<usize>]) {
        assert!(nhwc_input_shape(dims).is_err());
    }

    #[test]
    fn predict_updates_stats() {
        let model = model(vec![0.8]);
        let tensor = grey_tensor();
        let result = model.predict(&tensor).unwrap();
        assert_eq!(result.grade, MarblingGrade::High);
        model.predict(&tensor).unwrap();

        let stats = model.stats();
        assert_eq!(stats.prediction_count, 2);
        assert!(stats.total_inference_time >= 0.0);

        model.reset_stats();
        assert_eq!(model.stats().prediction_count, 0);
    }

    #[test]
    fn predict_rejects_mismatched_shape() {
        let model = model(vec![0.8]);
        let normalizer = ImageNormalizer::new(crate::NormalizerConfig {
            target_width: 128,
            target_height: 128,
            min_dimension: 32,
        });
        let tensor = normalizer
            .normalize(&RawImage::Rgb(RgbImage::new(64, 64)))
            .unwrap();
        assert!(model.predict(&tensor).is_err());
        assert!(model.ensure_compatible(&normalizer).is_err());
        assert!(model.ensure_compatible(&ImageNormalizer::default()).is_ok());
    }

    #[test]
    fn warmup_reports_runs_without_counting_them() {
        let model = model(vec![0.4]);
        let report = model.warmup(&ImageNormalizer::default(), 3).unwrap();
        assert_eq!(report.runs, 3);
        assert!(report.min_time <= report.max_time);
        assert_eq!(model.stats().prediction_count, 0);
    }

    #[test]
    fn info_describes_model_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("binary_high_low_model.onnx");
        std::fs::write(&path, vec![0u8; 1024 * 1024])?;
        let model = MarblingModel::new(Box::new(FixedClassifier {
            scores: vec![0.1],
            path: Some(path.clone()),
        }));
        let info = model.info();
        assert_eq!(info.model_name.as_deref(), Some("binary_high_low_model"));
        assert_eq!(info.file_size_mb, Some(1.0));
        assert_eq!(info.class_names, vec!["LOW", "HIGH"]);
        assert_eq!(info.status, "ready");
        Ok(())
    }

    #[test]
    fn grade_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&MarblingGrade::High).unwrap(), "\"HIGH\"");
        assert_eq!(MarblingGrade::Low.classification(), "並カルビ");
    }
}
