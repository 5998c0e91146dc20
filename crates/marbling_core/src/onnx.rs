//! ONNX Runtime backend for [`Classifier`].

use anyhow::{Context, Result, anyhow};
use ndarray::CowArray;
use once_cell::sync::Lazy;
use ort::{
    GraphOptimizationLevel, SessionBuilder, environment::Environment, session::Session,
    tensor::OrtOwnedTensor, value::Value,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::classifier::{Classifier, nhwc_input_shape};
use crate::normalize::CanonicalTensor;

static ORT_ENV: Lazy<Arc<Environment>> = Lazy::new(|| {
    Environment::builder()
        .with_name("marbling")
        .build()
        .expect("failed to initialize ONNX Runtime environment")
        .into_arc()
});

/// Binary marbling classifier exported to ONNX with an NHWC float input.
pub struct OnnxClassifier {
    session: Session,
    model_path: PathBuf,
    input_shape: [usize; 4],
}

impl OnnxClassifier {
    /// Loads the model and reads its input signature from the graph.
    pub fn new(model_path: impl AsRef<Path>) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            anyhow::bail!("model file not found: {}", model_path.display());
        }
        tracing::info!("loading model {}", model_path.display());
        let env = ORT_ENV.clone();
        let session = SessionBuilder::new(&env)?
            .with_optimization_level(GraphOptimizationLevel::Level1)?
            .with_model_from_file(model_path)
            .with_context(|| format!("cannot load model {}", model_path.display()))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| anyhow!("model {} declares no inputs", model_path.display()))?;
        let dims: Vec<Option<usize>> = input
            .dimensions
            .iter()
            .map(|d| d.map(|d| d as usize))
            .collect();
        let input_shape = nhwc_input_shape(&dims)
            .with_context(|| format!("unsupported model input {:?}", input.name))?;
        tracing::info!("model input {:?} shape {:?}", input.name, input_shape);

        Ok(Self {
            session,
            model_path: model_path.to_path_buf(),
            input_shape,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn input_shape(&self) -> [usize; 4] {
        self.input_shape
    }

    fn predict(&self, tensor: &CanonicalTensor) -> Result<Vec<f32>> {
        let input_array = tensor.view().into_dyn();
        let cow = CowArray::from(input_array);
        let input = Value::from_array(self.session.allocator(), &cow)
            .map_err(|e| anyhow!("cannot build input tensor: {e}"))?;
        let outputs: Vec<Value> = self.session.run(vec![input])?;
        if outputs.is_empty() {
            anyhow::bail!("model produced no output");
        }
        let raw: OrtOwnedTensor<f32, _> = outputs[0].try_extract()?;
        let scores: Vec<f32> = raw.view().iter().cloned().collect();
        Ok(scores)
    }

    fn model_path(&self) -> Option<&Path> {
        Some(&self.model_path)
    }
}
