use log::info;
use std::path::Path;
use thiserror::Error;
use tract_onnx::prelude::*;

use crate::preprocess::{ImageSize, ImageTensor};

pub type ProbabilityVector = Vec<f32>;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Model not found at path: {0}")]
    ModelNotFound(String),

    #[error("Could not load model {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("Model outputs {outputs} classes but {catalog} are configured")]
    ClassCountMismatch { outputs: usize, catalog: usize },

    #[error("Input shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Inference error: {0}")]
    Inference(String),
}

/// The loaded classifier artifact.
///
/// Implementations must be callable from many request threads at once.
pub trait Classifier: Send + Sync {
    /// Returns one probability vector per tensor in `batch`, in the same order.
    fn infer(&self, batch: &[ImageTensor]) -> Result<Vec<ProbabilityVector>, ClassifierError>;
}

type Plan = TypedRunnableModel<TypedModel>;

/// ONNX classifier executed with tract. Expects NHWC `f32` input.
pub struct OnnxClassifier {
    plan: Plan,
    input_size: ImageSize,
}

impl std::fmt::Debug for OnnxClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxClassifier")
            .field("input_size", &self.input_size)
            .finish()
    }
}

impl OnnxClassifier {
    /// Loads, optimizes and compiles the model at `path` for a batch of one
    /// `height x width x 3` image. `classes` is checked against the model's
    /// output width when the model declares one.
    pub fn load(
        path: impl AsRef<Path>,
        input_size: ImageSize,
        classes: usize,
    ) -> Result<Self, ClassifierError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ClassifierError::ModelNotFound(path.display().to_string()));
        }

        let load_err = |e: TractError| ClassifierError::Load {
            path: path.display().to_string(),
            reason: format!("{:#}", e),
        };

        let [h, w, c] = input_size.shape();
        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(load_err)?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, h, w, c)),
            )
            .map_err(load_err)?
            .into_optimized()
            .map_err(load_err)?
            .into_runnable()
            .map_err(load_err)?;

        let output_shape = plan
            .model()
            .output_fact(0)
            .map_err(load_err)?
            .shape
            .as_concrete()
            .map(|s| s.to_vec());

        if let Some(outputs) = output_shape.as_ref().and_then(|s| s.last().copied()) {
            if outputs != classes {
                return Err(ClassifierError::ClassCountMismatch {
                    outputs,
                    catalog: classes,
                });
            }
        }

        info!(
            "Loaded model {} (input [1, {}, {}, {}], output {:?})",
            path.display(),
            h,
            w,
            c,
            output_shape
        );

        Ok(Self { plan, input_size })
    }

    fn run_one(&self, tensor: &ImageTensor) -> Result<ProbabilityVector, ClassifierError> {
        let expected = self.input_size.shape();
        if tensor.shape() != &expected[..] {
            return Err(ClassifierError::ShapeMismatch {
                expected: expected.to_vec(),
                got: tensor.shape().to_vec(),
            });
        }

        let data: Vec<f32> = tensor.iter().copied().collect();
        let input = tract_ndarray::Array4::from_shape_vec(
            (1, expected[0], expected[1], expected[2]),
            data,
        )
        .map_err(|e| ClassifierError::Inference(e.to_string()))?
        .into_tensor();

        let result = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| ClassifierError::Inference(format!("{:#}", e)))?;

        let output = result
            .first()
            .ok_or_else(|| ClassifierError::Inference("model produced no outputs".to_string()))?
            .to_array_view::<f32>()
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let scores: ProbabilityVector = output.iter().copied().collect();
        check_scores(&scores)?;
        Ok(scores)
    }
}

impl Classifier for OnnxClassifier {
    fn infer(&self, batch: &[ImageTensor]) -> Result<Vec<ProbabilityVector>, ClassifierError> {
        batch.iter().map(|tensor| self.run_one(tensor)).collect()
    }
}

fn check_scores(scores: &[f32]) -> Result<(), ClassifierError> {
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(ClassifierError::Inference(
            "model produced non-finite scores".to_string(),
        ));
    }
    Ok(())
}
