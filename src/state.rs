use std::sync::Arc;

use crate::classifier::Classifier;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::prediction::{self, AdvisoryTable, ClassCatalog, PredictionResult};
use crate::preprocess::{self, DecodeLimits, ImageSize};

/// Everything a request needs, built once at startup and shared read-only.
#[derive(Clone)]
pub struct AppState {
    pub classifier: Arc<dyn Classifier>,
    pub catalog: ClassCatalog,
    pub advisory: AdvisoryTable,
    pub image_size: ImageSize,
    pub decode_limits: DecodeLimits,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(classifier: Arc<dyn Classifier>, config: &AppConfig) -> Self {
        let (catalog, advisory) = prediction::from_config(&config.classes);
        Self {
            classifier,
            catalog,
            advisory,
            image_size: ImageSize::new(config.model.image_width, config.model.image_height),
            decode_limits: DecodeLimits {
                max_dimension: config.limits.max_image_dimension,
                max_alloc_bytes: config.limits.max_decode_bytes,
            },
            max_upload_bytes: config.limits.max_upload_bytes,
        }
    }

    /// Decode, infer with a batch of one, then format.
    pub fn classify(&self, raw: &[u8]) -> Result<PredictionResult, ApiError> {
        let tensor = preprocess::decode_and_normalize(raw, self.image_size, self.decode_limits)?;

        let mut outputs = self.classifier.infer(&[tensor])?;
        if outputs.len() != 1 {
            return Err(ApiError::Internal(format!(
                "expected 1 probability vector, got {}",
                outputs.len()
            )));
        }
        let probs = outputs.remove(0);

        Ok(prediction::format(&probs, &self.catalog, &self.advisory)?)
    }
}
