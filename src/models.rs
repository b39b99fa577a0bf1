use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::prediction::PredictionResult;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PingResponse {
    pub status: String,
    pub message: String,
}

impl PingResponse {
    pub fn alive() -> Self {
        Self {
            status: "alive".to_string(),
            message: "Model serving API is running".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorResponse {
    pub detail: String,
}

/// Class scores serialized as a JSON object that keeps catalog order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities(pub Vec<(String, f32)>);

impl Serialize for ClassProbabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, score) in &self.0 {
            map.serialize_entry(name, score)?;
        }
        map.end()
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PredictionResponse {
    pub prediction: String,
    pub confidence: f32,
    pub class_probabilities: ClassProbabilities,
    pub advice: String,
}

impl From<PredictionResult> for PredictionResponse {
    fn from(result: PredictionResult) -> Self {
        Self {
            prediction: result.prediction,
            confidence: result.confidence,
            class_probabilities: ClassProbabilities(result.class_probabilities),
            advice: result.advice,
        }
    }
}
