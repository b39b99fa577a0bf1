use std::collections::HashMap;
use thiserror::Error;

use crate::config::ClassConfig;

pub const FALLBACK_ADVICE: &str = "No specific advice available.";

#[derive(Error, Debug, PartialEq)]
pub enum FormatError {
    #[error("Class catalog has {catalog} entries but the model produced {scores} scores")]
    LengthMismatch { catalog: usize, scores: usize },
}

/// Ordered class names; position `i` names score `i` of every probability vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassCatalog(Vec<String>);

impl ClassCatalog {
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdvisoryTable(HashMap<String, String>);

impl AdvisoryTable {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self(entries)
    }

    /// Advice for `class`, or [`FALLBACK_ADVICE`] when the table has none.
    pub fn advice_for(&self, class: &str) -> &str {
        self.0.get(class).map(String::as_str).unwrap_or(FALLBACK_ADVICE)
    }
}

/// Splits the configured classes into the catalog and its advisory table.
pub fn from_config(classes: &[ClassConfig]) -> (ClassCatalog, AdvisoryTable) {
    let names = classes.iter().map(|c| c.name.clone()).collect();
    let advice = classes
        .iter()
        .filter_map(|c| c.advice.clone().map(|a| (c.name.clone(), a)))
        .collect();
    (ClassCatalog::new(names), AdvisoryTable::new(advice))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub prediction: String,
    pub confidence: f32,
    /// Every class with its score, in catalog order.
    pub class_probabilities: Vec<(String, f32)>,
    pub advice: String,
}

/// Index of the largest score; ties go to the lowest index.
fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

pub fn format(
    probs: &[f32],
    catalog: &ClassCatalog,
    advisory: &AdvisoryTable,
) -> Result<PredictionResult, FormatError> {
    let mismatch = FormatError::LengthMismatch {
        catalog: catalog.len(),
        scores: probs.len(),
    };
    if probs.len() != catalog.len() {
        return Err(mismatch);
    }
    let index = argmax(probs).ok_or(mismatch)?;

    let prediction = catalog.names()[index].clone();
    let class_probabilities = catalog
        .names()
        .iter()
        .cloned()
        .zip(probs.iter().copied())
        .collect();
    let advice = advisory.advice_for(&prediction).to_string();

    Ok(PredictionResult {
        prediction,
        confidence: probs[index],
        class_probabilities,
        advice,
    })
}
