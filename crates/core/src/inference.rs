use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Classifier output for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub predicted_class: String,
    pub confidence: f64,
    /// Class name → probability in `[0, 1]`.
    #[serde(default)]
    pub probs: BTreeMap<String, f64>,
}

impl InferenceResult {
    pub fn is_fire(&self) -> bool {
        self.predicted_class.eq_ignore_ascii_case("fire")
    }

    pub fn is_smoke(&self) -> bool {
        self.predicted_class.eq_ignore_ascii_case("smoke")
    }

    /// Probability of the `fire` class, `0.0` when the model did not report it.
    pub fn fire_probability(&self) -> f64 {
        self.probs.get("fire").copied().unwrap_or(0.0)
    }
}
