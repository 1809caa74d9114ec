//! Fire-classification collaborator.
//!
//! The pipeline only depends on [`InferenceClient`]; the HTTP client talks to
//! the model service and [`StaticInferenceClient`] serves tests/dev.

pub mod http;

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use firewatch_core::InferenceResult;

pub use http::HttpInferenceClient;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferenceError {
    /// Connection, timeout or other transport failure.
    #[error("inference transport error: {0}")]
    Transport(String),

    /// The service answered with something other than 200.
    #[error("inference service returned status {0}")]
    Status(u16),

    /// The body could not be decoded as an inference result.
    #[error("malformed inference response: {0}")]
    Malformed(String),
}

/// Classifies one encoded frame.
///
/// Implementations run on the async runtime, never on a component thread.
#[async_trait]
pub trait InferenceClient: Send + Sync + 'static {
    async fn infer(&self, frame_jpeg_b64: &str) -> Result<InferenceResult, InferenceError>;
}

/// Canned inference responses for tests/dev.
///
/// Frames without a scripted response get the fallback response.
#[derive(Debug)]
pub struct StaticInferenceClient {
    responses: Mutex<HashMap<String, Result<InferenceResult, InferenceError>>>,
    fallback: Result<InferenceResult, InferenceError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticInferenceClient {
    pub fn new(fallback: Result<InferenceResult, InferenceError>) -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answer with the given fire probability.
    pub fn with_fire_probability(probability: f64) -> Self {
        Self::new(Ok(fire_result(probability)))
    }

    /// Script the response for one frame.
    pub fn respond(self, frame: impl Into<String>, response: Result<InferenceResult, InferenceError>) -> Self {
        if let Ok(mut responses) = self.responses.lock() {
            responses.insert(frame.into(), response);
        }
        self
    }

    /// Simulate model latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceClient for StaticInferenceClient {
    async fn infer(&self, frame_jpeg_b64: &str) -> Result<InferenceResult, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self
            .responses
            .lock()
            .ok()
            .and_then(|r| r.get(frame_jpeg_b64).cloned());
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

/// A result whose `fire` probability is `probability`.
pub fn fire_result(probability: f64) -> InferenceResult {
    let predicted_class = if probability > 0.5 { "fire" } else { "none" };
    InferenceResult {
        predicted_class: predicted_class.to_string(),
        confidence: probability.max(1.0 - probability),
        probs: [
            ("fire".to_string(), probability),
            ("none".to_string(), 1.0 - probability),
        ]
        .into_iter()
        .collect(),
    }
}
