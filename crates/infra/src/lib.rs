//! Infrastructure layer: bus transports, the inference client and the
//! escalation pipeline built on top of them.

pub mod event_bus;
pub mod inference;
pub mod pipeline;

#[cfg(test)]
mod integration_tests;

pub use inference::{HttpInferenceClient, InferenceClient, InferenceError, StaticInferenceClient};
pub use pipeline::{Pipeline, PipelineConfig, StartupError};
