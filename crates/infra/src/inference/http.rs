//! HTTP client for the model service (`POST {endpoint}/infer`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use firewatch_core::InferenceResult;

use super::{InferenceClient, InferenceError};

#[derive(Debug, Serialize)]
struct InferRequest<'a> {
    frame_jpeg_b64: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    client: reqwest::Client,
    url: String,
}

impl HttpInferenceClient {
    /// `endpoint` is the service base URL, e.g. `http://inference:8000`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("{}/infer", endpoint.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn infer(&self, frame_jpeg_b64: &str) -> Result<InferenceResult, InferenceError> {
        let response = self
            .client
            .post(&self.url)
            .json(&InferRequest { frame_jpeg_b64 })
            .send()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(InferenceError::Status(response.status().as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        serde_json::from_slice(&body).map_err(|e| InferenceError::Malformed(e.to_string()))
    }
}
