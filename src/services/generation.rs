use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::config::GenerationConfig;
use crate::error::GenerationError;

/// Text-generation capability used to personalize template bodies. A black
/// box to the engine: given a prompt it returns text, or fails, or times
/// out; the dispatcher falls back to the static rendering in both failure
/// cases.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Client for a local-LLM generate endpoint (Ollama wire shape).
#[derive(Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl HttpGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Failed(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ContentGenerator for HttpGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout
                } else {
                    GenerationError::Failed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            warn!("generation endpoint returned {}", status);
            return Err(GenerationError::Failed(format!("status {}", status)));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Failed(e.to_string()))?;

        let text = body.response.trim().to_string();
        if text.is_empty() {
            return Err(GenerationError::Failed("empty generation".into()));
        }
        Ok(text)
    }
}
