//! Text-generation capability consumed by the translator, validator and
//! narrator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Sampling parameters for one call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationParams {
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
        }
    }
}

/// Function-style output schema. `parameters` is a JSON schema object.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub params: GenerationParams,
    /// `Some` requests structured output conforming to the schema.
    pub schema: Option<ResponseSchema>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    Text(String),
    Structured(serde_json::Value),
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, LlmError>;
}

/// Run one generation under a deadline.
pub(crate) async fn generate_within(
    llm: &dyn TextGenerator,
    request: GenerationRequest,
    timeout: std::time::Duration,
) -> Result<Generation, LlmError> {
    match tokio::time::timeout(timeout, llm.generate(request)).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
