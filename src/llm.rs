//! LLM provider abstraction
//!
//! The opaque language capability shared by the router and the responders.

mod error;
mod openai;
mod types;

pub use error::{LlmError, LlmErrorKind};
pub use openai::OpenAiService;
pub use types::*;

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a completion request
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Start a streaming completion.
    ///
    /// Returns `None` when the provider cannot stream.
    fn complete_stream(&self, _request: LlmRequest) -> Option<TextStream> {
        None
    }

    /// Get the model ID
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: LlmService + ?Sized> LlmService for Arc<T> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        (**self).complete(request).await
    }

    fn complete_stream(&self, request: LlmRequest) -> Option<TextStream> {
        (**self).complete_stream(request)
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Configuration for the LLM provider
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    /// Base URL of an OpenAI-compatible endpoint (e.g., `https://api.openai.com/v1`)
    pub base_url: String,
    /// Model used for triage classification
    pub router_model: String,
    /// Model used by the responders
    pub responder_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            router_model: "gpt-4o-mini".to_string(),
            responder_model: "gpt-4o".to_string(),
        }
    }
}

impl LlmConfig {
    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("LLM_BASE_URL").unwrap_or(defaults.base_url),
            router_model: get("ROUTER_MODEL").unwrap_or(defaults.router_model),
            responder_model: get("RESPONDER_MODEL").unwrap_or(defaults.responder_model),
        }
    }
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();
        let result = self.inner.complete(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    transient = e.kind.is_transient(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    fn complete_stream(&self, request: LlmRequest) -> Option<TextStream> {
        let stream = self.inner.complete_stream(request)?;
        let model_id = self.model_id.clone();
        let start = Instant::now();
        let mut deltas = 0usize;

        let logged = stream.inspect(move |item| match item {
            Ok(_) => {
                deltas += 1;
                if deltas == 1 {
                    tracing::debug!(
                        model = %model_id,
                        first_delta_ms = %start.elapsed().as_millis(),
                        "LLM stream started"
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    model = %model_id,
                    deltas,
                    error = %e.message,
                    "LLM stream failed"
                );
            }
        });

        Some(Box::pin(logged))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
