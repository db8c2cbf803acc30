use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::stream::StreamEvent;

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Output discipline requested from the model.
#[derive(Debug, Clone)]
pub enum Mode {
    /// Free text.
    Text,
    /// A single JSON object; `schema` is rendered into the instruction and
    /// the final text must parse as JSON.
    Json { schema: Option<serde_json::Value> },
}

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub mode: Mode,
}

impl CompletionRequest {
    /// The system prompt with the JSON-mode instruction appended when the
    /// request demands structured output.
    pub fn effective_system(&self) -> String {
        match &self.mode {
            Mode::Text => self.system.clone(),
            Mode::Json { schema } => {
                let mut s = self.system.clone();
                s.push_str(
                    "\n\nRespond with a single JSON object and nothing else — \
                     no prose, no code fences.",
                );
                if let Some(schema) = schema {
                    s.push_str("\nThe object must match this JSON schema:\n");
                    s.push_str(&schema.to_string());
                }
                s
            }
        }
    }
}

/// Response from an LLM provider (non-streaming).
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
}

/// Common interface for streaming completion providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send a non-streaming request, wait for the full response.
    async fn complete(
        &self,
        req: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Stream response events through a channel.
    /// Default: falls back to non-streaming complete, emits TextDelta + Done.
    async fn complete_stream(
        &self,
        req: &CompletionRequest,
        tx: mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let resp = self.complete(req, cancel).await?;
        let _ = tx.send(StreamEvent::TextDelta { text: resp.content }).await;
        let _ = tx
            .send(StreamEvent::Done {
                model: resp.model,
                tokens_in: resp.tokens_in,
                tokens_out: resp.tokens_out,
                stop_reason: resp.stop_reason,
            })
            .await;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Request timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Transport-level failures that justify a retry or a provider
    /// fallback. Rate limits, parse errors, and cancellation are not
    /// retriable.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(_) | ProviderError::Timeout | ProviderError::Unavailable(_) => true,
            ProviderError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
