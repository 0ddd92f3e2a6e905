//! Chat completion client with tool declarations
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint, in two
//! modes:
//!
//! - `complete` - one JSON response with choices, usage and metadata
//! - `stream`   - a lazy, finite sequence of [`StreamChunk`]s decoded
//!   from server-sent events as they arrive
//!
//! The [`CompletionProvider`] trait is the seam the orchestrator depends
//! on, so tests can script provider behavior without a network.

pub mod client;
pub mod stream;
pub mod types;

pub use client::CompletionClient;
pub use stream::{
    collect_stream, AccumulatorState, CollectedStream, SseDecoder, SseEvent, ToolCallAccumulator,
};
pub use types::{
    Choice, CompletionMetadata, CompletionRequest, CompletionResult, FunctionCall, Message, Role,
    StreamChunk, ToolCall, ToolCallDelta, ToolChoice, ToolDefinition, Usage,
};

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use thiserror::Error;

use crate::health::HealthStatus;
use crate::transport::TransportError;

/// Streamed completion; dropping it closes the underlying connection
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, CompletionError>> + Send>>;

/// Provider-side failures
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    /// The provider rejected the request (rate limit, auth, bad schema, ...)
    #[error("{message} (status: {}, code: {})", display_or_none(.status), display_or_none(.code))]
    Provider {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },
    /// No response was received
    #[error(transparent)]
    Transport(TransportError),
    #[error("failed to decode completion response: {0}")]
    Decode(String),
    #[error("completion response contained no choices")]
    EmptyResponse,
    #[error("streamed tool call {index} is missing its {missing}")]
    IncompleteToolCall { index: usize, missing: &'static str },
    #[error("completion stream failed: {0}")]
    Stream(String),
}

impl CompletionError {
    /// Build a provider error from `{"error": {"message", "type", "code"}}`
    pub fn from_error_body(status: Option<u16>, body: &Value) -> Self {
        let error = &body["error"];
        let message = error["message"]
            .as_str()
            .or_else(|| error.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string());
        let code = error["code"]
            .as_str()
            .or_else(|| error["type"].as_str())
            .map(str::to_string)
            .or_else(|| error["code"].as_i64().map(|c| c.to_string()));
        CompletionError::Provider {
            status,
            code,
            message,
        }
    }
}

impl From<TransportError> for CompletionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Status { status, body, .. } => {
                match serde_json::from_str::<Value>(&body) {
                    Ok(value) if value.get("error").is_some() => {
                        CompletionError::from_error_body(Some(status), &value)
                    }
                    _ => CompletionError::Provider {
                        status: Some(status),
                        code: None,
                        message: body,
                    },
                }
            }
            TransportError::Decode { message, .. } => CompletionError::Decode(message),
            other => CompletionError::Transport(other),
        }
    }
}

fn display_or_none<T: std::fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "none".to_string(),
    }
}

/// A chat completion backend
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Model identifier used for requests and metrics
    fn model(&self) -> &str;

    /// Non-streaming completion
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult, CompletionError>;

    /// Streaming completion; the stream ends after a terminal `finish_reason`
    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, CompletionError>;

    /// One-token probe; failures become an `unhealthy` report
    async fn health_check(&self) -> HealthStatus;
}
