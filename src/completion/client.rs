//! HTTP implementation of [`CompletionProvider`]

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Method;
use tracing::{debug, info_span, warn, Instrument};

use super::stream::{parse_chunk, SseDecoder, SseEvent};
use super::types::{CompletionMetadata, CompletionRequest, CompletionResult, Message, RawCompletion};
use super::{ChunkStream, CompletionError, CompletionProvider};
use crate::config::ProviderConfig;
use crate::health::HealthStatus;
use crate::metrics::{COMPLETION_DURATION, COMPLETION_TOKENS};
use crate::transport::{RetryPolicy, TransportClient};

const COMPLETIONS_PATH: &str = "/chat/completions";

/// Client for an OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone)]
pub struct CompletionClient {
    transport: TransportClient,
    model: String,
    health_timeout: Duration,
}

impl CompletionClient {
    /// Create a client from provider settings
    ///
    /// Organization and project identifiers are sent as the
    /// `OpenAI-Organization` and `OpenAI-Project` headers.
    pub fn new(config: &ProviderConfig) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| CompletionError::Stream(e.to_string()))?;
        Self::with_http(config, http)
    }

    /// Create a client over an existing connection pool
    pub fn with_http(config: &ProviderConfig, http: reqwest::Client) -> Result<Self, CompletionError> {
        let transport = TransportClient::new(http, config.base_url.clone(), "provider")
            .with_timeout(config.timeout)
            .with_retry(RetryPolicy::new(config.max_retries, config.retry_delay))
            .with_default_headers(provider_headers(config)?);

        Ok(Self {
            transport,
            model: config.model.clone(),
            health_timeout: config.health_timeout,
        })
    }
}

fn provider_headers(config: &ProviderConfig) -> Result<HeaderMap, CompletionError> {
    let header = |value: &str| {
        HeaderValue::from_str(value).map_err(|e| CompletionError::Decode(format!("invalid header value: {e}")))
    };

    let mut headers = HeaderMap::new();
    if !config.api_key.is_empty() {
        headers.insert(AUTHORIZATION, header(&format!("Bearer {}", config.api_key))?);
    }
    if let Some(org) = config.org_id.as_deref() {
        headers.insert(HeaderName::from_static("openai-organization"), header(org)?);
    }
    if let Some(project) = config.project_id.as_deref() {
        headers.insert(HeaderName::from_static("openai-project"), header(project)?);
    }
    Ok(headers)
}

#[async_trait]
impl CompletionProvider for CompletionClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult, CompletionError> {
        let span = info_span!(
            "completion",
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            otel.name = "completion"
        );

        async {
            let start = Instant::now();
            let body = request.to_body(&self.model, false);
            let value = self
                .transport
                .request(Method::POST, COMPLETIONS_PATH, Some(&body), None, request.timeout)
                .await?;

            let duration = start.elapsed().as_secs_f64();
            COMPLETION_DURATION
                .with_label_values(&[&self.model, "complete"])
                .observe(duration);

            if value.get("error").is_some() {
                return Err(CompletionError::from_error_body(None, &value));
            }
            let raw: RawCompletion =
                serde_json::from_value(value).map_err(|e| CompletionError::Decode(e.to_string()))?;
            if raw.choices.is_empty() {
                return Err(CompletionError::EmptyResponse);
            }

            COMPLETION_TOKENS
                .with_label_values(&[&self.model, "prompt"])
                .inc_by(raw.usage.prompt_tokens as f64);
            COMPLETION_TOKENS
                .with_label_values(&[&self.model, "completion"])
                .inc_by(raw.usage.completion_tokens as f64);
            debug!(
                id = %raw.id,
                duration_ms = duration * 1000.0,
                total_tokens = raw.usage.total_tokens,
                "completion received"
            );

            Ok(CompletionResult {
                choices: raw.choices,
                usage: raw.usage,
                metadata: CompletionMetadata {
                    duration,
                    model: if raw.model.is_empty() { self.model.clone() } else { raw.model },
                    id: raw.id,
                    created: raw.created,
                },
            })
        }
        .instrument(span)
        .await
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream, CompletionError> {
        let start = Instant::now();
        let body = request.to_body(&self.model, true);
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let response = self
            .transport
            .send(Method::POST, COMPLETIONS_PATH, Some(&body), Some(&headers), request.timeout)
            .instrument(info_span!("completion_stream", model = %self.model, otel.name = "completion_stream"))
            .await?;
        COMPLETION_DURATION
            .with_label_values(&[&self.model, "stream"])
            .observe(start.elapsed().as_secs_f64());

        let mut bytes = Box::pin(response.bytes_stream());
        let chunks = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            let mut input_done = false;
            while !input_done {
                let events = match bytes.next().await {
                    Some(Ok(chunk)) => decoder.push(&chunk),
                    Some(Err(e)) => {
                        yield Err(CompletionError::Stream(e.to_string()));
                        return;
                    }
                    None => {
                        input_done = true;
                        decoder.finish()
                    }
                };

                for event in events {
                    let payload = match event {
                        SseEvent::Done => return,
                        SseEvent::Data(payload) => payload,
                    };
                    match parse_chunk(&payload) {
                        Ok(chunk) => {
                            let terminal = chunk.finish_reason.is_some();
                            yield Ok(chunk);
                            if terminal {
                                return;
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(chunks))
    }

    async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        let probe = CompletionRequest {
            max_tokens: Some(1),
            timeout: Some(self.health_timeout),
            ..CompletionRequest::new(vec![Message::user("Hello")])
        };
        let client = Self {
            transport: self
                .transport
                .clone()
                .with_retry(RetryPolicy::new(1, Duration::ZERO)),
            ..self.clone()
        };

        match client.complete(probe).await {
            Ok(result) => {
                let mut status = HealthStatus::healthy(start.elapsed().as_secs_f64() * 1000.0);
                status
                    .details
                    .insert("model".to_string(), result.metadata.model.into());
                status
            }
            Err(e) => {
                warn!(model = %self.model, error = %e, "completion health check failed");
                HealthStatus::unhealthy(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_headers() {
        let config = ProviderConfig {
            api_key: "sk-test".to_string(),
            org_id: Some("org-123".to_string()),
            project_id: Some("proj-456".to_string()),
            ..ProviderConfig::default()
        };
        let headers = provider_headers(&config).unwrap();

        assert_eq!(headers[AUTHORIZATION], "Bearer sk-test");
        assert_eq!(headers["OpenAI-Organization"], "org-123");
        assert_eq!(headers["OpenAI-Project"], "proj-456");
    }

    #[test]
    fn test_no_auth_header_without_key() {
        let headers = provider_headers(&ProviderConfig::default()).unwrap();
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_invalid_header_value_is_rejected() {
        let config = ProviderConfig {
            org_id: Some("bad\nvalue".to_string()),
            ..ProviderConfig::default()
        };
        assert!(provider_headers(&config).is_err());
    }
}
