//! Retrying HTTP request executor

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Method, Response};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{RetryPolicy, TransportError};
use crate::metrics::{TRANSPORT_REQUESTS, TRANSPORT_RETRIES};

/// HTTP client bound to one base URL
///
/// Cloning is cheap: the underlying `reqwest::Client` shares its
/// connection pool between clones.
#[derive(Debug, Clone)]
pub struct TransportClient {
    http: reqwest::Client,
    base_url: String,
    default_headers: HeaderMap,
    timeout: Duration,
    retry: RetryPolicy,
    /// Metric label for the remote service ("provider", "sandbox")
    target: &'static str,
}

impl TransportClient {
    /// Create a client for `base_url`
    ///
    /// # Arguments
    /// * `http` - shared connection pool
    /// * `base_url` - prefix for every request path
    /// * `target` - short name of the remote service, used in metrics and logs
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, target: &'static str) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_headers: HeaderMap::new(),
            timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            target,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Headers sent with every request (auth, organization, ...)
    pub fn with_default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Execute one request and decode its body
    ///
    /// JSON responses are parsed; any other content type is returned as
    /// `{"content": <raw text>}`. A 2xx body that cannot be read or parsed
    /// counts as a failed attempt and is retried like a 5xx.
    ///
    /// # Arguments
    /// * `method` - HTTP method
    /// * `path` - path relative to the base URL
    /// * `body` - JSON body, if any
    /// * `headers` - extra headers for this request only
    /// * `timeout` - overrides the client-wide timeout
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: Option<&HeaderMap>,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError> {
        self.execute(method, path, body, headers, timeout, decode_body).await
    }

    /// Execute one request with retries, returning the raw successful response
    ///
    /// Used directly for streaming bodies, which must not be buffered.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: Option<&HeaderMap>,
        timeout: Option<Duration>,
    ) -> Result<Response, TransportError> {
        self.execute(method, path, body, headers, timeout, |response, _| async move { Ok(response) })
            .await
    }

    /// Retry loop shared by [`request`](Self::request) and [`send`](Self::send)
    ///
    /// `finish` turns a successful response into the caller's value. Its
    /// errors are retried.
    async fn execute<T, F, Fut>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: Option<&HeaderMap>,
        timeout: Option<Duration>,
        mut finish: F,
    ) -> Result<T, TransportError>
    where
        F: FnMut(Response, u32) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let url = self.url(path);
        let timeout = timeout.unwrap_or(self.timeout);
        let attempts = self.retry.attempts();
        let mut last_error = None;

        for attempt in 0..attempts {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .timeout(timeout)
                .headers(self.default_headers.clone());
            if let Some(extra) = headers {
                request = request.headers(extra.clone());
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let failure = match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if status < 400 {
                        match finish(response, attempt + 1).await {
                            Ok(value) => {
                                TRANSPORT_REQUESTS.with_label_values(&[self.target, "ok"]).inc();
                                debug!(target_service = self.target, %method, %url, status, attempt, "request succeeded");
                                return Ok(value);
                            }
                            Err(e) => {
                                TRANSPORT_REQUESTS.with_label_values(&[self.target, "decode_error"]).inc();
                                e
                            }
                        }
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        if !RetryPolicy::is_retryable_status(status) {
                            TRANSPORT_REQUESTS.with_label_values(&[self.target, "client_error"]).inc();
                            return Err(TransportError::Status {
                                status,
                                body,
                                attempts: attempt + 1,
                            });
                        }
                        TRANSPORT_REQUESTS.with_label_values(&[self.target, "server_error"]).inc();
                        TransportError::Status {
                            status,
                            body,
                            attempts: attempt + 1,
                        }
                    }
                }
                Err(e) if e.is_builder() => {
                    TRANSPORT_REQUESTS.with_label_values(&[self.target, "invalid_request"]).inc();
                    return Err(TransportError::InvalidRequest(e.to_string()));
                }
                Err(e) => {
                    TRANSPORT_REQUESTS.with_label_values(&[self.target, "connection_error"]).inc();
                    TransportError::Connection {
                        message: e.to_string(),
                        attempts: attempt + 1,
                    }
                }
            };

            if attempt + 1 < attempts {
                let delay = self.retry.delay_for_attempt(attempt);
                warn!(
                    target_service = self.target,
                    %method,
                    %url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "request failed, retrying"
                );
                TRANSPORT_RETRIES.with_label_values(&[self.target]).inc();
                tokio::time::sleep(delay).await;
            }
            last_error = Some(failure);
        }

        Err(last_error.unwrap_or_else(|| TransportError::Connection {
            message: "no attempts made".to_string(),
            attempts: 0,
        }))
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

async fn decode_body(response: Response, attempts: u32) -> Result<Value, TransportError> {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("json"))
        .unwrap_or(false);

    let text = response
        .text()
        .await
        .map_err(|e| TransportError::Decode {
            message: e.to_string(),
            attempts,
        })?;

    if is_json {
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| TransportError::Decode {
            message: e.to_string(),
            attempts,
        })
    } else {
        Ok(json!({ "content": text }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> TransportClient {
        TransportClient::new(reqwest::Client::new(), base, "test")
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let c = client("http://sandbox.local:8000/");
        assert_eq!(c.url("/api/v1/exec"), "http://sandbox.local:8000/api/v1/exec");
        assert_eq!(c.url("health"), "http://sandbox.local:8000/health");
    }

    #[test]
    fn test_absolute_path_is_used_verbatim() {
        let c = client("http://sandbox.local");
        assert_eq!(c.url("https://other.local/x"), "https://other.local/x");
    }

    #[test]
    fn test_builder_overrides() {
        let c = client("http://a")
            .with_timeout(Duration::from_secs(5))
            .with_retry(RetryPolicy::new(7, Duration::from_millis(10)));
        assert_eq!(c.timeout(), Duration::from_secs(5));
        assert_eq!(c.retry_policy().max_retries, 7);
    }
}
