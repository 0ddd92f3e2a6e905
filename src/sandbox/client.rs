//! Sandbox connection pool and scoped sessions

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::{
    decode_envelope, null_as_empty, Ack, ContainerListing, ContainerStarted, ExecMetadata, ExecOptions,
    ExecResult, FileContent, FileListing, NetworkResponse, RawExec, SystemSnapshot,
};
use super::SandboxError;
use crate::config::SandboxConfig;
use crate::health::HealthStatus;
use crate::metrics::SANDBOX_ACTIVE_SESSIONS;
use crate::transport::{RetryPolicy, TransportClient};

/// Statistics about the pool state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions currently acquired
    pub active: usize,
    /// Sessions that can still be acquired without waiting
    pub available: usize,
    pub capacity: usize,
    pub closed: bool,
}

struct ClientInner {
    config: SandboxConfig,
    transport: TransportClient,
    permits: Arc<Semaphore>,
}

/// Pooled client for the sandbox service
#[derive(Clone)]
pub struct SandboxClient {
    inner: Arc<ClientInner>,
}

impl SandboxClient {
    /// Create a client; no connection is opened until a session issues a request
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key.as_deref() {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| SandboxError::Client(e.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_idle_connections)
            .build()
            .map_err(|e| SandboxError::Client(e.to_string()))?;

        let transport = TransportClient::new(http, config.base_url.clone(), "sandbox")
            .with_timeout(config.timeout)
            .with_retry(RetryPolicy::new(config.max_retries, config.retry_delay))
            .with_default_headers(headers);

        let permits = Arc::new(Semaphore::new(config.max_connections.max(1)));

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                permits,
            }),
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.inner.config
    }

    /// Acquire a session, waiting while the pool is at capacity
    ///
    /// # Returns
    /// A session that releases its slot when dropped, or `PoolClosed`
    /// after [`shutdown`](Self::shutdown).
    pub async fn acquire(&self) -> Result<SandboxSession, SandboxError> {
        let start = Instant::now();
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::PoolClosed)?;

        let session = SandboxSession {
            id: Uuid::new_v4(),
            transport: Some(self.inner.transport.clone()),
            health_timeout: self.inner.config.health_timeout,
            permit: Some(permit),
        };
        SANDBOX_ACTIVE_SESSIONS.inc();
        debug!(
            session_id = %session.id,
            wait_ms = start.elapsed().as_secs_f64() * 1000.0,
            "sandbox session acquired"
        );
        Ok(session)
    }

    /// Probe `GET /health` through a short-lived session; never fails
    pub async fn health_check(&self) -> HealthStatus {
        match self.acquire().await {
            Ok(session) => session.health_check().await,
            Err(e) => HealthStatus::unhealthy(e.to_string()),
        }
    }

    pub fn stats(&self) -> PoolStats {
        let capacity = self.inner.config.max_connections.max(1);
        let available = self.inner.permits.available_permits();
        PoolStats {
            active: capacity.saturating_sub(available),
            available,
            capacity,
            closed: self.inner.permits.is_closed(),
        }
    }

    /// Refuse further acquisitions; sessions already held keep working
    pub fn shutdown(&self) {
        self.inner.permits.close();
    }
}

/// Exclusively owned sandbox scope
///
/// Operations fail with [`SandboxError::NotInitialized`] once the session
/// has been released.
pub struct SandboxSession {
    id: Uuid,
    transport: Option<TransportClient>,
    health_timeout: Duration,
    permit: Option<OwnedSemaphorePermit>,
}

impl SandboxSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.transport.is_some()
    }

    /// Give the pool slot back; later calls fail with `NotInitialized`
    pub fn release(&mut self) {
        self.transport = None;
        if self.permit.take().is_some() {
            SANDBOX_ACTIVE_SESSIONS.dec();
            debug!(session_id = %self.id, "sandbox session released");
        }
    }

    fn transport(&self) -> Result<&TransportClient, SandboxError> {
        self.transport.as_ref().ok_or(SandboxError::NotInitialized)
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, SandboxError> {
        let transport = self.transport()?;
        Ok(transport
            .request(method, path, body.as_ref(), None, timeout)
            .await?)
    }

    /// Run a shell command remotely
    ///
    /// This is the trust boundary of the whole system: the command runs
    /// with whatever privileges the sandbox grants.
    ///
    /// # Arguments
    /// * `command` - shell command line
    /// * `options` - timeout, working directory, environment, output capture
    /// * `timeout` - request timeout; defaults to the client-wide value
    pub async fn execute_command(
        &self,
        command: &str,
        options: ExecOptions,
        timeout: Option<Duration>,
    ) -> Result<ExecResult, SandboxError> {
        let start = Instant::now();
        let payload = json!({
            "command": command,
            "guideFollowed": true,
            "options": options,
        });

        let value = self
            .call(Method::POST, "/api/v1/exec", Some(payload), timeout)
            .await
            .map_err(|e| {
                warn!(session_id = %self.id, error = %e, "command execution failed");
                e
            })?;

        let raw: RawExec = serde_json::from_value(null_as_empty(value))
            .map_err(|e| SandboxError::Decode(e.to_string()))?;
        if let Some(error) = raw.error {
            return Err(SandboxError::Remote(error));
        }

        Ok(ExecResult {
            stdout: raw.stdout.unwrap_or_default(),
            stderr: raw.stderr.unwrap_or_default(),
            exit_code: raw.exit_code.or(raw.return_value).unwrap_or(0),
            metadata: ExecMetadata {
                duration: start.elapsed().as_secs_f64(),
                command: command.to_string(),
                timestamp: Utc::now(),
            },
        })
    }

    pub async fn write_file(
        &self,
        file_path: &str,
        content: &str,
        append: bool,
    ) -> Result<Ack, SandboxError> {
        let payload = json!({
            "filePath": file_path,
            "content": content,
            "options": { "append": append },
        });
        let value = self.call(Method::POST, "/api/v1/file/write", Some(payload), None).await?;
        decode_envelope(value)
    }

    pub async fn read_file(&self, file_path: &str, encoding: &str) -> Result<FileContent, SandboxError> {
        let payload = json!({
            "filePath": file_path,
            "options": { "encoding": encoding },
        });
        let value = self.call(Method::POST, "/api/v1/file/read", Some(payload), None).await?;
        decode_envelope(value)
    }

    pub async fn list_files(
        &self,
        path: &str,
        recursive: bool,
        pattern: &str,
    ) -> Result<FileListing, SandboxError> {
        let payload = json!({
            "path": path,
            "options": { "recursive": recursive, "pattern": pattern },
        });
        let value = self.call(Method::POST, "/api/v1/file/list", Some(payload), None).await?;
        decode_envelope(value)
    }

    pub async fn delete_file(&self, file_path: &str) -> Result<Ack, SandboxError> {
        let payload = json!({ "filePath": file_path });
        let value = self.call(Method::DELETE, "/api/v1/file/delete", Some(payload), None).await?;
        decode_envelope(value)
    }

    /// Start a container
    ///
    /// # Arguments
    /// * `image` - image reference
    /// * `command` - command to run in the container, if any
    /// * `options` - name, detached, environment, ports, volumes
    pub async fn docker_run(
        &self,
        image: &str,
        command: Option<&str>,
        options: Value,
    ) -> Result<ContainerStarted, SandboxError> {
        let payload = json!({
            "image": image,
            "command": command,
            "options": options,
        });
        let value = self.call(Method::POST, "/api/v1/docker/run", Some(payload), None).await?;
        decode_envelope(value)
    }

    pub async fn docker_list(&self, all: bool) -> Result<ContainerListing, SandboxError> {
        let path = if all {
            "/api/v1/docker/list?all=true"
        } else {
            "/api/v1/docker/list"
        };
        let value = self.call(Method::GET, path, None, None).await?;
        decode_envelope(value)
    }

    /// Have the sandbox perform an HTTP request on our behalf
    pub async fn network_request(
        &self,
        url: &str,
        method: &str,
        headers: &BTreeMap<String, String>,
        data: Option<&Value>,
        timeout_secs: u64,
    ) -> Result<NetworkResponse, SandboxError> {
        let payload = json!({
            "url": url,
            "method": method,
            "headers": headers,
            "data": data,
            "options": { "timeout": timeout_secs },
        });
        let value = self
            .call(Method::POST, "/api/v1/network/request", Some(payload), None)
            .await?;
        decode_envelope(value)
    }

    pub async fn get_system_info(&self) -> Result<SystemSnapshot, SandboxError> {
        let value = self.call(Method::GET, "/api/v1/system/info", None, None).await?;
        decode_envelope(value)
    }

    pub async fn get_metrics(&self) -> Result<SystemSnapshot, SandboxError> {
        let value = self.call(Method::GET, "/api/v1/system/metrics", None, None).await?;
        decode_envelope(value)
    }

    /// Probe `GET /health` with the short health timeout
    ///
    /// Failures are reported as `unhealthy`, never returned as errors.
    pub async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        match self
            .call(Method::GET, "/health", None, Some(self.health_timeout))
            .await
        {
            Ok(body) => {
                HealthStatus::healthy(start.elapsed().as_secs_f64() * 1000.0).with_details(body)
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "sandbox health check failed");
                HealthStatus::unhealthy(e.to_string())
            }
        }
    }
}

impl Drop for SandboxSession {
    fn drop(&mut self) {
        self.release();
    }
}
