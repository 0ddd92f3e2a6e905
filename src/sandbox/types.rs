//! Request options and response shapes of the sandbox API
//!
//! The service wraps every payload in an envelope with an optional
//! `success` flag and `error` message. No payload type unifies across
//! operations, so each operation decodes its own shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::SandboxError;

/// Options for `POST /api/v1/exec`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecOptions {
    /// Remote execution timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_output: Option<bool>,
}

impl ExecOptions {
    pub fn with_timeout(timeout_secs: u64) -> Self {
        Self {
            timeout: Some(timeout_secs),
            ..Self::default()
        }
    }
}

/// Timing attached by the client to every command result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecMetadata {
    /// Round-trip duration in seconds
    pub duration: f64,
    pub command: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of a remote command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub metadata: ExecMetadata,
}

impl ExecResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Wire form of an exec response; `return_value` is an older name for `exit_code`
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawExec {
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub return_value: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Acknowledgement of a write or delete
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FileContent {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub encoding: Option<String>,
}

/// Directory listing; entries are file names or objects with a `name`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FileListing {
    #[serde(default)]
    pub files: Vec<Value>,
}

impl FileListing {
    pub fn names(&self) -> Vec<String> {
        self.files.iter().map(display_entry).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContainerStarted {
    #[serde(default)]
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSummary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContainerListing {
    #[serde(default)]
    pub containers: Vec<ContainerSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HttpResponseData {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub headers: Map<String, Value>,
    #[serde(default)]
    pub body: Value,
}

impl HttpResponseData {
    /// Body as text; JSON bodies are re-serialized
    pub fn body_text(&self) -> String {
        match &self.body {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NetworkResponse {
    #[serde(default)]
    pub data: HttpResponseData,
}

/// Free-form key/value report from `system/info` or `system/metrics`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SystemSnapshot {
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// The `success`/`error` discriminant around every payload
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(flatten)]
    payload: T,
}

/// An empty JSON body decodes as `null`; treat it as an object with no fields
pub(crate) fn null_as_empty(value: Value) -> Value {
    match value {
        Value::Null => Value::Object(Map::new()),
        other => other,
    }
}

/// Decode `value` as `T`, failing with `Remote` when the sandbox reported an error
pub(crate) fn decode_envelope<T: DeserializeOwned>(value: Value) -> Result<T, SandboxError> {
    let envelope: Envelope<T> = serde_json::from_value(null_as_empty(value))
        .map_err(|e| SandboxError::Decode(e.to_string()))?;

    if let Some(error) = envelope.error.filter(|e| !e.is_null()) {
        return Err(SandboxError::Remote(display_entry(&error)));
    }
    if envelope.success == Some(false) {
        return Err(SandboxError::Remote("Unknown error".to_string()));
    }
    Ok(envelope.payload)
}

fn display_entry(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(fields) => fields
            .get("name")
            .or_else(|| fields.get("path"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        other => other.to_string(),
    }
}
