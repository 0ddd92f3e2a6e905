//! Health report shared by the sandbox and completion clients
//!
//! Health probes never fail: every error is folded into an
//! `unhealthy` report carrying the error message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Outcome of a health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Round-trip time of the probe in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    /// Extra fields reported by the remote side
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl HealthStatus {
    pub fn healthy(response_time_ms: f64) -> Self {
        Self {
            status: HealthState::Healthy,
            error: None,
            response_time_ms: Some(response_time_ms),
            details: Map::new(),
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            status: HealthState::Unhealthy,
            error: Some(error.into()),
            response_time_ms: None,
            details: Map::new(),
        }
    }

    /// Merge the fields of a remote JSON object into `details`
    ///
    /// A remote `status` string other than `healthy` or `ok` turns the
    /// report unhealthy, taking the remote `error` when one is given.
    /// Other keys owned by the report itself are not overwritten.
    pub fn with_details(mut self, remote: Value) -> Self {
        let Value::Object(fields) = remote else {
            return self;
        };
        if let Some(Value::String(status)) = fields.get("status") {
            if !is_healthy_label(status) {
                self.status = HealthState::Unhealthy;
                let reason = match fields.get("error") {
                    Some(Value::String(error)) => error.clone(),
                    _ => format!("remote status: {status}"),
                };
                self.error.get_or_insert(reason);
            }
        }
        for (key, value) in fields {
            if !matches!(key.as_str(), "status" | "error" | "response_time_ms") {
                self.details.insert(key, value);
            }
        }
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

fn is_healthy_label(status: &str) -> bool {
    status.eq_ignore_ascii_case("healthy") || status.eq_ignore_ascii_case("ok")
}
