//! Prometheus metrics
//!
//! All metrics live in the default registry and are exposed in text
//! format through [`encode_metrics`].

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, Encoder,
    HistogramVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────────

    /// HTTP attempts, by target service and outcome.
    ///
    /// Labels:
    /// - target: "provider" or "sandbox"
    /// - outcome: "ok", "client_error", "server_error", "decode_error", "connection_error", "invalid_request"
    pub static ref TRANSPORT_REQUESTS: CounterVec = register_counter_vec!(
        "sandbox_chat_transport_requests_total",
        "HTTP request attempts by target and outcome",
        &["target", "outcome"]
    ).expect("failed to register TRANSPORT_REQUESTS metric");

    /// Retries scheduled after a retryable failure.
    pub static ref TRANSPORT_RETRIES: CounterVec = register_counter_vec!(
        "sandbox_chat_transport_retries_total",
        "HTTP retries scheduled by target",
        &["target"]
    ).expect("failed to register TRANSPORT_RETRIES metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Completions
    // ─────────────────────────────────────────────────────────────────────────────

    /// Wall time of one completion call (streaming calls measure time to first byte).
    pub static ref COMPLETION_DURATION: HistogramVec = register_histogram_vec!(
        "sandbox_chat_completion_duration_seconds",
        "Completion request latency",
        &["model", "mode"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    ).expect("failed to register COMPLETION_DURATION metric");

    /// Prompt and completion tokens reported by the provider.
    pub static ref COMPLETION_TOKENS: CounterVec = register_counter_vec!(
        "sandbox_chat_completion_tokens_total",
        "Tokens consumed by kind",
        &["model", "kind"]
    ).expect("failed to register COMPLETION_TOKENS metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Tools & conversation
    // ─────────────────────────────────────────────────────────────────────────────

    /// Tool dispatches by tool and outcome.
    ///
    /// - outcome: "ok", "failed" (the handler rendered an error), "unknown_tool", "malformed_arguments"
    pub static ref TOOL_CALLS: CounterVec = register_counter_vec!(
        "sandbox_chat_tool_calls_total",
        "Tool dispatches by tool name and outcome",
        &["tool", "outcome"]
    ).expect("failed to register TOOL_CALLS metric");

    pub static ref TOOL_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "sandbox_chat_tool_call_duration_seconds",
        "Tool handler latency",
        &["tool"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 300.0]
    ).expect("failed to register TOOL_CALL_DURATION metric");

    /// Conversation turns by outcome ("answered", "error", "rate_limited").
    pub static ref CONVERSATION_TURNS: CounterVec = register_counter_vec!(
        "sandbox_chat_conversation_turns_total",
        "Conversation turns by outcome",
        &["mode", "outcome"]
    ).expect("failed to register CONVERSATION_TURNS metric");

    /// Sandbox sessions currently acquired.
    pub static ref SANDBOX_ACTIVE_SESSIONS: IntGauge = register_int_gauge!(
        "sandbox_chat_sandbox_active_sessions",
        "Sandbox sessions currently acquired"
    ).expect("failed to register SANDBOX_ACTIVE_SESSIONS metric");
}

/// Render every registered metric in the Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_touched_metrics() {
        TOOL_CALLS.with_label_values(&["metrics_encode_check", "ok"]).inc();
        let text = encode_metrics().unwrap();
        assert!(text.contains("sandbox_chat_tool_calls_total"));
        assert!(text.contains("metrics_encode_check"));
    }
}
