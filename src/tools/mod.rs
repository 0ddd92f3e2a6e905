//! Tool registry
//!
//! Tools are registered at startup as an explicit name → handler table.
//! Each tool has a typed parameter struct: its JSON schema is what the
//! provider sees, and it is also the decoder applied to the model's
//! arguments before the handler runs.
//!
//! ```text
//! ToolCall { name, arguments: "{...}" }
//!        │
//!        ▼
//! ToolRegistry::dispatch ── lookup miss ──► UnknownTool
//!        │
//!        ├── decode into params ── mismatch ──► MalformedArguments
//!        ▼
//! handler(params) ──► sandbox session ──► String (success or failure text)
//! ```
//!
//! Handlers never fail: remote errors are rendered into their output.

pub mod database;
pub mod docker;
pub mod execution;
pub mod file;
pub mod network;
pub mod schema;
pub mod system;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

use crate::completion::{Message, ToolCall, ToolDefinition};
use crate::config::FeatureFlags;
use crate::metrics::{TOOL_CALLS, TOOL_CALL_DURATION};
use crate::sandbox::{ExecResult, SandboxClient, SandboxError};

/// Future returned by a type-erased handler
pub type ToolFuture = Pin<Box<dyn Future<Output = String> + Send>>;

type Handler = Arc<dyn Fn(Value) -> Result<ToolFuture, ToolError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("Tool function '{0}' not found")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {reason}")]
    MalformedArguments { tool: String, reason: String },
    #[error("tool '{0}' is registered more than once")]
    DuplicateTool(String),
}

impl ToolError {
    /// Text placed in the tool message when dispatch fails
    pub fn to_tool_output(&self) -> String {
        match self {
            ToolError::UnknownTool(_) => self.to_string(),
            other => format!("Tool execution failed: {other}"),
        }
    }
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Handler,
}

/// A named capability group, built with [`ToolGroup::tool`]
pub struct ToolGroup {
    name: &'static str,
    tools: Vec<RegisteredTool>,
}

impl ToolGroup {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            tools: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a tool whose parameters decode into `P`
    ///
    /// # Arguments
    /// * `name` - exact, case-sensitive name the model must use
    /// * `description` - shown to the model
    /// * `handler` - async function from decoded parameters to output text
    pub fn tool<P, F, Fut>(mut self, name: &str, description: &str, handler: F) -> Self
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        let tool_name = name.to_string();
        let erased: Handler = Arc::new(move |arguments: Value| {
            let params: P = serde_json::from_value(arguments).map_err(|e| {
                ToolError::MalformedArguments {
                    tool: tool_name.clone(),
                    reason: e.to_string(),
                }
            })?;
            Ok(Box::pin(handler(params)) as ToolFuture)
        });

        self.tools.push(RegisteredTool {
            definition: ToolDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters: schema::parameters_schema::<P>(),
            },
            handler: erased,
        });
        self
    }
}

/// Every invocable tool, in registration order
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Build a registry from groups; a name registered twice is an error
    pub fn new(groups: Vec<ToolGroup>) -> Result<Self, ToolError> {
        let mut tools = Vec::new();
        let mut index = HashMap::new();

        for group in groups {
            debug!(group = group.name, tools = group.tools.len(), "registering tool group");
            for tool in group.tools {
                let name = tool.definition.name.clone();
                if index.insert(name.clone(), tools.len()).is_some() {
                    return Err(ToolError::DuplicateTool(name));
                }
                tools.push(tool);
            }
        }

        Ok(Self { tools, index })
    }

    /// Schemas of every tool, in registration order
    pub fn list_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.definition.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke the tool named `name` with JSON `arguments`
    ///
    /// A `null` argument value is treated as an empty object.
    pub async fn dispatch(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        let Some(&position) = self.index.get(name) else {
            TOOL_CALLS.with_label_values(&["unknown", "unknown_tool"]).inc();
            return Err(ToolError::UnknownTool(name.to_string()));
        };
        let tool = &self.tools[position];

        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let future = (tool.handler)(arguments).map_err(|e| {
            TOOL_CALLS.with_label_values(&[name, "malformed_arguments"]).inc();
            e
        })?;

        let start = Instant::now();
        let output = future
            .instrument(info_span!("tool_call", tool = %name, otel.name = "tool_call"))
            .await;
        let elapsed = start.elapsed().as_secs_f64();

        TOOL_CALLS.with_label_values(&[name, outcome_label(&output)]).inc();
        TOOL_CALL_DURATION.with_label_values(&[name]).observe(elapsed);
        debug!(tool = %name, duration_ms = elapsed * 1000.0, output_len = output.len(), "tool finished");
        Ok(output)
    }

    /// Parse a model-issued call's JSON arguments and dispatch it
    pub async fn dispatch_call(&self, call: &ToolCall) -> Result<String, ToolError> {
        let raw = call.function.arguments.trim();
        let arguments = if raw.is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(raw).map_err(|e| ToolError::MalformedArguments {
                tool: call.name().to_string(),
                reason: e.to_string(),
            })?
        };
        self.dispatch(call.name(), arguments).await
    }

    /// Dispatch a call and wrap the outcome in a tool message; never fails
    pub async fn respond(&self, call: &ToolCall) -> Message {
        let content = match self.dispatch_call(call).await {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %call.name(), call_id = %call.id, error = %e, "tool dispatch failed");
                e.to_tool_output()
            }
        };
        Message::tool(call.id.clone(), call.name(), content)
    }
}

/// Registry with every group enabled by `features`
///
/// Execution, file and system tools are always present; docker,
/// network and database tools follow their flags.
pub fn default_registry(sandbox: &SandboxClient, features: &FeatureFlags) -> Result<ToolRegistry, ToolError> {
    let mut groups = vec![
        execution::group(sandbox.clone()),
        file::group(sandbox.clone()),
        system::group(sandbox.clone()),
    ];
    if features.docker {
        groups.push(docker::group(sandbox.clone()));
    }
    if features.network {
        groups.push(network::group(sandbox.clone()));
    }
    if features.database {
        groups.push(database::group(sandbox.clone()));
    }
    ToolRegistry::new(groups)
}

/// Render a typed sandbox outcome
///
/// `failed` prefixes errors reported by the sandbox, `errored` prefixes
/// transport and client failures.
pub(crate) fn render<T>(
    outcome: Result<T, SandboxError>,
    ok: impl FnOnce(T) -> String,
    failed: &str,
    errored: &str,
) -> String {
    match outcome {
        Ok(value) => ok(value),
        Err(SandboxError::Remote(message)) => format!("{failed}: {message}"),
        Err(e) => format!("{errored}: {e}"),
    }
}

/// Render a command outcome; a non-zero exit code reports stderr
pub(crate) fn render_command(
    outcome: Result<ExecResult, SandboxError>,
    ok: impl FnOnce(&ExecResult) -> String,
    failed: &str,
    errored: &str,
) -> String {
    match outcome {
        Ok(result) if result.succeeded() => ok(&result),
        Ok(result) => format!("{failed}: {}", or_default(&result.stderr, "Unknown error")),
        Err(SandboxError::Remote(message)) => format!("{failed}: {message}"),
        Err(e) => format!("{errored}: {e}"),
    }
}

/// Metric outcome for a handler's output
///
/// Handlers render failures as `"<what> failed: ..."` or `"Error ...: ..."`,
/// so the text before the first colon tells the two apart.
pub(crate) fn outcome_label(output: &str) -> &'static str {
    let lead = output.lines().next().unwrap_or_default();
    let lead = lead.split_once(':').map(|(head, _)| head).unwrap_or(lead);
    if lead.starts_with("Error") || lead.ends_with("failed") || lead.starts_with("Failed") {
        "failed"
    } else {
        "ok"
    }
}

pub(crate) fn or_default<'a>(text: &'a str, fallback: &'a str) -> &'a str {
    if text.trim().is_empty() {
        fallback
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Deserialize, Serialize, JsonSchema)]
    struct EchoParams {
        text: String,
        #[serde(default)]
        shout: bool,
    }

    fn echo_group() -> ToolGroup {
        ToolGroup::new("echo").tool("echo", "Echo text back", |p: EchoParams| async move {
            if p.shout {
                p.text.to_uppercase()
            } else {
                p.text
            }
        })
    }

    #[tokio::test]
    async fn test_dispatch_decodes_typed_params() {
        let registry = ToolRegistry::new(vec![echo_group()]).unwrap();
        let out = registry
            .dispatch("echo", serde_json::json!({"text": "hi", "shout": true}))
            .await
            .unwrap();
        assert_eq!(out, "HI");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_a_lookup_miss() {
        let registry = ToolRegistry::new(vec![echo_group()]).unwrap();
        let err = registry.dispatch("does_not_exist", Value::Null).await.unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("does_not_exist".to_string()));
        assert!(err.to_tool_output().contains("not found"));
    }

    #[tokio::test]
    async fn test_lookup_is_case_sensitive() {
        let registry = ToolRegistry::new(vec![echo_group()]).unwrap();
        assert!(registry.dispatch("Echo", serde_json::json!({"text": "x"})).await.is_err());
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_malformed() {
        let registry = ToolRegistry::new(vec![echo_group()]).unwrap();
        let err = registry
            .dispatch("echo", serde_json::json!({"text": 42}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::MalformedArguments { ref tool, .. } if tool == "echo"));
    }

    #[tokio::test]
    async fn test_invalid_json_arguments_become_tool_message() {
        let registry = ToolRegistry::new(vec![echo_group()]).unwrap();
        let call = ToolCall::new("call_7", "echo", "{not json");
        let message = registry.respond(&call).await;

        assert_eq!(message.tool_call_id.as_deref(), Some("call_7"));
        assert!(message.text().starts_with("Tool execution failed: invalid arguments for echo"));
    }

    #[tokio::test]
    async fn test_empty_arguments_mean_empty_object() {
        let group = ToolGroup::new("g").tool("flag", "", |p: EchoParams| async move { p.text });
        let registry = ToolRegistry::new(vec![group]).unwrap();
        let message = registry.respond(&ToolCall::new("c", "flag", "")).await;
        assert!(message.text().contains("missing field `text`"));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let result = ToolRegistry::new(vec![echo_group(), echo_group()]);
        assert!(matches!(result, Err(ToolError::DuplicateTool(ref n)) if n == "echo"));
    }

    #[test]
    fn test_definitions_keep_registration_order() {
        let group = ToolGroup::new("g")
            .tool("b_tool", "", |p: EchoParams| async move { p.text })
            .tool("a_tool", "", |p: EchoParams| async move { p.text });
        let registry = ToolRegistry::new(vec![group, echo_group()]).unwrap();

        let names: Vec<_> = registry.list_definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["b_tool", "a_tool", "echo"]);
        assert_eq!(registry.len(), 3);
    }

    /// Rendered failures are counted apart from successful outputs
    #[tokio::test]
    async fn test_failure_output_is_counted_as_failed() {
        let group = ToolGroup::new("g").tool("flaky_write", "", |p: EchoParams| async move {
            format!("Failed to write file: {}", p.text)
        });
        let registry = ToolRegistry::new(vec![group]).unwrap();
        let failed = TOOL_CALLS.with_label_values(&["flaky_write", "failed"]);
        let ok = TOOL_CALLS.with_label_values(&["flaky_write", "ok"]);
        let (failed_before, ok_before) = (failed.get(), ok.get());

        let out = registry
            .dispatch("flaky_write", serde_json::json!({"text": "disk full"}))
            .await
            .unwrap();
        assert_eq!(out, "Failed to write file: disk full");
        assert_eq!(failed.get(), failed_before + 1.0);
        assert_eq!(ok.get(), ok_before);
    }

    #[test]
    fn test_outcome_label_reads_leading_phrase() {
        assert_eq!(outcome_label("Error: command denied"), "failed");
        assert_eq!(outcome_label("Error executing command: HTTP 500"), "failed");
        assert_eq!(outcome_label("Query failed: syntax error"), "failed");
        assert_eq!(outcome_label("Failed to stop container: gone"), "failed");
        assert_eq!(outcome_label("Successfully started container: abc\nImage: nginx"), "ok");
        assert_eq!(outcome_label("Command 1: ls\nError: denied"), "ok");
        assert_eq!(outcome_label(""), "ok");
    }

    #[test]
    fn test_render_prefixes() {
        let remote: Result<(), _> = Err(SandboxError::Remote("disk full".to_string()));
        assert_eq!(render(remote, |_| String::new(), "Failed to write file", "Error writing file"), "Failed to write file: disk full");

        let closed: Result<(), _> = Err(SandboxError::PoolClosed);
        assert_eq!(
            render(closed, |_| String::new(), "Failed", "Error writing file"),
            "Error writing file: sandbox connection pool is closed"
        );
    }
}
