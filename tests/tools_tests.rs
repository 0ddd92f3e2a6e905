//! Integration tests for tool dispatch against a mocked sandbox

use std::time::{Duration, Instant};

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sandbox_chat::completion::{Role, ToolCall};
use sandbox_chat::config::{FeatureFlags, SandboxConfig};
use sandbox_chat::sandbox::SandboxClient;
use sandbox_chat::{default_registry, ToolRegistry};

fn registry(base_url: &str) -> ToolRegistry {
    let sandbox = SandboxClient::new(SandboxConfig {
        base_url: base_url.to_string(),
        retry_delay: Duration::from_millis(1),
        ..SandboxConfig::default()
    })
    .unwrap();
    default_registry(&sandbox, &FeatureFlags::default()).unwrap()
}

fn exec_reply(stdout: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"stdout": stdout, "stderr": "", "exit_code": 0}))
}

/// Unknown tools answer with a tool message instead of failing the round
#[tokio::test]
async fn test_unknown_tool_becomes_tool_message() {
    let server = MockServer::start().await;
    let registry = registry(&server.uri());

    let call = ToolCall::new("call_1", "format_disk", "{}");
    let message = registry.respond(&call).await;

    assert_eq!(message.role, Role::Tool);
    assert_eq!(message.tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(message.text(), "Tool function 'format_disk' not found");
}

/// Parallel results are reported in input order even when the first finishes last
///
/// Run one after the other the two delays add up to 600ms. Finishing well
/// under that means both ran at once, so "fast" completed before "slow".
#[tokio::test]
async fn test_parallel_commands_keep_input_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/exec"))
        .and(body_partial_json(json!({"command": "slow"})))
        .respond_with(exec_reply("A").set_delay(Duration::from_millis(400)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/exec"))
        .and(body_partial_json(json!({"command": "fast"})))
        .respond_with(exec_reply("B").set_delay(Duration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let registry = registry(&server.uri());
    let started = Instant::now();
    let output = registry
        .dispatch(
            "execute_parallel_commands",
            json!({"commands": ["slow", "fast"], "max_concurrent": 2}),
        )
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(400), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(580), "commands ran sequentially: {elapsed:?}");

    let first = output.find("Command 1: slow").unwrap();
    let second = output.find("Command 2: fast").unwrap();
    assert!(first < second);
    assert!(output.find("STDOUT:\nA").unwrap() < output.find("STDOUT:\nB").unwrap());
    assert_eq!(output.matches(&"-".repeat(50)).count(), 2);
}

/// A sandbox failure is rendered as text for the model
#[tokio::test]
async fn test_transport_failure_is_rendered_as_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/exec"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let output = registry(&server.uri())
        .dispatch("execute_shell_command", json!({"command": "uptime"}))
        .await
        .unwrap();

    assert!(output.starts_with("Execution failed: HTTP 500"), "{output}");
}

/// An `error` field from the sandbox is shown as `Error: ...`
#[tokio::test]
async fn test_remote_error_is_rendered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/exec"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "permission denied"})))
        .mount(&server)
        .await;

    let output = registry(&server.uri())
        .dispatch("execute_shell_command", json!({"command": "cat /etc/shadow"}))
        .await
        .unwrap();

    assert_eq!(output, "Error: permission denied");
}

/// Arguments that do not fit the tool's parameters are reported to the model
#[tokio::test]
async fn test_malformed_arguments_are_reported() {
    let server = MockServer::start().await;
    let registry = registry(&server.uri());

    let call = ToolCall::new("call_9", "execute_shell_command", r#"{"command": 42}"#);
    let message = registry.respond(&call).await;

    assert!(message.text().starts_with("Tool execution failed: invalid arguments for execute_shell_command"));
}

/// Every group is registered when all features are enabled
#[test]
fn test_default_registry_exposes_all_groups() {
    let registry = registry("http://127.0.0.1:1");
    for name in [
        "execute_shell_command",
        "read_file",
        "get_system_info",
        "docker_run",
        "http_request",
        "execute_sql",
    ] {
        assert!(registry.contains(name), "missing {name}");
    }

    let none = FeatureFlags {
        docker: false,
        network: false,
        database: false,
        ..FeatureFlags::default()
    };
    let sandbox = SandboxClient::new(SandboxConfig::default()).unwrap();
    let minimal = default_registry(&sandbox, &none).unwrap();
    assert!(!minimal.contains("docker_run"));
    assert!(minimal.len() < registry.len());
}
