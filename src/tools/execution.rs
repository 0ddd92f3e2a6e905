//! Command execution tools

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use super::ToolGroup;
use crate::sandbox::{ExecOptions, ExecResult, SandboxClient, SandboxError};

/// Added to a remote timeout to get the HTTP timeout, so the sandbox
/// reports its own timeout before the request is cut.
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

fn default_timeout() -> u64 {
    300
}

fn default_working_directory() -> String {
    ".".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    5
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ShellCommandParams {
    #[schemars(description = "The shell command to execute")]
    pub command: String,
    #[serde(default = "default_timeout")]
    #[schemars(description = "Command timeout in seconds (default: 300)")]
    pub timeout: u64,
    #[serde(default = "default_working_directory")]
    #[schemars(description = "Working directory for command execution")]
    pub working_directory: String,
    #[serde(default)]
    #[schemars(description = "Environment variables to set")]
    pub environment: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    #[schemars(description = "Whether to capture stdout/stderr")]
    pub capture_output: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Interpreter {
    Python,
    Python3,
    Bash,
    Sh,
    Node,
    Ruby,
    Perl,
}

impl Interpreter {
    pub fn command(self) -> &'static str {
        match self {
            Interpreter::Python => "python",
            Interpreter::Python3 => "python3",
            Interpreter::Bash => "bash",
            Interpreter::Sh => "sh",
            Interpreter::Node => "node",
            Interpreter::Ruby => "ruby",
            Interpreter::Perl => "perl",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ScriptParams {
    #[schemars(description = "Path to the script file")]
    pub script_path: String,
    #[schemars(description = "Script interpreter (python, bash, node, etc.)")]
    pub interpreter: Interpreter,
    #[serde(default)]
    #[schemars(description = "Command line arguments for the script")]
    pub arguments: Vec<String>,
    #[serde(default = "default_timeout")]
    #[schemars(description = "Script timeout in seconds")]
    pub timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ParallelCommandsParams {
    #[schemars(description = "List of commands to execute in parallel")]
    pub commands: Vec<String>,
    #[serde(default = "default_max_concurrent")]
    #[schemars(description = "Maximum number of concurrent executions")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout")]
    #[schemars(description = "Timeout for each command")]
    pub timeout: u64,
}

pub fn group(sandbox: SandboxClient) -> ToolGroup {
    let shell = sandbox.clone();
    let script = sandbox.clone();
    let parallel = sandbox;

    ToolGroup::new("execution")
        .tool(
            "execute_shell_command",
            "Execute a shell command with advanced options and safety checks.",
            move |params: ShellCommandParams| {
                let sandbox = shell.clone();
                async move { execute_shell_command(&sandbox, params).await }
            },
        )
        .tool(
            "execute_script",
            "Execute a script file with specified interpreter.",
            move |params: ScriptParams| {
                let sandbox = script.clone();
                async move { execute_script(&sandbox, params).await }
            },
        )
        .tool(
            "execute_parallel_commands",
            "Execute multiple commands in parallel.",
            move |params: ParallelCommandsParams| {
                let sandbox = parallel.clone();
                async move { execute_parallel_commands(&sandbox, params).await }
            },
        )
}

/// Run one command in a fresh session that is released on return
pub(crate) async fn run_command(
    sandbox: &SandboxClient,
    command: &str,
    options: ExecOptions,
) -> Result<ExecResult, SandboxError> {
    let timeout = options
        .timeout
        .map(|secs| Duration::from_secs(secs) + REQUEST_TIMEOUT_MARGIN);
    let session = sandbox.acquire().await?;
    session.execute_command(command, options, timeout).await
}

/// `STDOUT`/`STDERR`/`EXIT CODE`/`DURATION` sections, blank-line separated
pub fn format_exec_result(result: &ExecResult) -> String {
    let mut parts = Vec::with_capacity(4);
    if !result.stdout.is_empty() {
        parts.push(format!("STDOUT:\n{}", result.stdout));
    }
    if !result.stderr.is_empty() {
        parts.push(format!("STDERR:\n{}", result.stderr));
    }
    parts.push(format!("EXIT CODE: {}", result.exit_code));
    parts.push(format!("DURATION: {:.2}s", result.metadata.duration));
    parts.join("\n\n")
}

fn format_outcome(outcome: Result<ExecResult, SandboxError>, errored: &str) -> String {
    match outcome {
        Ok(result) => format_exec_result(&result),
        Err(SandboxError::Remote(message)) => format!("Error: {message}"),
        Err(e) => format!("{errored}: {e}"),
    }
}

pub async fn execute_shell_command(sandbox: &SandboxClient, params: ShellCommandParams) -> String {
    let options = ExecOptions {
        timeout: Some(params.timeout),
        working_directory: Some(params.working_directory),
        environment: Some(params.environment),
        capture_output: Some(params.capture_output),
    };
    format_outcome(run_command(sandbox, &params.command, options).await, "Execution failed")
}

pub async fn execute_script(sandbox: &SandboxClient, params: ScriptParams) -> String {
    let mut parts = vec![params.interpreter.command().to_string(), params.script_path];
    parts.extend(params.arguments);
    let command = parts.join(" ");

    format_outcome(
        run_command(sandbox, &command, ExecOptions::with_timeout(params.timeout)).await,
        "Script execution failed",
    )
}

/// Run commands with at most `max_concurrent` in flight
///
/// Results are reported in the order the commands were given. A failing
/// command is reported inline and does not affect the others.
pub async fn execute_parallel_commands(sandbox: &SandboxClient, params: ParallelCommandsParams) -> String {
    if params.commands.is_empty() {
        return "No commands provided".to_string();
    }

    let limit = Arc::new(Semaphore::new(params.max_concurrent.max(1)));
    let timeout = params.timeout;
    let runs = params.commands.iter().map(|command| {
        let limit = Arc::clone(&limit);
        async move {
            let _permit = limit.acquire_owned().await.ok();
            format_outcome(
                run_command(sandbox, command, ExecOptions::with_timeout(timeout)).await,
                "Error",
            )
        }
    });
    let results = join_all(runs).await;

    let separator = "-".repeat(50);
    let mut lines = Vec::with_capacity(results.len() * 3);
    for (i, (command, result)) in params.commands.iter().zip(results).enumerate() {
        lines.push(format!("Command {}: {}", i + 1, command));
        lines.push(result);
        lines.push(separator.clone());
    }
    lines.join("\n")
}
