//! System information tools

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::execution::run_command;
use super::{or_default, render, render_command, ToolGroup};
use crate::sandbox::{ExecOptions, SandboxClient, SandboxError};

/// Parameters of tools that take none
#[derive(Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct NoParams {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProcessSort {
    #[default]
    Cpu,
    Memory,
    Pid,
    Name,
}

impl ProcessSort {
    fn ps_flag(self) -> &'static str {
        match self {
            ProcessSort::Cpu => "--sort=-%cpu",
            ProcessSort::Memory => "--sort=-%mem",
            ProcessSort::Pid => "--sort=pid",
            ProcessSort::Name => "--sort=comm",
        }
    }

    fn label(self) -> &'static str {
        match self {
            ProcessSort::Cpu => "cpu",
            ProcessSort::Memory => "memory",
            ProcessSort::Pid => "pid",
            ProcessSort::Name => "name",
        }
    }
}

fn default_limit() -> u32 {
    20
}

fn default_hosts() -> Vec<String> {
    ["8.8.8.8", "1.1.1.1", "google.com"].map(String::from).to_vec()
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ProcessListParams {
    #[serde(default)]
    #[schemars(description = "Sort processes by")]
    pub sort_by: ProcessSort,
    #[serde(default = "default_limit")]
    #[schemars(description = "Number of processes to return")]
    pub limit: u32,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ConnectivityParams {
    #[serde(default = "default_hosts")]
    #[schemars(description = "List of hosts to ping")]
    pub hosts: Vec<String>,
}

pub fn group(sandbox: SandboxClient) -> ToolGroup {
    let (info, metrics, processes, disk, connectivity) = (
        sandbox.clone(),
        sandbox.clone(),
        sandbox.clone(),
        sandbox.clone(),
        sandbox,
    );

    ToolGroup::new("system")
        .tool(
            "get_system_info",
            "Get comprehensive system information.",
            move |_: NoParams| {
                let sandbox = info.clone();
                async move { get_system_info(&sandbox).await }
            },
        )
        .tool(
            "get_system_metrics",
            "Get current resource usage metrics of the sandbox.",
            move |_: NoParams| {
                let sandbox = metrics.clone();
                async move { get_system_metrics(&sandbox).await }
            },
        )
        .tool(
            "get_process_list",
            "Get list of running processes with details.",
            move |params: ProcessListParams| {
                let sandbox = processes.clone();
                async move { get_process_list(&sandbox, params).await }
            },
        )
        .tool(
            "check_disk_usage",
            "Check disk usage for all mounted filesystems.",
            move |_: NoParams| {
                let sandbox = disk.clone();
                async move { check_disk_usage(&sandbox).await }
            },
        )
        .tool(
            "check_network_connectivity",
            "Test network connectivity to common services.",
            move |params: ConnectivityParams| {
                let sandbox = connectivity.clone();
                async move { check_network_connectivity(&sandbox, params).await }
            },
        )
}

pub async fn get_system_info(sandbox: &SandboxClient) -> String {
    let outcome = async { sandbox.acquire().await?.get_system_info().await }.await;
    render(
        outcome,
        |snapshot| format_snapshot("System Information:", &snapshot.data),
        "Failed to get system info",
        "Error getting system info",
    )
}

pub async fn get_system_metrics(sandbox: &SandboxClient) -> String {
    let outcome = async { sandbox.acquire().await?.get_metrics().await }.await;
    render(
        outcome,
        |snapshot| format_snapshot("System Metrics:", &snapshot.data),
        "Failed to get system metrics",
        "Error getting system metrics",
    )
}

pub async fn get_process_list(sandbox: &SandboxClient, params: ProcessListParams) -> String {
    let command = format!(
        "ps aux {} | head -n {}",
        params.sort_by.ps_flag(),
        params.limit.saturating_add(1)
    );
    render_command(
        run_command(sandbox, &command, ExecOptions::default()).await,
        |result| {
            format!(
                "Top {} processes by {}:\n\n{}",
                params.limit,
                params.sort_by.label(),
                or_default(&result.stdout, "No output")
            )
        },
        "Failed to get process list",
        "Error getting process list",
    )
}

pub async fn check_disk_usage(sandbox: &SandboxClient) -> String {
    render_command(
        run_command(sandbox, "df -h", ExecOptions::default()).await,
        |result| format!("Disk Usage:\n\n{}", or_default(&result.stdout, "No output")),
        "Failed to check disk usage",
        "Error checking disk usage",
    )
}

/// Ping each host once; a host is reachable when `ping` exits with 0
pub async fn check_network_connectivity(sandbox: &SandboxClient, params: ConnectivityParams) -> String {
    let session = match sandbox.acquire().await {
        Ok(session) => session,
        Err(e) => return format!("Error checking network: {e}"),
    };

    let mut lines = vec!["Network Connectivity Test:".to_string()];
    for host in &params.hosts {
        let command = format!("ping -c 1 -W 2 {host}");
        match session.execute_command(&command, ExecOptions::default(), None).await {
            Ok(result) if result.succeeded() => lines.push(format!("✓ {host}: Reachable")),
            Ok(_) | Err(SandboxError::Remote(_)) => {
                lines.push(format!("✗ {host}: Unreachable"))
            }
            Err(e) => return format!("Error checking network: {e}"),
        }
    }
    lines.join("\n")
}

/// Titled `key: value` report; nested objects become indented sections
fn format_snapshot(title: &str, data: &Map<String, Value>) -> String {
    let mut lines = vec![title.to_string(), "-".repeat(40)];
    for (key, value) in data {
        match value {
            Value::Object(fields) => {
                lines.push(format!("\n{}:", key.to_uppercase()));
                for (sub_key, sub_value) in fields {
                    lines.push(format!("  {sub_key}: {}", display_value(sub_value)));
                }
            }
            other => lines.push(format!("{key}: {}", display_value(other))),
        }
    }
    lines.join("\n")
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
