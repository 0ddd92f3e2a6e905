//! Container tools, registered when `ENABLE_DOCKER` is set

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::execution::run_command;
use super::{or_default, render, render_command, ToolGroup};
use crate::sandbox::{ContainerSummary, ExecOptions, SandboxClient};

const TABLE_HEADER: &str = "CONTAINER ID    IMAGE           STATUS          NAMES";

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct DockerRunParams {
    #[schemars(description = "Docker image to run (e.g., 'ubuntu:latest', 'python:3.9')")]
    pub image: String,
    #[serde(default)]
    #[schemars(description = "Command to execute in container")]
    pub command: Option<String>,
    #[serde(default)]
    #[schemars(description = "Container name")]
    pub name: Option<String>,
    #[serde(default)]
    #[schemars(description = "Run container in background")]
    pub detached: bool,
    #[serde(default)]
    #[schemars(description = "Environment variables")]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    #[schemars(description = "Port mappings (host:container)")]
    pub ports: BTreeMap<String, String>,
    #[serde(default)]
    #[schemars(description = "Volume mappings")]
    pub volumes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ListFormat {
    #[default]
    Table,
    Json,
    Names,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct DockerListParams {
    #[serde(default)]
    #[schemars(description = "Show all containers (default shows just running)")]
    pub all: bool,
    #[serde(default)]
    #[schemars(description = "Output format")]
    pub format: ListFormat,
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_lines() -> u32 {
    50
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct DockerStopParams {
    #[schemars(description = "Container name or ID")]
    pub container: String,
    #[serde(default = "default_stop_timeout")]
    #[schemars(description = "Seconds to wait before killing")]
    pub timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct DockerRemoveParams {
    #[schemars(description = "Container name or ID")]
    pub container: String,
    #[serde(default)]
    #[schemars(description = "Force removal even if running")]
    pub force: bool,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct DockerLogsParams {
    #[schemars(description = "Container name or ID")]
    pub container: String,
    #[serde(default = "default_lines")]
    #[schemars(description = "Number of lines to show")]
    pub lines: u32,
    #[serde(default)]
    #[schemars(description = "Follow log output")]
    pub follow: bool,
}

pub fn group(sandbox: SandboxClient) -> ToolGroup {
    let (run, list, stop, remove, logs) = (
        sandbox.clone(),
        sandbox.clone(),
        sandbox.clone(),
        sandbox.clone(),
        sandbox,
    );

    ToolGroup::new("docker")
        .tool(
            "docker_run",
            "Run a Docker container with specified image and options.",
            move |params: DockerRunParams| {
                let sandbox = run.clone();
                async move { docker_run(&sandbox, params).await }
            },
        )
        .tool("docker_list", "List Docker containers.", move |params: DockerListParams| {
            let sandbox = list.clone();
            async move { docker_list(&sandbox, params).await }
        })
        .tool(
            "docker_stop",
            "Stop a running Docker container.",
            move |params: DockerStopParams| {
                let sandbox = stop.clone();
                async move { docker_stop(&sandbox, params).await }
            },
        )
        .tool(
            "docker_remove",
            "Remove a Docker container.",
            move |params: DockerRemoveParams| {
                let sandbox = remove.clone();
                async move { docker_remove(&sandbox, params).await }
            },
        )
        .tool(
            "docker_logs",
            "Get logs from a Docker container.",
            move |params: DockerLogsParams| {
                let sandbox = logs.clone();
                async move { docker_logs(&sandbox, params).await }
            },
        )
}

pub async fn docker_run(sandbox: &SandboxClient, params: DockerRunParams) -> String {
    let options = json!({
        "command": params.command.clone().unwrap_or_default(),
        "name": params.name.clone().unwrap_or_default(),
        "detached": params.detached,
        "environment": params.environment,
        "ports": params.ports,
        "volumes": params.volumes,
    });
    let outcome = async {
        sandbox
            .acquire()
            .await?
            .docker_run(&params.image, params.command.as_deref(), options)
            .await
    }
    .await;
    render(
        outcome,
        |started| {
            format!(
                "Successfully started container: {}\nImage: {}",
                started.container_id.as_deref().unwrap_or("unknown"),
                params.image
            )
        },
        "Failed to run container",
        "Error running Docker container",
    )
}

pub async fn docker_list(sandbox: &SandboxClient, params: DockerListParams) -> String {
    let outcome = async { sandbox.acquire().await?.docker_list(params.all).await }.await;
    render(
        outcome,
        |listing| format_containers(&listing.containers, params.format),
        "Failed to list containers",
        "Error listing containers",
    )
}

pub async fn docker_stop(sandbox: &SandboxClient, params: DockerStopParams) -> String {
    let command = format!("docker stop -t {} {}", params.timeout, params.container);
    render_command(
        run_command(sandbox, &command, ExecOptions::default()).await,
        |_| format!("Successfully stopped container: {}", params.container),
        "Failed to stop container",
        "Error stopping container",
    )
}

pub async fn docker_remove(sandbox: &SandboxClient, params: DockerRemoveParams) -> String {
    let command = format!(
        "docker rm {}{}",
        if params.force { "-f " } else { "" },
        params.container
    );
    render_command(
        run_command(sandbox, &command, ExecOptions::default()).await,
        |_| format!("Successfully removed container: {}", params.container),
        "Failed to remove container",
        "Error removing container",
    )
}

pub async fn docker_logs(sandbox: &SandboxClient, params: DockerLogsParams) -> String {
    let command = format!(
        "docker logs {}--tail {} {}",
        if params.follow { "--follow " } else { "" },
        params.lines,
        params.container
    );
    let timeout = if params.follow { 300 } else { 30 };
    render_command(
        run_command(sandbox, &command, ExecOptions::with_timeout(timeout)).await,
        |result| {
            format!(
                "Logs for container {}:\n\n{}",
                params.container,
                or_default(&result.stdout, "No logs available")
            )
        },
        "Failed to get logs",
        "Error getting logs",
    )
}

fn format_containers(containers: &[ContainerSummary], format: ListFormat) -> String {
    if containers.is_empty() {
        return "No containers found".to_string();
    }

    match format {
        ListFormat::Json => serde_json::to_string_pretty(containers).unwrap_or_default(),
        ListFormat::Names => {
            let names: Vec<String> = containers
                .iter()
                .map(|c| {
                    let name = or_default(&c.name, or_default(&c.id, "unknown"));
                    format!("- {name}")
                })
                .collect();
            format!("Container names:\n{}", names.join("\n"))
        }
        ListFormat::Table => {
            let mut lines = vec![TABLE_HEADER.to_string()];
            for c in containers {
                lines.push(format!(
                    "{:<12}    {:<15}    {:<15}    {}",
                    truncate(&c.id, 12),
                    truncate(&c.image, 15),
                    truncate(&c.status, 15),
                    c.name
                ));
            }
            lines.join("\n")
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(id: &str, name: &str) -> ContainerSummary {
        ContainerSummary {
            id: id.to_string(),
            image: "python:3.11-slim-bookworm".to_string(),
            status: "Up 2 minutes".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_table_truncates_columns() {
        let out = format_containers(&[container("0123456789abcdef", "web")], ListFormat::Table);
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines[0], TABLE_HEADER);
        assert_eq!(lines[1], "0123456789ab    python:3.11-sli    Up 2 minutes       web");
    }

    #[test]
    fn test_names_fall_back_to_id() {
        let out = format_containers(&[container("abc", "web"), container("def", "")], ListFormat::Names);
        assert_eq!(out, "Container names:\n- web\n- def");
    }

    #[test]
    fn test_empty_listing() {
        assert_eq!(format_containers(&[], ListFormat::Json), "No containers found");
    }

    #[test]
    fn test_json_format_is_pretty() {
        let out = format_containers(&[container("abc", "web")], ListFormat::Json);
        assert!(out.starts_with("[\n  {"));
        assert!(out.contains("\"name\": \"web\""));
    }
}
