//! File operation tools

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::execution::run_command;
use super::{render, render_command, ToolGroup};
use crate::sandbox::{ExecOptions, FileListing, SandboxClient};

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_path() -> String {
    ".".to_string()
}

fn default_pattern() -> String {
    "*".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct WriteFileParams {
    #[schemars(description = "Path to the file to write")]
    pub file_path: String,
    #[schemars(description = "Content to write to the file")]
    pub content: String,
    #[serde(default)]
    #[schemars(description = "Whether to append to existing file")]
    pub append: bool,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ReadFileParams {
    #[schemars(description = "Path to the file to read")]
    pub file_path: String,
    #[serde(default = "default_encoding")]
    #[schemars(description = "File encoding")]
    pub encoding: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ListFilesParams {
    #[serde(default = "default_path")]
    #[schemars(description = "Directory path to list")]
    pub path: String,
    #[serde(default)]
    #[schemars(description = "Whether to list recursively")]
    pub recursive: bool,
    #[serde(default = "default_pattern")]
    #[schemars(description = "Filter pattern (glob style)")]
    pub pattern: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct DeleteFileParams {
    #[schemars(description = "Path to the file or directory to delete")]
    pub file_path: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct CreateDirectoryParams {
    #[schemars(description = "Path of the directory to create")]
    pub path: String,
    #[serde(default = "default_true")]
    #[schemars(description = "Create parent directories if needed")]
    pub parents: bool,
}

pub fn group(sandbox: SandboxClient) -> ToolGroup {
    let (write, read, list, delete, mkdir) = (
        sandbox.clone(),
        sandbox.clone(),
        sandbox.clone(),
        sandbox.clone(),
        sandbox,
    );

    ToolGroup::new("file")
        .tool(
            "write_file",
            "Write content to a file, creating it if it doesn't exist.",
            move |params: WriteFileParams| {
                let sandbox = write.clone();
                async move { write_file(&sandbox, params).await }
            },
        )
        .tool("read_file", "Read the contents of a file.", move |params: ReadFileParams| {
            let sandbox = read.clone();
            async move { read_file(&sandbox, params).await }
        })
        .tool(
            "list_files",
            "List files and directories in a given path.",
            move |params: ListFilesParams| {
                let sandbox = list.clone();
                async move { list_files(&sandbox, params).await }
            },
        )
        .tool(
            "delete_file",
            "Delete a file or empty directory.",
            move |params: DeleteFileParams| {
                let sandbox = delete.clone();
                async move { delete_file(&sandbox, params).await }
            },
        )
        .tool(
            "create_directory",
            "Create a new directory.",
            move |params: CreateDirectoryParams| {
                let sandbox = mkdir.clone();
                async move { create_directory(&sandbox, params).await }
            },
        )
}

pub async fn write_file(sandbox: &SandboxClient, params: WriteFileParams) -> String {
    let outcome = async {
        sandbox
            .acquire()
            .await?
            .write_file(&params.file_path, &params.content, params.append)
            .await
    }
    .await;
    render(
        outcome,
        |_| format!("Successfully wrote to file: {}", params.file_path),
        "Failed to write file",
        "Error writing file",
    )
}

pub async fn read_file(sandbox: &SandboxClient, params: ReadFileParams) -> String {
    let outcome = async {
        sandbox
            .acquire()
            .await?
            .read_file(&params.file_path, &params.encoding)
            .await
    }
    .await;
    render(
        outcome,
        |file| format!("File contents of {}:\n\n{}", params.file_path, file.content),
        "Failed to read file",
        "Error reading file",
    )
}

pub async fn list_files(sandbox: &SandboxClient, params: ListFilesParams) -> String {
    let outcome = async {
        sandbox
            .acquire()
            .await?
            .list_files(&params.path, params.recursive, &params.pattern)
            .await
    }
    .await;
    render(
        outcome,
        |listing| format_listing(&params.path, &listing),
        "Failed to list files",
        "Error listing files",
    )
}

pub async fn delete_file(sandbox: &SandboxClient, params: DeleteFileParams) -> String {
    let outcome = async { sandbox.acquire().await?.delete_file(&params.file_path).await }.await;
    render(
        outcome,
        |_| format!("Successfully deleted: {}", params.file_path),
        "Failed to delete file",
        "Error deleting file",
    )
}

pub async fn create_directory(sandbox: &SandboxClient, params: CreateDirectoryParams) -> String {
    let command = format!("mkdir {}{}", if params.parents { "-p " } else { "" }, params.path);
    render_command(
        run_command(sandbox, &command, ExecOptions::default()).await,
        |_| format!("Successfully created directory: {}", params.path),
        "Failed to create directory",
        "Error creating directory",
    )
}

fn format_listing(path: &str, listing: &FileListing) -> String {
    let names = listing.names();
    if names.is_empty() {
        return format!("No files found in {path}");
    }
    let entries: Vec<String> = names.iter().map(|name| format!("- {name}")).collect();
    format!("Files in {path}:\n{}", entries.join("\n"))
}
