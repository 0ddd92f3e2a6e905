//! Network tools, registered when `ENABLE_NETWORK` is set

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::execution::run_command;
use super::{render, render_command, ToolGroup};
use crate::sandbox::{ExecOptions, NetworkResponse, SandboxClient, SandboxError};

/// Longest response body excerpt returned to the model, in characters
const BODY_EXCERPT_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub enum RecordType {
    #[default]
    A,
    #[serde(rename = "AAAA")]
    Aaaa,
    #[serde(rename = "MX")]
    Mx,
    #[serde(rename = "TXT")]
    Txt,
    #[serde(rename = "NS")]
    Ns,
    #[serde(rename = "CNAME")]
    Cname,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Mx => "MX",
            RecordType::Txt => "TXT",
            RecordType::Ns => "NS",
            RecordType::Cname => "CNAME",
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

fn default_download_timeout() -> u64 {
    300
}

fn default_port_timeout() -> u64 {
    5
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct HttpRequestParams {
    #[schemars(description = "URL to request")]
    pub url: String,
    #[serde(default)]
    #[schemars(description = "HTTP method")]
    pub method: HttpMethod,
    #[serde(default)]
    #[schemars(description = "Request headers")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    #[schemars(with = "Option<BTreeMap<String, Value>>", description = "Request body data")]
    pub data: Option<Value>,
    #[serde(default = "default_request_timeout")]
    #[schemars(description = "Request timeout in seconds")]
    pub timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct DownloadParams {
    #[schemars(description = "URL to download from")]
    pub url: String,
    #[schemars(description = "Path to save the downloaded file")]
    pub output_path: String,
    #[serde(default = "default_download_timeout")]
    #[schemars(description = "Download timeout in seconds")]
    pub timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct CheckPortParams {
    #[schemars(description = "Hostname or IP address")]
    pub host: String,
    #[schemars(description = "Port number to check")]
    pub port: u16,
    #[serde(default = "default_port_timeout")]
    #[schemars(description = "Connection timeout in seconds")]
    pub timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct DnsLookupParams {
    #[schemars(description = "Domain name to lookup")]
    pub domain: String,
    #[serde(default)]
    #[schemars(description = "DNS record type")]
    pub record_type: RecordType,
}

pub fn group(sandbox: SandboxClient) -> ToolGroup {
    let (request, download, port, dns) = (sandbox.clone(), sandbox.clone(), sandbox.clone(), sandbox);

    ToolGroup::new("network")
        .tool("http_request", "Make an HTTP request to a URL.", move |params: HttpRequestParams| {
            let sandbox = request.clone();
            async move { http_request(&sandbox, params).await }
        })
        .tool("download_file", "Download a file from a URL.", move |params: DownloadParams| {
            let sandbox = download.clone();
            async move { download_file(&sandbox, params).await }
        })
        .tool("check_port", "Check if a port is open on a host.", move |params: CheckPortParams| {
            let sandbox = port.clone();
            async move { check_port(&sandbox, params).await }
        })
        .tool("dns_lookup", "Perform DNS lookup for a domain.", move |params: DnsLookupParams| {
            let sandbox = dns.clone();
            async move { dns_lookup(&sandbox, params).await }
        })
}

pub async fn http_request(sandbox: &SandboxClient, params: HttpRequestParams) -> String {
    let method = params.method.as_str();
    let outcome = async {
        sandbox
            .acquire()
            .await?
            .network_request(&params.url, method, &params.headers, params.data.as_ref(), params.timeout)
            .await
    }
    .await;
    render(
        outcome,
        |response| format_response(method, &params.url, &response),
        "Request failed",
        "Error making HTTP request",
    )
}

pub async fn download_file(sandbox: &SandboxClient, params: DownloadParams) -> String {
    let command = format!(
        "curl -L -o {} --max-time {} {}",
        params.output_path, params.timeout, params.url
    );
    render_command(
        run_command(sandbox, &command, ExecOptions::with_timeout(params.timeout + 10)).await,
        |_| format!("Successfully downloaded file to: {}", params.output_path),
        "Download failed",
        "Error downloading file",
    )
}

/// Probe a TCP port with `nc -z`; any non-zero exit means closed
pub async fn check_port(sandbox: &SandboxClient, params: CheckPortParams) -> String {
    let command = format!("timeout {} nc -zv {} {}", params.timeout, params.host, params.port);
    match run_command(sandbox, &command, ExecOptions::with_timeout(params.timeout + 2)).await {
        Ok(result) if result.succeeded() => format!("Port {} on {} is OPEN", params.port, params.host),
        Ok(_) | Err(SandboxError::Remote(_)) => {
            format!("Port {} on {} is CLOSED or unreachable", params.port, params.host)
        }
        Err(e) => format!("Error checking port: {e}"),
    }
}

pub async fn dns_lookup(sandbox: &SandboxClient, params: DnsLookupParams) -> String {
    let record_type = params.record_type.as_str();
    let command = format!("dig +short {} {}", params.domain, record_type);
    render_command(
        run_command(sandbox, &command, ExecOptions::with_timeout(10)).await,
        |result| {
            let records = result.stdout.trim();
            if records.is_empty() {
                format!("No {record_type} records found for {}", params.domain)
            } else {
                format!("DNS lookup for {} ({record_type} records):\n{records}", params.domain)
            }
        },
        "DNS lookup failed",
        "Error performing DNS lookup",
    )
}

fn format_response(method: &str, url: &str, response: &NetworkResponse) -> String {
    let status = response
        .data
        .status_code
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let body: String = response.data.body_text().chars().take(BODY_EXCERPT_CHARS).collect();
    format!("HTTP {method} {url}\nStatus: {status}\n\nResponse:\n{body}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::sandbox::HttpResponseData;

    #[test]
    fn test_response_body_is_truncated() {
        let response = NetworkResponse {
            data: HttpResponseData {
                status_code: Some(200),
                body: Value::String("x".repeat(1500)),
                ..HttpResponseData::default()
            },
        };
        let out = format_response("GET", "https://example.com", &response);

        assert!(out.starts_with("HTTP GET https://example.com\nStatus: 200\n\nResponse:\n"));
        assert_eq!(out.rsplit('\n').next().unwrap().len(), BODY_EXCERPT_CHARS);
    }

    #[test]
    fn test_missing_status_is_unknown() {
        let out = format_response("HEAD", "http://h", &NetworkResponse::default());
        assert!(out.contains("Status: unknown"));
    }

    #[test]
    fn test_method_and_record_type_decode() {
        let params: HttpRequestParams = serde_json::from_value(json!({"url": "http://h", "method": "PATCH"})).unwrap();
        assert_eq!(params.method, HttpMethod::Patch);
        assert_eq!(params.timeout, 30);

        let params: DnsLookupParams = serde_json::from_value(json!({"domain": "example.com", "record_type": "AAAA"})).unwrap();
        assert_eq!(params.record_type.as_str(), "AAAA");
        assert!(serde_json::from_value::<HttpRequestParams>(json!({"url": "u", "method": "get"})).is_err());
    }
}
