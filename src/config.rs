//! Runtime configuration
//!
//! Every collaborator (completion provider, sandbox service, auth, rate
//! limiting) is configured from environment variables, optionally seeded
//! from a `.env` file. Each section also has a `Default` so the library
//! can be driven without touching the environment.
//!
//! ```text
//! .env ──► std::env ──► AppConfig::from_env() ──► validate() ──► clients
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Default OpenAI-compatible endpoint
pub const DEFAULT_PROVIDER_URL: &str = "https://api.openai.com/v1";

/// Default sandbox service address
pub const DEFAULT_SANDBOX_URL: &str = "http://localhost:8000";

/// Errors produced while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Connection settings for the chat completion provider
#[derive(Clone)]
pub struct ProviderConfig {
    /// Base URL, without the `/chat/completions` suffix
    pub base_url: String,
    pub api_key: String,
    /// Sent as `OpenAI-Organization` when present
    pub org_id: Option<String>,
    /// Sent as `OpenAI-Project` when present
    pub project_id: Option<String>,
    pub model: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Total attempts per request
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub retry_delay: Duration,
    /// Timeout for the one-token health probe
    pub health_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PROVIDER_URL.to_string(),
            api_key: String::new(),
            org_id: None,
            project_id: None,
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(300),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            health_timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(Some(&self.api_key)))
            .field("org_id", &self.org_id)
            .field("project_id", &self.project_id)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

/// Connection settings for the agent sandbox service
#[derive(Clone)]
pub struct SandboxConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// `GET /health` uses this instead of `timeout`
    pub health_timeout: Duration,
    /// Upper bound on concurrently acquired sessions
    pub max_connections: usize,
    /// Keep-alive connections kept per host
    pub max_idle_connections: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SANDBOX_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(300),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            health_timeout: Duration::from_secs(10),
            max_connections: 100,
            max_idle_connections: 10,
        }
    }
}

impl fmt::Debug for SandboxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(self.api_key.as_deref()))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("max_connections", &self.max_connections)
            .field("max_idle_connections", &self.max_idle_connections)
            .finish()
    }
}

/// Optional tool groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    pub streaming: bool,
    pub docker: bool,
    pub network: bool,
    pub database: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            streaming: true,
            docker: true,
            network: true,
            database: true,
        }
    }
}

/// Token signing settings
#[derive(Clone)]
pub struct AuthConfig {
    pub secret: Option<String>,
    pub token_expiry: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: None,
            token_expiry: Duration::from_secs(3600),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &redact(self.secret.as_deref()))
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub sandbox: SandboxConfig,
    pub features: FeatureFlags,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    /// Tool rounds per turn before the final no-tools completion
    pub max_tool_rounds: usize,
    /// Fan-out bound for one round of tool calls
    pub max_concurrent_tools: usize,
    pub system_prompt: Option<String>,
    /// Enables OpenTelemetry export when set
    pub otlp_endpoint: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            sandbox: SandboxConfig::default(),
            features: FeatureFlags::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            max_tool_rounds: 1,
            max_concurrent_tools: 5,
            system_prompt: None,
            otlp_endpoint: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment
    ///
    /// A `.env` file in the working directory is read first, if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// # Arguments
    /// * `lookup` - returns the raw value for a variable name, if set
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let max_retries = parse_or(&get, "MAX_RETRIES", defaults.provider.max_retries)?;
        let retry_delay =
            Duration::from_millis(parse_or(&get, "RETRY_DELAY_MS", 1000u64)?);

        let provider = ProviderConfig {
            base_url: normalize_base_url(get("LLM_BASE_URL").as_deref()),
            api_key: get("LLM_API_KEY").unwrap_or_default(),
            org_id: get("LLM_ORG_ID"),
            project_id: get("LLM_PROJECT_ID"),
            model: get("LLM_MODEL").unwrap_or(defaults.provider.model),
            timeout: Duration::from_secs(parse_or(&get, "LLM_TIMEOUT", 300u64)?),
            max_retries,
            retry_delay,
            health_timeout: defaults.provider.health_timeout,
        };

        let sandbox = SandboxConfig {
            base_url: get("SANDBOX_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.sandbox.base_url),
            api_key: get("SANDBOX_API_KEY"),
            timeout: Duration::from_secs(parse_or(&get, "SANDBOX_TIMEOUT", 300u64)?),
            max_retries,
            retry_delay,
            health_timeout: defaults.sandbox.health_timeout,
            max_connections: parse_or(
                &get,
                "SANDBOX_MAX_CONNECTIONS",
                defaults.sandbox.max_connections,
            )?,
            max_idle_connections: parse_or(
                &get,
                "SANDBOX_MAX_IDLE",
                defaults.sandbox.max_idle_connections,
            )?,
        };

        let features = FeatureFlags {
            streaming: flag_or(&get, "ENABLE_STREAMING", true)?,
            docker: flag_or(&get, "ENABLE_DOCKER", true)?,
            network: flag_or(&get, "ENABLE_NETWORK", true)?,
            database: flag_or(&get, "ENABLE_DATABASE", true)?,
        };

        let auth = AuthConfig {
            secret: get("AUTH_SECRET"),
            token_expiry: Duration::from_secs(parse_or(&get, "AUTH_TOKEN_EXPIRY", 3600u64)?),
        };

        let rate_limit = RateLimitConfig {
            enabled: flag_or(&get, "RATE_LIMIT_ENABLED", true)?,
            requests_per_minute: parse_or(&get, "RATE_LIMIT_RPM", 60u32)?,
        };

        Ok(Self {
            provider,
            sandbox,
            features,
            auth,
            rate_limit,
            max_tool_rounds: parse_or(&get, "MAX_TOOL_ROUNDS", defaults.max_tool_rounds)?,
            max_concurrent_tools: parse_or(
                &get,
                "MAX_CONCURRENT_TOOLS",
                defaults.max_concurrent_tools,
            )?,
            system_prompt: get("SYSTEM_PROMPT"),
            otlp_endpoint: get("OTLP_ENDPOINT"),
        })
    }

    /// Check the loaded values, reporting every problem at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.provider.api_key.is_empty() {
            problems.push("LLM_API_KEY is required".to_string());
        }
        for (key, value) in [
            ("LLM_BASE_URL", &self.provider.base_url),
            ("SANDBOX_BASE_URL", &self.sandbox.base_url),
        ] {
            if !is_http_url(value) {
                problems.push(format!("{key} must be an http(s) URL, got {value:?}"));
            }
        }
        if self.provider.max_retries == 0 {
            problems.push("MAX_RETRIES must be at least 1".to_string());
        }
        if self.sandbox.max_connections == 0 {
            problems.push("SANDBOX_MAX_CONNECTIONS must be at least 1".to_string());
        }
        if self.max_concurrent_tools == 0 {
            problems.push("MAX_CONCURRENT_TOOLS must be at least 1".to_string());
        }
        if self.rate_limit.enabled && self.rate_limit.requests_per_minute == 0 {
            problems.push("RATE_LIMIT_RPM must be at least 1 when rate limiting is enabled".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

/// Normalize a user-supplied completion endpoint
///
/// Empty input yields the default endpoint. A pasted `/chat/completions`
/// suffix is stripped and a bare host gets `/v1` appended.
pub fn normalize_base_url(raw: Option<&str>) -> String {
    let Some(base) = raw.map(str::trim).filter(|b| !b.is_empty()) else {
        return DEFAULT_PROVIDER_URL.to_string();
    };

    let trimmed = base.trim_end_matches('/');
    let base = trimmed.strip_suffix("/chat/completions").unwrap_or(trimmed);

    match Url::parse(base) {
        Ok(url) if url.path().is_empty() || url.path() == "/" => format!("{base}/v1"),
        _ => base.to_string(),
    }
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}

fn redact(secret: Option<&str>) -> &'static str {
    match secret {
        Some(s) if !s.is_empty() => "***",
        _ => "<unset>",
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(default),
    }
}

fn flag_or<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { key, value: raw }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.provider.base_url, DEFAULT_PROVIDER_URL);
        assert_eq!(config.provider.timeout, Duration::from_secs(300));
        assert_eq!(config.provider.max_retries, 3);
        assert_eq!(config.provider.retry_delay, Duration::from_secs(1));
        assert_eq!(config.sandbox.base_url, DEFAULT_SANDBOX_URL);
        assert_eq!(config.sandbox.max_connections, 100);
        assert_eq!(config.sandbox.max_idle_connections, 10);
        assert_eq!(config.max_concurrent_tools, 5);
        assert!(config.features.docker);
        assert_eq!(config.rate_limit.requests_per_minute, 60);
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = AppConfig::from_lookup(lookup(&[
            ("LLM_API_KEY", "sk-test"),
            ("LLM_ORG_ID", "org-1"),
            ("SANDBOX_BASE_URL", "http://sandbox:9000/"),
            ("MAX_RETRIES", "5"),
            ("RETRY_DELAY_MS", "250"),
            ("ENABLE_DOCKER", "false"),
            ("SYSTEM_PROMPT", "be brief"),
        ]))
        .unwrap();

        assert_eq!(config.provider.api_key, "sk-test");
        assert_eq!(config.provider.org_id.as_deref(), Some("org-1"));
        assert_eq!(config.sandbox.base_url, "http://sandbox:9000");
        assert_eq!(config.sandbox.max_retries, 5);
        assert_eq!(config.provider.retry_delay, Duration::from_millis(250));
        assert!(!config.features.docker);
        assert!(config.features.network);
        assert_eq!(config.system_prompt.as_deref(), Some("be brief"));
    }

    #[test]
    fn test_unparseable_number_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("MAX_RETRIES", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "MAX_RETRIES", .. }));
    }

    #[test]
    fn test_validate_collects_all_problems() {
        let mut config = AppConfig::default();
        config.sandbox.base_url = "ftp://files.local".to_string();
        config.max_concurrent_tools = 0;

        match config.validate() {
            Err(ConfigError::Invalid(problems)) => {
                assert_eq!(problems.len(), 3);
                assert!(problems[0].contains("LLM_API_KEY"));
            }
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url(None), DEFAULT_PROVIDER_URL);
        assert_eq!(normalize_base_url(Some("  ")), DEFAULT_PROVIDER_URL);
        assert_eq!(
            normalize_base_url(Some("https://llm.local/v1/chat/completions")),
            "https://llm.local/v1"
        );
        assert_eq!(normalize_base_url(Some("http://localhost:8080/")), "http://localhost:8080/v1");
        assert_eq!(normalize_base_url(Some("https://proxy.local/openai/v1/")), "https://proxy.local/openai/v1");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = ProviderConfig {
            api_key: "sk-secret".to_string(),
            ..ProviderConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("***"));
    }
}
