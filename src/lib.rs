//! sandbox-chat - LLM tool-calling assistant over a remote agent sandbox
//!
//! A user message goes to an OpenAI-compatible chat completion endpoint
//! with every sandbox tool declared. Requested tools run against the
//! sandbox REST service, their textual results are appended to the
//! transcript, and a final completion produces the reply.
//!
//! # Modules
//!
//! - `agent` - conversation orchestrator and append-only transcript
//! - `completion` - chat completion wire types, client and SSE decoding
//! - `sandbox` - pooled sandbox client with scoped sessions
//! - `tools` - typed tool parameters, handlers and the dispatch registry
//! - `transport` - HTTP transport with bounded retries
//! - `session` - signed session tokens and a response cache
//! - `config` - environment configuration
//! - `rate_limit` - token bucket for conversation turns
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - structured logging and optional OTLP export
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use sandbox_chat::{AppConfig, CompletionClient, Orchestrator, SandboxClient};
//!
//! let config = AppConfig::from_env()?;
//! let sandbox = SandboxClient::new(config.sandbox.clone())?;
//! let registry = sandbox_chat::tools::default_registry(&sandbox, &config.features)?;
//! let provider = CompletionClient::new(&config.provider)?;
//!
//! let mut agent = Orchestrator::new(Arc::new(provider), Arc::new(registry), (&config).into());
//! let reply = agent.send_message("Run echo test").await;
//! ```

pub mod agent;
pub mod completion;
pub mod config;
pub mod health;
pub mod metrics;
pub mod rate_limit;
pub mod sandbox;
pub mod session;
pub mod tools;
pub mod tracing;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use agent::{Orchestrator, OrchestratorConfig};
pub use completion::{CompletionClient, CompletionProvider, Message};
pub use config::AppConfig;
pub use health::HealthStatus;
pub use sandbox::{SandboxClient, SandboxSession};
pub use tools::{ToolRegistry, default_registry};
