//! Agent sandbox client
//!
//! Typed façade over the sandbox service REST API. Every operation runs
//! inside an acquired [`SandboxSession`]; the session holds a pool permit
//! and gives it back when it is released or dropped, on every exit path.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SandboxClient (cheap to clone)                                 │
//! │                                                                 │
//! │   permits: Semaphore(max_connections)                           │
//! │   transport: TransportClient ──► reqwest pool (max_idle)        │
//! │         │                                                       │
//! │         ▼                                                       │
//! │    acquire() ──► SandboxSession ──► execute_command, read_file… │
//! │         │                                                       │
//! │         ▼                                                       │
//! │    release() / drop ──► permit returned                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod types;

pub use client::{PoolStats, SandboxClient, SandboxSession};
pub use types::{
    Ack, ContainerListing, ContainerStarted, ContainerSummary, ExecMetadata, ExecOptions,
    ExecResult, FileContent, FileListing, HttpResponseData, NetworkResponse, SystemSnapshot,
};

use thiserror::Error;

use crate::transport::TransportError;

/// Errors from sandbox operations
#[derive(Debug, Clone, Error)]
pub enum SandboxError {
    /// The session was released, or never acquired
    #[error("sandbox client not initialized: acquire a session first")]
    NotInitialized,
    /// The client was shut down
    #[error("sandbox connection pool is closed")]
    PoolClosed,
    #[error("failed to build sandbox client: {0}")]
    Client(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The sandbox answered with `success: false` or an `error` field
    #[error("{0}")]
    Remote(String),
    #[error("unexpected sandbox response: {0}")]
    Decode(String),
}
