//! HTTP transport with bounded retries and uniform decoding
//!
//! Both the completion provider and the sandbox service are reached
//! through a [`TransportClient`]. One logical request may become several
//! HTTP attempts:
//!
//! ```text
//! attempt 0 ──► 5xx / connection error ──► sleep(delay)      ──► attempt 1
//! attempt 1 ──► 5xx / connection error ──► sleep(delay * 2)  ──► attempt 2
//! attempt 2 ──► 5xx / connection error ──► TransportError (terminal)
//!
//! any attempt ──► 4xx ──► TransportError (terminal, no retry)
//! any attempt ──► 2xx, undecodable body ──► retried like a 5xx
//! any attempt ──► 2xx ──► decoded body
//! ```

pub mod client;
pub mod retry;

pub use client::TransportClient;
pub use retry::RetryPolicy;

use thiserror::Error;

/// Failure of a transport request, after any retries
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The server answered with a 4xx, or a 5xx on the last attempt
    #[error("HTTP {status} after {attempts} attempt(s): {body}")]
    Status {
        status: u16,
        body: String,
        attempts: u32,
    },
    /// No HTTP response was received (DNS, refused, timeout, reset)
    #[error("connection failed after {attempts} attempt(s): {message}")]
    Connection { message: String, attempts: u32 },
    /// A 2xx response whose body could not be read or decoded, on every attempt
    #[error("failed to decode response after {attempts} attempt(s): {message}")]
    Decode { message: String, attempts: u32 },
    /// The request could not be built (bad URL, header or body)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// HTTP status, when the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Number of HTTP attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            TransportError::Status { attempts, .. }
            | TransportError::Connection { attempts, .. }
            | TransportError::Decode { attempts, .. } => *attempts,
            TransportError::InvalidRequest(_) => 0,
        }
    }
}
