//! Session helpers outside the conversation loop
//!
//! - [`AuthManager`]: HMAC-signed tokens whose sessions live in a
//!   pluggable [`SessionStore`], so revocation is deleting the record
//! - [`ResponseCache`]: LRU + TTL memoization keyed by [`cache_key`]

pub mod auth;
pub mod cache;
pub mod store;

pub use auth::{AuthError, AuthManager, Claims, Permission, Role, User};
pub use cache::{cache_key, ResponseCache};
pub use store::{InMemorySessionStore, SessionRecord, SessionStore};
