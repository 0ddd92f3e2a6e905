//! Pluggable storage for issued token sessions

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::AuthError;

/// Server-side record of one issued token, keyed by its `jti`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(user_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            created_at: at,
            last_activity: at,
        }
    }
}

/// Backend holding live sessions
///
/// A token is only valid while its session is present, so removing a
/// record revokes the token.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, jti: &str, record: SessionRecord) -> Result<(), AuthError>;

    async fn get(&self, jti: &str) -> Result<Option<SessionRecord>, AuthError>;

    /// Update `last_activity`; returns false when the session is gone
    async fn touch(&self, jti: &str, at: DateTime<Utc>) -> Result<bool, AuthError>;

    async fn remove(&self, jti: &str) -> Result<bool, AuthError>;

    /// Drop every session idle since before `cutoff`, returning how many
    async fn remove_idle(&self, cutoff: DateTime<Utc>) -> Result<usize, AuthError>;

    async fn len(&self) -> Result<usize, AuthError>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, jti: &str, record: SessionRecord) -> Result<(), AuthError> {
        self.sessions.write().await.insert(jti.to_string(), record);
        Ok(())
    }

    async fn get(&self, jti: &str) -> Result<Option<SessionRecord>, AuthError> {
        Ok(self.sessions.read().await.get(jti).cloned())
    }

    async fn touch(&self, jti: &str, at: DateTime<Utc>) -> Result<bool, AuthError> {
        match self.sessions.write().await.get_mut(jti) {
            Some(record) => {
                record.last_activity = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, jti: &str) -> Result<bool, AuthError> {
        Ok(self.sessions.write().await.remove(jti).is_some())
    }

    async fn remove_idle(&self, cutoff: DateTime<Utc>) -> Result<usize, AuthError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, record| record.last_activity >= cutoff);
        Ok(before - sessions.len())
    }

    async fn len(&self) -> Result<usize, AuthError> {
        Ok(self.sessions.read().await.len())
    }
}
