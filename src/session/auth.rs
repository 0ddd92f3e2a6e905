//! Signed session tokens with server-side revocation
//!
//! A token is `hex(claims_json) "." hex(hmac_sha256(secret, claims_json))`.
//! Verification checks the signature, then expiry, then that the token's
//! `jti` is still present in the [`SessionStore`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::{SessionRecord, SessionStore};
use crate::config::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("auth secret is not configured")]
    MissingSecret,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("token signature mismatch")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    /// Signature and expiry are fine but the session no longer exists
    #[error("token has been revoked")]
    Revoked,
    #[error("session store error: {0}")]
    Store(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ExecuteCommands,
    ManageFiles,
    ViewSystem,
    UseDocker,
    MakeNetworkRequests,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Every permission
    Admin,
    PowerUser,
    #[default]
    User,
    Viewer,
}

impl Role {
    pub fn permissions(self) -> &'static [Permission] {
        use Permission::*;
        match self {
            Role::Admin => &[ExecuteCommands, ManageFiles, ViewSystem, UseDocker, MakeNetworkRequests],
            Role::PowerUser => &[ExecuteCommands, ManageFiles, ViewSystem, UseDocker, MakeNetworkRequests],
            Role::User => &[ExecuteCommands, ManageFiles, ViewSystem],
            Role::Viewer => &[ViewSystem],
        }
    }

    pub fn allows(self, permission: Permission) -> bool {
        self == Role::Admin || self.permissions().contains(&permission)
    }
}

/// Identity a token is issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    /// Unix seconds
    pub iat: i64,
    /// Unix seconds
    pub exp: i64,
    /// Session id, also the [`SessionStore`] key
    pub jti: String,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.role.allows(permission)
    }
}

/// Issues, verifies and revokes session tokens
pub struct AuthManager {
    secret: Vec<u8>,
    token_expiry: Duration,
    store: Arc<dyn SessionStore>,
}

impl AuthManager {
    pub fn new(secret: impl AsRef<[u8]>, token_expiry: Duration, store: Arc<dyn SessionStore>) -> Result<Self, AuthError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(AuthError::MissingSecret);
        }
        Ok(Self {
            secret: secret.to_vec(),
            token_expiry,
            store,
        })
    }

    pub fn from_config(config: &AuthConfig, store: Arc<dyn SessionStore>) -> Result<Self, AuthError> {
        let secret = config.secret.as_deref().ok_or(AuthError::MissingSecret)?;
        Self::new(secret, config.token_expiry, store)
    }

    pub async fn issue_token(&self, user: &User) -> Result<String, AuthError> {
        self.issue_at(user, Utc::now()).await
    }

    async fn issue_at(&self, user: &User, now: DateTime<Utc>) -> Result<String, AuthError> {
        let claims = Claims {
            user_id: user.id.clone(),
            username: user.username.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: now.timestamp() + self.token_expiry.as_secs() as i64,
            jti: Uuid::new_v4().simple().to_string(),
        };
        let token = self.encode(&claims)?;

        self.store
            .insert(&claims.jti, SessionRecord::new(&user.id, now))
            .await?;
        info!(user_id = %user.id, role = ?user.role, "Issued session token");
        Ok(token)
    }

    /// Claims of a valid, unexpired and unrevoked token
    ///
    /// Refreshes the session's last activity.
    pub async fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, Utc::now()).await
    }

    async fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let claims = self.decode(token).inspect_err(|e| warn!(error = %e, "Rejected token"))?;
        if now.timestamp() >= claims.exp {
            debug!(jti = %claims.jti, "Token expired");
            return Err(AuthError::Expired);
        }
        if !self.store.touch(&claims.jti, now).await? {
            warn!(jti = %claims.jti, "Token session not found");
            return Err(AuthError::Revoked);
        }
        Ok(claims)
    }

    /// Remove the token's session; expired tokens can still be revoked
    ///
    /// Returns false when the session was already gone.
    pub async fn revoke_token(&self, token: &str) -> Result<bool, AuthError> {
        let claims = self.decode(token)?;
        let removed = self.store.remove(&claims.jti).await?;
        if removed {
            info!(jti = %claims.jti, user_id = %claims.user_id, "Revoked session token");
        }
        Ok(removed)
    }

    /// Drop sessions idle for longer than `max_idle`
    pub async fn cleanup_sessions(&self, max_idle: Duration) -> Result<usize, AuthError> {
        let idle = chrono::Duration::from_std(max_idle).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = Utc::now() - idle;
        let removed = self.store.remove_idle(cutoff).await?;
        if removed > 0 {
            info!(removed, "Cleaned up idle sessions");
        }
        Ok(removed)
    }

    pub async fn active_sessions(&self) -> Result<usize, AuthError> {
        self.store.len().await
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        <HmacSha256 as Mac>::new_from_slice(&self.secret).map_err(|_| AuthError::MissingSecret)
    }

    fn encode(&self, claims: &Claims) -> Result<String, AuthError> {
        let payload = serde_json::to_vec(claims).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let mut mac = self.mac()?;
        mac.update(&payload);
        let signature = mac.finalize().into_bytes();
        Ok(format!("{}.{}", hex::encode(&payload), hex::encode(signature)))
    }

    /// Check the signature and parse the claims, ignoring expiry
    fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let (payload_hex, signature_hex) = token
            .split_once('.')
            .ok_or_else(|| AuthError::Malformed("missing signature".to_string()))?;
        let payload = hex::decode(payload_hex).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let signature = hex::decode(signature_hex).map_err(|e| AuthError::Malformed(e.to_string()))?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        mac.verify_slice(&signature).map_err(|_| AuthError::InvalidSignature)?;

        serde_json::from_slice(&payload).map_err(|e| AuthError::Malformed(e.to_string()))
    }
}
