//! Session tokens and response caching through the public API

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use sandbox_chat::config::AppConfig;
use sandbox_chat::session::{
    cache_key, AuthError, AuthManager, InMemorySessionStore, Permission, ResponseCache, Role, SessionStore, User,
};

fn config(vars: &[(&str, &str)]) -> AppConfig {
    let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// Tokens issued from environment settings expire after the configured lifetime
#[tokio::test]
async fn test_token_lifecycle_from_config() {
    let config = config(&[("AUTH_SECRET", "s3cret"), ("AUTH_TOKEN_EXPIRY", "120")]);
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let auth = AuthManager::from_config(&config.auth, store.clone()).unwrap();

    let viewer = User {
        id: "u-7".to_string(),
        username: "vera".to_string(),
        role: Role::Viewer,
    };
    let token = auth.issue_token(&viewer).await.unwrap();

    let claims = auth.verify_token(&token).await.unwrap();
    assert_eq!(claims.exp - claims.iat, 120);
    assert!(claims.has_permission(Permission::ViewSystem));
    assert!(!claims.has_permission(Permission::ExecuteCommands));
    assert!(!claims.is_admin());

    // Removing the record from the shared store revokes the token
    assert!(store.remove(&claims.jti).await.unwrap());
    assert_eq!(auth.verify_token(&token).await.unwrap_err(), AuthError::Revoked);
}

/// Without AUTH_SECRET no manager can be built
#[test]
fn test_auth_requires_secret() {
    let config = config(&[]);
    let store = Arc::new(InMemorySessionStore::new());

    assert_eq!(AuthManager::from_config(&config.auth, store).err(), Some(AuthError::MissingSecret));
}

/// Tool outputs can be memoized by name and arguments
#[tokio::test]
async fn test_cache_memoizes_tool_output() {
    let cache: ResponseCache<String> = ResponseCache::new(100, Duration::from_secs(300));
    let key = cache_key("get_system_info", &json!({}));

    let first: Result<String, ()> = cache
        .get_or_insert_with(&key, None, || async { Ok("System Information:\nos: linux".to_string()) })
        .await;
    let second: Result<String, ()> = cache
        .get_or_insert_with(&key, None, || async { Ok("recomputed".to_string()) })
        .await;

    assert_eq!(first, second);
    assert!(cache.remove(&key).await);
    assert!(cache.is_empty().await);
}
