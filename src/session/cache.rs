//! LRU response cache with per-entry TTL

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_MAX_SIZE: usize = 100;
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Stable key for a call of `name` with JSON `args`
///
/// Object keys are serialized in sorted order, so argument order does
/// not change the key.
pub fn cache_key(name: &str, args: &Value) -> String {
    let canonical = json!({ "name": name, "args": args }).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
    /// Larger is more recently used
    used: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.stored_at) >= ttl
    }
}

struct State<V> {
    entries: HashMap<String, Entry<V>>,
    clock: u64,
}

impl<V> State<V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Bounded memoization store
///
/// At capacity, inserting a new key evicts the least recently used entry.
/// Expired entries are dropped when read.
pub struct ResponseCache<V> {
    max_size: usize,
    ttl: Duration,
    state: Mutex<State<V>>,
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_TTL)
    }
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            max_size: max_size.max(1),
            ttl,
            state: Mutex::new(State {
                entries: HashMap::new(),
                clock: 0,
            }),
        }
    }

    /// Cached value, if present and younger than `ttl` (or the entry's own TTL)
    pub async fn get(&self, key: &str, ttl: Option<Duration>) -> Option<V> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let used = state.tick();

        match state.entries.get_mut(key) {
            None => return None,
            Some(entry) => {
                if !entry.is_expired(now, ttl.unwrap_or(entry.ttl)) {
                    entry.used = used;
                    return Some(entry.value.clone());
                }
            }
        }
        debug!(key, "Cache entry expired");
        state.entries.remove(key);
        None
    }

    pub async fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.ttl).await;
    }

    pub async fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut state = self.state.lock().await;
        let used = state.tick();

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_size {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!(key = %oldest, "Evicting least recently used cache entry");
                state.entries.remove(&oldest);
            }
        }

        state.entries.insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
                ttl,
                used,
            },
        );
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.state.lock().await.entries.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.state.lock().await.entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cached value for `key`, or the result of `compute` stored under it
    ///
    /// Errors are returned without being cached. The lock is not held
    /// while `compute` runs, so concurrent misses may compute twice.
    pub async fn get_or_insert_with<F, Fut, E>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(key, ttl).await {
            return Ok(hit);
        }
        let value = compute().await?;
        self.set_with_ttl(key, value.clone(), ttl.unwrap_or(self.ttl)).await;
        Ok(value)
    }
}
