use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// Persisted per-session blob.
pub type SessionData = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store backend error: {0}")]
    Backend(String),
    #[error("session store returned malformed data for {session_id}: {source}")]
    Corrupt {
        session_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Key/value persistence for session state that outlives one connection.
///
/// An entry whose TTL has elapsed is absent for every operation, whether or
/// not the backend has physically purged it yet.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<SessionData>, StoreError>;

    async fn set(
        &self,
        session_id: &str,
        data: SessionData,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    async fn exists(&self, session_id: &str) -> Result<bool, StoreError>;

    /// Extends the TTL of a live entry. Returns `false` when the entry is absent.
    /// Defaults to get-then-set; backends with a native expiry command override it.
    async fn touch(&self, session_id: &str, ttl: Duration) -> Result<bool, StoreError> {
        match self.get(session_id).await? {
            Some(data) => {
                self.set(session_id, data, ttl).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Physically removes expired entries and returns how many were dropped.
    /// Stores whose backend expires entries on its own keep the default.
    async fn clear_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// Picks the store backend: Redis when a URL is configured and reachable,
/// otherwise an in-memory store with a background sweeper.
pub async fn build_store(redis_url: Option<&str>, sweep_interval: Duration) -> Arc<dyn SessionStore> {
    if let Some(url) = redis_url {
        match RedisStore::connect(url).await {
            Ok(store) => {
                info!(redis_url = %url, "using redis session store");
                return Arc::new(store);
            }
            Err(err) => {
                warn!(error = %err, "failed to init redis session store; falling back to memory")
            }
        }
    }
    let store = MemoryStore::new();
    let _sweeper = store.spawn_sweeper(sweep_interval);
    info!(
        sweep_interval_secs = sweep_interval.as_secs(),
        "using in-memory session store"
    );
    store
}
