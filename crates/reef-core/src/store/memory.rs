use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::{SessionData, SessionStore, StoreError};

// Upper bound for TTLs that would overflow the clock.
const MAX_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

struct Entry {
    data: SessionData,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now + ttl.min(MAX_TTL)
}

/// In-process store. Expiry is checked lazily on every access and purged by
/// [`SessionStore::clear_expired`] or the optional sweeper task.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of physically stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = store.purge(Instant::now());
                if removed > 0 {
                    debug!(removed, "swept expired sessions");
                }
            }
        })
    }

    fn purge(&self, now: Instant) -> usize {
        let mut guard = self.entries.lock();
        let before = guard.len();
        guard.retain(|_, entry| !entry.is_expired(now));
        before - guard.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionData>, StoreError> {
        let now = Instant::now();
        let mut guard = self.entries.lock();
        let live = guard
            .get(session_id)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.data.clone());
        if live.is_none() {
            guard.remove(session_id);
        }
        Ok(live)
    }

    async fn set(
        &self,
        session_id: &str,
        data: SessionData,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires_at = expiry(Instant::now(), ttl);
        self.entries
            .lock()
            .insert(session_id.to_string(), Entry { data, expires_at });
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(session_id);
        Ok(())
    }

    async fn exists(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.get(session_id).await?.is_some())
    }

    async fn touch(&self, session_id: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut guard = self.entries.lock();
        if let Some(entry) = guard
            .get_mut(session_id)
            .filter(|entry| !entry.is_expired(now))
        {
            entry.expires_at = expiry(now, ttl);
            return Ok(true);
        }
        guard.remove(session_id);
        Ok(false)
    }

    async fn clear_expired(&self) -> Result<usize, StoreError> {
        Ok(self.purge(Instant::now()))
    }
}
