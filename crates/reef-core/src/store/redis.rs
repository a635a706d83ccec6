use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use super::{SessionData, SessionStore, StoreError};

const KEY_PREFIX: &str = "reef:session:";

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Redis-backed store. Expiry is delegated to Redis (`PSETEX` / `PEXPIRE`), so
/// expired entries are already absent from `GET`/`EXISTS`.
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis })
    }
}

fn session_key(session_id: &str) -> String {
    format!("{KEY_PREFIX}{session_id}")
}

/// A stored blob must be a JSON object; anything else is reported as corrupt.
fn decode(session_id: &str, json: &str) -> Result<SessionData, StoreError> {
    serde_json::from_str::<SessionData>(json).map_err(|source| StoreError::Corrupt {
        session_id: session_id.to_string(),
        source,
    })
}

fn ttl_millis(ttl: Duration) -> u64 {
    ttl.as_millis().min(i64::MAX as u128) as u64
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionData>, StoreError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(session_key(session_id)).await?;
        let Some(json) = value else {
            return Ok(None);
        };
        decode(session_id, &json).map(Some)
    }

    async fn set(
        &self,
        session_id: &str,
        data: SessionData,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let key = session_key(session_id);
        let millis = ttl_millis(ttl);
        if millis == 0 {
            // Redis rejects a zero expiry; a zero TTL means the entry is already gone.
            conn.del::<_, ()>(&key).await?;
            return Ok(());
        }
        let serialized = serde_json::to_string(&data).map_err(|source| StoreError::Corrupt {
            session_id: session_id.to_string(),
            source,
        })?;
        conn.pset_ex::<_, _, ()>(&key, serialized, millis).await?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(session_key(session_id)).await?;
        Ok(())
    }

    async fn exists(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let exists: bool = conn.exists(session_key(session_id)).await?;
        Ok(exists)
    }

    async fn touch(&self, session_id: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let key = session_key(session_id);
        let millis = ttl_millis(ttl);
        if millis == 0 {
            let removed: u64 = conn.del(&key).await?;
            return Ok(removed > 0);
        }
        let updated: bool = conn.pexpire(&key, millis as i64).await?;
        Ok(updated)
    }
}
