//! Session storage backends.
//!
//! Both backends keep JSON-serializable `SessionRecord`s under an opaque id
//! with a fixed time-to-live that is refreshed on every write:
//! - `MemorySessionStore`: moka cache, for development and tests
//! - `RedisSessionStore`: shared Redis instance, for production

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;

use super::SessionRecord;
use crate::config::{
    REDIS_SESSION_PREFIX, SESSION_TTL, STORE_CONNECT_ATTEMPTS, STORE_CONNECT_TIMEOUT,
    STORE_RESPONSE_TIMEOUT, STORE_RETRY_CAP_MS, STORE_RETRY_STEP_MS,
};

/// Error type for session store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Session store unavailable: {0}")]
    Unavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Corrupt session record: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>, StoreError>;
    /// Store the record and (re)start its time-to-live
    async fn set(&self, id: &str, record: &SessionRecord) -> Result<(), StoreError>;
    async fn destroy(&self, id: &str) -> Result<(), StoreError>;
    /// Liveness check used by the readiness probe
    async fn ping(&self) -> Result<(), StoreError>;
}

// ============================================================================
// In-Memory Session Store
// ============================================================================

pub struct MemorySessionStore {
    sessions: Cache<String, SessionRecord>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::with_ttl(SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Cache::builder().time_to_live(ttl).build(),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.sessions.get(id).await)
    }

    async fn set(&self, id: &str, record: &SessionRecord) -> Result<(), StoreError> {
        self.sessions.insert(id.to_string(), record.clone()).await;
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<(), StoreError> {
        self.sessions.invalidate(id).await;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// Redis Session Store
// ============================================================================

pub struct RedisSessionStore {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisSessionStore {
    /// Connect to Redis, retrying with a capped linear backoff.
    ///
    /// Gives up after `STORE_CONNECT_ATTEMPTS` failed attempts. Once
    /// connected, the connection manager reconnects on its own within the
    /// same attempt count and delay cap.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;

        let mut attempt = 1;
        loop {
            match probe_connection(&client).await {
                Ok(()) => break,
                Err(e) if attempt < STORE_CONNECT_ATTEMPTS => {
                    let delay = reconnect_delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Session store connection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(attempts = attempt, error = %e, "Giving up on session store");
                    return Err(StoreError::Unavailable(format!(
                        "no connection after {} attempts: {}",
                        attempt, e
                    )));
                }
            }
        }

        let conn = ConnectionManager::new_with_config(client, manager_config()).await?;
        tracing::info!(attempts = attempt, "Connected to Redis session store");

        Ok(Self {
            conn,
            ttl_secs: SESSION_TTL.as_secs(),
        })
    }

    fn key(id: &str) -> String {
        format!("{}{}", REDIS_SESSION_PREFIX, id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(Self::key(id)).await?;

        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, id: &str, record: &SessionRecord) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(record)?;

        conn.set_ex::<_, _, ()>(Self::key(id), json, self.ttl_secs)
            .await?;
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::key(id)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Single connection attempt, bounded by `STORE_CONNECT_TIMEOUT`
async fn probe_connection(client: &redis::Client) -> Result<(), StoreError> {
    let connect = client.get_multiplexed_async_connection();
    match tokio::time::timeout(STORE_CONNECT_TIMEOUT, connect).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(StoreError::Unavailable("connection timed out".to_string())),
    }
}

/// Reconnect policy for an established manager, capped at
/// `STORE_CONNECT_ATTEMPTS` retries and `STORE_RETRY_CAP_MS` between them.
/// Connects and commands time out instead of hanging.
fn manager_config() -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_factor(STORE_RETRY_STEP_MS)
        .set_max_delay(STORE_RETRY_CAP_MS)
        .set_number_of_retries(STORE_CONNECT_ATTEMPTS as usize)
        .set_connection_timeout(STORE_CONNECT_TIMEOUT)
        .set_response_timeout(STORE_RESPONSE_TIMEOUT)
}

/// Delay before the next connection attempt: `min(step × attempt, cap)`.
pub fn reconnect_delay(attempt: u32) -> Duration {
    Duration::from_millis((STORE_RETRY_STEP_MS * u64::from(attempt)).min(STORE_RETRY_CAP_MS))
}
