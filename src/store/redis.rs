//! Redis-backed shared store
//!
//! Handles connection management and the Redis commands behind the pipeline:
//! - Job queue (RPUSH / BLPOP)
//! - Result storage (SET EX / GET)
//! - Fixed-window rate limit counters (Lua script)

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{SharedStore, WindowHit};

/// Returns {1, 0} when allowed, {0, ttl} when denied.
const FIXED_WINDOW_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    redis.call('SET', KEYS[1], 1, 'EX', ARGV[2])
    return {1, 0}
end
if tonumber(current) < tonumber(ARGV[1]) then
    redis.call('INCR', KEYS[1])
    return {1, 0}
end
return {0, redis.call('TTL', KEYS[1])}
"#;

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

pub struct RedisStore {
    client: redis::Client,
    /// Connection for non-blocking commands
    conn: Mutex<MultiplexedConnection>,
    /// Dedicated connection for BLPOP so waiting never stalls other commands
    blocking_conn: Mutex<Option<MultiplexedConnection>>,
    window_script: Script,
}

impl RedisStore {
    /// Connect to Redis, retrying until the server is reachable
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = get_connection_with_retry(&client).await?;
        info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            client,
            conn: Mutex::new(conn),
            blocking_conn: Mutex::new(None),
            window_script: Script::new(FIXED_WINDOW_SCRIPT),
        })
    }

    async fn connection(&self) -> MultiplexedConnection {
        self.conn.lock().await.clone()
    }

    /// Replace the shared connection after a failure (single attempt)
    async fn reconnect(&self) -> Result<MultiplexedConnection> {
        let fresh = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to reconnect to Redis")?;
        *self.conn.lock().await = fresh.clone();
        Ok(fresh)
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn push(&self, list: &str, value: &str) -> Result<()> {
        let mut conn = self.connection().await;
        if let Err(e) = conn.rpush::<_, _, ()>(list, value).await {
            warn!("Redis RPUSH failed: {}. Reconnecting...", e);
            let mut conn = self.reconnect().await?;
            conn.rpush::<_, _, ()>(list, value)
                .await
                .context("Failed to push to Redis list")?;
        }
        Ok(())
    }

    /// Block and wait for the next value using BLPOP.
    ///
    /// Automatically reconnects on connection failure.
    async fn pop_blocking(&self, list: &str) -> Result<String> {
        let mut guard = self.blocking_conn.lock().await;

        loop {
            if guard.is_none() {
                *guard = Some(get_connection_with_retry(&self.client).await?);
            }
            let Some(conn) = guard.as_mut() else {
                continue;
            };

            let result: Option<(String, String)> = match conn.blpop(list, 0.0).await {
                Ok(res) => res,
                Err(e) => {
                    warn!("Redis BLPOP failed: {}. Reconnecting...", e);
                    *guard = None;
                    continue;
                }
            };

            if let Some((_, value)) = result {
                return Ok(value);
            }
        }
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let secs = ttl.as_secs().max(1);
        let mut conn = self.connection().await;
        if let Err(e) = conn.set_ex::<_, _, ()>(key, value, secs).await {
            warn!("Failed to store {}: {}. Reconnecting...", key, e);
            let mut conn = self.reconnect().await?;
            conn.set_ex::<_, _, ()>(key, value, secs)
                .await
                .with_context(|| format!("Failed to store {}", key))?;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await;
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Failed to read {}: {}. Reconnecting...", key, e);
                let mut conn = self.reconnect().await?;
                conn.get(key)
                    .await
                    .with_context(|| format!("Failed to read {}", key))
            }
        }
    }

    async fn fixed_window_hit(&self, key: &str, limit: u32, window: Duration) -> Result<WindowHit> {
        let window_secs = window.as_secs().max(1);
        let mut conn = self.connection().await;

        let mut invocation = self.window_script.key(key);
        invocation.arg(limit).arg(window_secs);

        let reply: (i64, i64) = match invocation.invoke_async(&mut conn).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Rate limit script failed: {}. Reconnecting...", e);
                let mut conn = self.reconnect().await?;
                invocation
                    .invoke_async(&mut conn)
                    .await
                    .context("Failed to evaluate rate limit")?
            }
        };

        Ok(match reply {
            (1, _) => WindowHit::Allowed,
            // TTL is -1 only if the key somehow lost its expiry; report a full window
            (_, ttl) if ttl > 0 => WindowHit::Denied {
                retry_after: Duration::from_secs(ttl as u64),
            },
            _ => WindowHit::Denied {
                retry_after: Duration::from_secs(window_secs),
            },
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await;
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .context("Redis PING failed")
    }
}

/// Get a Redis connection with retry logic
async fn get_connection_with_retry(client: &redis::Client) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in {} seconds...",
                    e,
                    RECONNECT_DELAY.as_secs()
                );
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
