//! # redis-tally-limit
//!
//! A Redis-backed [`CounterStore`] for `tally-limit`.
//!
//! The whole point of this crate is one atomic unit of work: a Lua script
//! that increments the counter and, when the increment created the key, arms
//! its TTL in the same round trip. Redis executes scripts without
//! interleaving other commands, so two racing first-touches can never both
//! believe they are first and leave the key without an expiry.
//!
//! Any Redis-compatible server works, including Dragonfly and Valkey.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use tracing::debug;
use tracing::warn;

use tally_limit::CounterStore;
use tally_limit::StoreError;

/// INCR first, EXPIRE only on the increment that created the key. The
/// script runs atomically server-side, which is what makes the
/// check-if-first-then-arm-TTL step indivisible.
const BUMP_SCRIPT: &str = r#"
local current = redis.call("INCR", KEYS[1])
if current == 1 then
    redis.call("EXPIRE", KEYS[1], ARGV[1])
end
return current
"#;

/// Connection parameters for the Redis counter store.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Server address as `host:port`.
    pub address: String,
    /// Password, empty for unauthenticated servers.
    pub password: String,
    /// Logical database index.
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: "localhost:6379".to_owned(),
            password: String::new(),
            db: 0,
        }
    }
}

impl RedisConfig {
    /// Builds a config from the process environment: `REDIS_ADDRESS`
    /// (default `localhost:6379`), `REDIS_PASSWORD` (default empty) and
    /// `REDIS_DB` (default 0, falling back on parse failure).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            address: std::env::var("REDIS_ADDRESS").unwrap_or(defaults.address),
            password: std::env::var("REDIS_PASSWORD").unwrap_or(defaults.password),
            db: std::env::var("REDIS_DB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.db),
        }
    }

    /// The connection URL derived from this config.
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}/{}", self.address, self.db)
        } else {
            format!("redis://:{}@{}/{}", self.password, self.address, self.db)
        }
    }
}

/// A [`CounterStore`] over a shared Redis server.
///
/// Holds a reconnecting [`ConnectionManager`], so a dropped connection heals
/// without rebuilding the store. Cloning is cheap and clones share the same
/// underlying connection.
#[derive(Clone)]
pub struct RedisCounterStore {
    manager: ConnectionManager,
    script: Arc<Script>,
    address: String,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connects to the configured server and verifies it with a `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] when the server cannot be
    /// reached or rejects the connection.
    pub async fn connect(config: RedisConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let mut manager = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<String>(&mut manager)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        debug!(address = %config.address, "connected to redis counter store");

        Ok(Self {
            manager,
            script: Arc::new(Script::new(BUMP_SCRIPT)),
            address: config.address,
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn bump(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.manager.clone();

        let count: i64 = self
            .script
            .key(key)
            .arg(ttl.as_secs().max(1))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(key = %key, error = %e, "redis bump failed");
                map_redis_error(&e)
            })?;

        u64::try_from(count)
            .map_err(|_| StoreError::UnexpectedReply(format!("negative count {count}")))
    }
}

fn map_redis_error(err: &redis::RedisError) -> StoreError {
    if err.kind() == redis::ErrorKind::TypeError {
        // The script answered with something other than an integer. This is
        // a failure, not a zero count.
        StoreError::UnexpectedReply(err.to_string())
    } else if err.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::Unavailable(err.to_string())
    }
}
