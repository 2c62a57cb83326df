//! Redis-backed counter store.
//!
//! Shares admission state between every instance that points at the same
//! Redis database. The whole check-increment-block sequence runs as one Lua
//! script, which Redis executes without interleaving any other command, so
//! concurrent callers on different processes can never both observe room in
//! the same window slot.
//!
//! ## Key layout
//!
//! - `<prefix>:count:<class>:<identifier>`: window counter, expires one
//!   window after the increment that created it
//! - `<prefix>:block:<class>:<identifier>`: block marker, expires after the
//!   block duration
//!
//! `<class>` is `ip` or `token`; the default prefix is `limiter`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo, RedisError, Script};
use tracing::{debug, info};

use super::key::RateLimitKey;
use super::policy::WINDOW;
use super::store::CounterStore;
use crate::config::StoreConfig;
use crate::error::StoreError;

/// Default namespace for store keys.
pub const DEFAULT_KEY_PREFIX: &str = "limiter";

const ADMIT_SCRIPT: &str = r#"
local count_key = KEYS[1]
local block_key = KEYS[2]
local limit = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local block_ms = tonumber(ARGV[3])

if redis.call("EXISTS", block_key) == 1 then
    return 0
end

local current = redis.call("INCR", count_key)

if current == 1 then
    redis.call("PEXPIRE", count_key, window_ms)
end

if current > limit then
    redis.call("SET", block_key, "1", "PX", block_ms)
    return 0
end

return 1
"#;

/// Redis-backed store for distributed admission control.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    script: Script,
    key_prefix: String,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis using a connection URL (e.g., "redis://127.0.0.1/").
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        Self::from_client(client, DEFAULT_KEY_PREFIX).await
    }

    /// Connect using the service's store configuration.
    ///
    /// # Errors
    /// Returns error if the address is invalid or the connection fails.
    pub async fn connect_with_config(config: &StoreConfig) -> Result<Self, RedisError> {
        let mut info = config.url().into_connection_info()?;
        info.redis.password = config.password.clone();

        info!(addr = %config.addr, db = config.db, "Connecting to Redis");
        let client = Client::open(info)?;
        Self::from_client(client, DEFAULT_KEY_PREFIX).await
    }

    /// Build a store over an existing client with a custom key namespace.
    ///
    /// # Errors
    /// Returns error if the connection fails.
    pub async fn from_client(client: Client, key_prefix: &str) -> Result<Self, RedisError> {
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            script: Script::new(ADMIT_SCRIPT),
            key_prefix: key_prefix.to_string(),
        })
    }

    /// The key namespace in use.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }
}

/// Largest TTL sent to the script. Lua numbers are doubles, so the value
/// must stay an exact integer, well inside Redis' signed 64-bit range.
const MAX_TTL_MILLIS: u64 = (1 << 53) - 1;

/// Whole milliseconds in `1..=MAX_TTL_MILLIS`: `PX 0` is rejected by Redis.
fn ttl_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis())
        .unwrap_or(u64::MAX)
        .clamp(1, MAX_TTL_MILLIS)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn admit(
        &self,
        key: &RateLimitKey,
        limit: u64,
        block: Duration,
    ) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();

        let reply: i64 = self
            .script
            .key(key.count_key(&self.key_prefix))
            .key(key.block_key(&self.key_prefix))
            .arg(limit)
            .arg(ttl_millis(WINDOW))
            .arg(ttl_millis(block))
            .invoke_async(&mut connection)
            .await?;

        match reply {
            1 => Ok(true),
            0 => {
                debug!(key = %key, limit = limit, "Redis denied admission");
                Ok(false)
            }
            other => Err(StoreError::UnexpectedReply(other)),
        }
    }
}
