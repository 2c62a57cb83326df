//! Configuration management for Turnstile.
//!
//! Values come from an optional YAML file and are then overridden by
//! environment variables. Every option has a default, and a malformed
//! environment value never fails startup: it is logged and ignored.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::warn;

use crate::ratelimit::RatePolicy;

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store connection configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Admission budgets
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Address the HTTP server binds to (all interfaces).
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

fn default_port() -> u16 {
    8080
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `host:port` of the Redis server
    #[serde(default = "default_store_addr")]
    pub addr: String,

    /// Optional password
    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index
    #[serde(default)]
    pub db: i64,

    /// Deadline for a single admission round trip, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            addr: default_store_addr(),
            password: None,
            db: 0,
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Redis connection URL without credentials.
    pub fn url(&self) -> String {
        format!("redis://{}/{}", self.addr, self.db)
    }

    /// Deadline for one store call.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_store_addr() -> String {
    "localhost:6379".to_string()
}

fn default_store_timeout_ms() -> u64 {
    1000
}

/// Per-second budgets and the penalty block length.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Requests per second allowed for one client address
    #[serde(default = "default_address_limit")]
    pub address_limit: u64,

    /// Requests per second allowed for one API token
    #[serde(default = "default_token_limit")]
    pub token_limit: u64,

    /// Seconds a key stays blocked after exceeding its budget
    #[serde(default = "default_block_seconds")]
    pub block_seconds: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            address_limit: default_address_limit(),
            token_limit: default_token_limit(),
            block_seconds: default_block_seconds(),
        }
    }
}

impl PolicyConfig {
    /// Build the rate policy used by the decision engine.
    pub fn rate_policy(&self) -> RatePolicy {
        RatePolicy::new(
            self.address_limit,
            self.token_limit,
            Duration::from_secs(self.block_seconds),
        )
    }
}

fn default_address_limit() -> u64 {
    5
}

fn default_token_limit() -> u64 {
    10
}

fn default_block_seconds() -> u64 {
    300
}

/// Longest accepted block: one year.
pub const MAX_BLOCK_SECONDS: u64 = 365 * 24 * 60 * 60;

impl TurnstileConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TurnstileConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::TurnstileError::Config(e.to_string()))?;
        if config.policy.block_seconds > MAX_BLOCK_SECONDS {
            return Err(crate::error::TurnstileError::Config(format!(
                "block_seconds {} exceeds the maximum of {}",
                config.policy.block_seconds, MAX_BLOCK_SECONDS
            )));
        }
        Ok(config)
    }

    /// Load the optional file, then apply process environment overrides.
    pub fn load(path: Option<&str>) -> crate::error::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Override values from an environment lookup.
    ///
    /// Each option accepts its current name and the legacy alias. Values
    /// that fail to parse keep whatever was configured before.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource { lookup };

        env.positive(&["ADDRESS_LIMIT", "RATE_LIMIT_IP"], &mut self.policy.address_limit);
        env.positive(&["TOKEN_LIMIT", "RATE_LIMIT_TOKEN"], &mut self.policy.token_limit);
        env.parsed(
            &["BLOCK_SECONDS", "BLOCK_TIME"],
            &mut self.policy.block_seconds,
            |secs: &u64| (1..=MAX_BLOCK_SECONDS).contains(secs),
        );
        env.positive(&["STORE_TIMEOUT_MS"], &mut self.store.timeout_ms);

        if let Some(addr) = env.get(&["REDIS_ADDR"]) {
            self.store.addr = addr;
        }
        if let Some(password) = env.get(&["REDIS_PASSWORD"]) {
            self.store.password = Some(password).filter(|p| !p.is_empty());
        }
        env.parsed(&["REDIS_DB"], &mut self.store.db, |db: &i64| *db >= 0);
        env.parsed(&["SERVER_PORT"], &mut self.server.port, |_: &u16| true);
    }
}

struct EnvSource<F> {
    lookup: F,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| (self.lookup)(*name))
    }

    fn positive(&self, names: &[&str], slot: &mut u64) {
        self.parsed(names, slot, |v: &u64| *v > 0);
    }

    fn parsed<T, V>(&self, names: &[&str], slot: &mut T, valid: V)
    where
        T: std::str::FromStr + std::fmt::Debug,
        V: Fn(&T) -> bool,
    {
        let Some(raw) = self.get(names) else {
            return;
        };
        match raw.trim().parse::<T>() {
            Ok(value) if valid(&value) => *slot = value,
            _ => warn!(
                option = names[0],
                value = %raw,
                fallback = ?slot,
                "Ignoring malformed configuration value"
            ),
        }
    }
}
