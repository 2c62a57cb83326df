//! Admission decisions and the counter stores behind them.

mod key;
mod limiter;
mod memory;
mod policy;
mod redis_store;
mod store;

pub use key::{IdentityClass, RateLimitKey};
pub use limiter::{RateLimiter, DEFAULT_STORE_TIMEOUT};
pub use memory::{InMemoryStore, DEFAULT_SWEEP_INTERVAL};
pub use policy::{LimitPolicy, RatePolicy, WINDOW};
pub use redis_store::{RedisStore, DEFAULT_KEY_PREFIX};
pub use store::CounterStore;
