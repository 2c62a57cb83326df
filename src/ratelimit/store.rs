//! Counter store trait for abstracting in-memory and Redis implementations.

use std::time::Duration;

use async_trait::async_trait;

use super::key::RateLimitKey;
use crate::error::StoreError;

/// A store that runs the admission check for a key as one atomic step.
///
/// Implementations must execute the whole sequence below without any other
/// `admit` call on the same key interleaving, including calls made by other
/// processes sharing the same backing store:
///
/// 1. If the key is blocked, deny without touching the counter.
/// 2. Increment the window counter, creating it at 1.
/// 3. If the counter was just created, expire it after one window.
/// 4. If the counter is now above `limit`, block the key for `block` and deny.
/// 5. Otherwise allow.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one request against `key` and report whether it is admitted.
    async fn admit(
        &self,
        key: &RateLimitKey,
        limit: u64,
        block: Duration,
    ) -> Result<bool, StoreError>;
}

