//! Rate decision engine.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::key::RateLimitKey;
use super::policy::{LimitPolicy, RatePolicy};
use super::store::CounterStore;
use crate::error::StoreError;

/// Default deadline for a single store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(1);

/// Chooses the budget for a request and asks the store to admit it.
///
/// The limiter holds no mutable state of its own. Every contended record
/// lives in the store, so cloning the limiter (or running many instances of
/// the service) never changes the outcome.
pub struct RateLimiter<S: CounterStore> {
    /// The counter store performing the atomic check
    store: Arc<S>,
    /// Budgets per identity class
    policy: RatePolicy,
    /// Deadline for one store call
    timeout: Duration,
}

impl<S: CounterStore> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy,
            timeout: self.timeout,
        }
    }
}

impl<S: CounterStore> RateLimiter<S> {
    /// Create a new rate limiter with the default store deadline.
    pub fn new(store: Arc<S>, policy: RatePolicy) -> Self {
        Self::with_timeout(store, policy, DEFAULT_STORE_TIMEOUT)
    }

    /// Create a new rate limiter with an explicit store deadline.
    pub fn with_timeout(store: Arc<S>, policy: RatePolicy, timeout: Duration) -> Self {
        Self {
            store,
            policy,
            timeout,
        }
    }

    /// Pick the key and budget for a request.
    ///
    /// A non-empty token always wins: the request is counted against the
    /// token budget only, never against the address as well.
    pub fn select(&self, address: &str, token: &str) -> (RateLimitKey, LimitPolicy) {
        let key = if token.is_empty() {
            RateLimitKey::address(address)
        } else {
            RateLimitKey::token(token)
        };
        let limit = self.policy.for_class(key.class);
        (key, limit)
    }

    /// Check whether a request from `address` carrying `token` is admitted.
    ///
    /// Store failures, including a missed deadline, are returned as errors and
    /// never retried.
    pub async fn check(&self, address: &str, token: &str) -> Result<bool, StoreError> {
        let (key, limit) = self.select(address, token);

        trace!(
            key = %key,
            limit = limit.max_requests,
            "Checking rate limit"
        );

        let admitted = tokio::time::timeout(
            self.timeout,
            self.store
                .admit(&key, limit.max_requests, limit.block_duration),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.timeout))??;

        if !admitted {
            debug!(
                key = %key,
                limit = limit.max_requests,
                "Rate limit exceeded"
            );
        }

        Ok(admitted)
    }

    /// The configured policy.
    pub fn policy(&self) -> RatePolicy {
        self.policy
    }

    /// The counter store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}
