//! Admission budgets.

use std::time::Duration;

use super::key::IdentityClass;

/// Length of the fixed counting window.
pub const WINDOW: Duration = Duration::from_secs(1);

/// The budget applied to a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    /// Maximum requests allowed in one window
    pub max_requests: u64,
    /// Length of the counting window
    pub window: Duration,
    /// How long a key stays blocked once it exceeds `max_requests`
    pub block_duration: Duration,
}

impl LimitPolicy {
    /// Create a per-second budget.
    pub fn per_second(max_requests: u64, block_duration: Duration) -> Self {
        Self {
            max_requests,
            window: WINDOW,
            block_duration,
        }
    }
}

/// Budgets for every identity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    address_limit: u64,
    token_limit: u64,
    block_duration: Duration,
}

impl RatePolicy {
    /// Create a new policy. Limits are requests per second.
    pub fn new(address_limit: u64, token_limit: u64, block_duration: Duration) -> Self {
        Self {
            address_limit,
            token_limit,
            block_duration,
        }
    }

    /// Requests per second allowed for one address.
    pub fn address_limit(&self) -> u64 {
        self.address_limit
    }

    /// Requests per second allowed for one token.
    pub fn token_limit(&self) -> u64 {
        self.token_limit
    }

    /// Block length after a budget is exceeded.
    pub fn block_duration(&self) -> Duration {
        self.block_duration
    }

    /// The budget for an identity class.
    pub fn for_class(&self, class: IdentityClass) -> LimitPolicy {
        let max_requests = match class {
            IdentityClass::Address => self.address_limit,
            IdentityClass::Token => self.token_limit,
        };
        LimitPolicy::per_second(max_requests, self.block_duration)
    }
}
