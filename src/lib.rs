//! Turnstile - Distributed Admission Control
//!
//! This crate decides, per HTTP request, whether to admit or reject it based
//! on a per-second budget keyed by client address or API token. A client that
//! exceeds its budget is blocked for a penalty period. All contended state
//! lives in a shared counter store that runs the whole check as one atomic
//! step, so any number of service instances can enforce the same budgets.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
