//! Per-(route, client) admission control.
//!
//! The dispatcher asks a [`RateLimiter`] before doing any authentication or
//! backend work. Rejections short-circuit with 429 and never reach a backend.

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as GovernorLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;

use crate::route_table::ServiceRoute;

pub trait RateLimiter: Send + Sync {
    /// Consume one unit of budget for `key`. `false` means reject.
    fn admit(&self, key: &str) -> bool;

    /// Drop bookkeeping for keys that are back at full budget.
    fn housekeeping(&self) {}
}

/// GCRA limiter keyed by `route:client`, backed by `governor`.
pub struct KeyedRateLimiter {
    inner: DefaultKeyedRateLimiter<String>,
}

impl KeyedRateLimiter {
    pub fn per_minute(requests: NonZeroU32) -> Self {
        Self {
            inner: GovernorLimiter::keyed(Quota::per_minute(requests)),
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.inner.len()
    }
}

impl RateLimiter for KeyedRateLimiter {
    fn admit(&self, key: &str) -> bool {
        self.inner.check_key(&key.to_string()).is_ok()
    }

    fn housekeeping(&self) {
        self.inner.retain_recent();
        self.inner.shrink_to_fit();
    }
}

/// Admits everything.
pub struct Unlimited;

impl RateLimiter for Unlimited {
    fn admit(&self, _key: &str) -> bool {
        true
    }
}

/// Limiter key for one request: the route name plus the peer address.
pub fn limiter_key(route: &ServiceRoute, client: Option<IpAddr>) -> String {
    match client {
        Some(ip) => format!("{}:{}", route.name, ip),
        None => format!("{}:unknown", route.name),
    }
}
