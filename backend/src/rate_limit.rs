//! Per-caller request rate limits.

use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::config::RateLimitConfig;
use crate::error::{GatewayError, Result};
use crate::gateway::DeliveryMode;

/// Keyed limiters for each delivery mode.
pub struct RateLimits {
    enabled: bool,
    realtime: DefaultKeyedRateLimiter<String>,
    stream: DefaultKeyedRateLimiter<String>,
    batch: DefaultKeyedRateLimiter<String>,
}

fn per(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

impl RateLimits {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            realtime: RateLimiter::keyed(Quota::per_minute(per(config.realtime_per_minute))),
            stream: RateLimiter::keyed(Quota::per_minute(per(config.stream_per_minute))),
            batch: RateLimiter::keyed(Quota::per_hour(per(config.batch_per_hour))),
        }
    }

    /// Consume one request of `mode` for `caller`.
    pub fn check(&self, caller: &str, mode: DeliveryMode) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let limiter = match mode {
            DeliveryMode::Realtime => &self.realtime,
            DeliveryMode::Stream => &self.stream,
            DeliveryMode::Batch => &self.batch,
        };

        limiter.check_key(&caller.to_string()).map_err(|_| {
            tracing::info!(caller, mode = mode.as_str(), "Rate limit exceeded");
            GatewayError::RateLimited(mode.as_str())
        })
    }

    /// Drop state for callers whose limits have fully replenished.
    pub fn retain_recent(&self) {
        self.realtime.retain_recent();
        self.stream.retain_recent();
        self.batch.retain_recent();
    }
}
