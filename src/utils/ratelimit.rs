//! Outbound request rate limiting, one instance per external API

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use tokio_util::sync::CancellationToken;

use crate::error::{PiperError, Result};

/// Token bucket shared by every caller of one API
pub struct ApiRateLimiter {
    name: &'static str,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl ApiRateLimiter {
    pub fn per_second(name: &'static str, requests: u32) -> Self {
        let rate = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        Self {
            name,
            limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(NonZeroU32::MIN)),
        }
    }

    /// Wait for a token, giving up when `cancel` fires
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        if self.limiter.check().is_ok() {
            return Ok(());
        }

        tracing::debug!("{} rate limit saturated, waiting", self.name);
        tokio::select! {
            _ = self.limiter.until_ready() => Ok(()),
            _ = cancel.cancelled() => Err(PiperError::Cancelled),
        }
    }
}
