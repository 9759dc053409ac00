//! Fixed-window rate limiter keyed by client identity
//!
//! Bursty at window boundaries by construction; it only bounds worst-case
//! load. Window expiry is left to the store's TTL eviction.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::store::{keys, SharedStore, WindowHit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    /// Count one submission for `client_id`
    pub async fn check(&self, client_id: &str) -> Result<RateDecision> {
        let hit = self
            .store
            .fixed_window_hit(&keys::rate_limit(client_id), self.limit, self.window)
            .await?;

        Ok(match hit {
            WindowHit::Allowed => RateDecision::Allowed,
            WindowHit::Denied { retry_after } => {
                let retry_after_secs = ceil_secs(retry_after).clamp(1, ceil_secs(self.window));
                debug!(
                    "Client {} rate limited, retry after {}s",
                    client_id, retry_after_secs
                );
                RateDecision::Limited { retry_after_secs }
            }
        })
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
