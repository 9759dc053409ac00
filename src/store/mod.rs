//! Shared store - the only channel between admission and workers
//!
//! Admission processes and worker processes never share memory. They meet
//! in a store that provides:
//! - An ordered list used as the job queue (push / blocking pop)
//! - TTL-bounded keys used for results
//! - An atomic fixed-window counter used for rate limiting
//!
//! `RedisStore` is the production backend; `MemoryStore` serves tests and
//! single-process deployments.

pub mod memory;
pub mod redis;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Store key constants
pub mod keys {
    /// Result key prefix (for polling)
    pub const RESULT_PREFIX: &str = "result:";

    /// Rate limit counter key prefix
    pub const RATE_LIMIT_PREFIX: &str = "rate_limit:";

    pub fn result(job_id: &str) -> String {
        format!("{}{}", RESULT_PREFIX, job_id)
    }

    pub fn rate_limit(client_id: &str) -> String {
        format!("{}{}", RATE_LIMIT_PREFIX, client_id)
    }
}

/// Outcome of one fixed-window hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowHit {
    Allowed,
    /// Limit reached; the window expires in `retry_after`
    Denied { retry_after: Duration },
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Append a value to the tail of a list
    async fn push(&self, list: &str, value: &str) -> Result<()>;

    /// Remove and return the head of a list, waiting until one exists
    async fn pop_blocking(&self, list: &str) -> Result<String>;

    /// Set a key that expires after `ttl`
    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Atomically count one hit against a fixed window.
    ///
    /// A missing counter starts a new window at 1 that expires after
    /// `window`. An existing counter below `limit` is incremented. Otherwise
    /// the hit is denied and the counter is left untouched.
    async fn fixed_window_hit(&self, key: &str, limit: u32, window: Duration) -> Result<WindowHit>;

    async fn ping(&self) -> Result<()>;
}
