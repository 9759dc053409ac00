//! In-process shared store
//!
//! Mirrors the Redis semantics the pipeline relies on: FIFO lists with a
//! blocking pop, keys with lazy TTL expiry and an atomic fixed-window counter.
//! Time is read from `tokio::time::Instant` so paused-clock tests can move
//! windows and TTLs forward.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{SharedStore, WindowHit};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default)]
struct State {
    lists: HashMap<String, VecDeque<String>>,
    keys: HashMap<String, Entry>,
}

impl State {
    fn live_entry(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.keys.get(key).is_some_and(|entry| !entry.is_live(now)) {
            self.keys.remove(key);
        }
        self.keys.get_mut(key)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    pushed: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of values waiting in a list
    pub fn len(&self, list: &str) -> usize {
        self.lock().lists.get(list).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, list: &str) -> bool {
        self.len(list) == 0
    }

    fn try_pop(&self, list: &str) -> Option<String> {
        self.lock().lists.get_mut(list).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn push(&self, list: &str, value: &str) -> Result<()> {
        self.lock()
            .lists
            .entry(list.to_string())
            .or_default()
            .push_back(value.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop_blocking(&self, list: &str) -> Result<String> {
        loop {
            // Register interest before checking so a push in between is not missed
            let notified = self.pushed.notified();
            if let Some(value) = self.try_pop(list) {
                return Ok(value);
            }
            notified.await;
        }
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.lock().keys.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        Ok(self.lock().live_entry(key, now).map(|entry| entry.value.clone()))
    }

    async fn fixed_window_hit(&self, key: &str, limit: u32, window: Duration) -> Result<WindowHit> {
        let now = Instant::now();
        let mut state = self.lock();

        let Some(entry) = state.live_entry(key, now) else {
            state.keys.insert(
                key.to_string(),
                Entry {
                    value: "1".to_string(),
                    expires_at: now + window,
                },
            );
            return Ok(WindowHit::Allowed);
        };

        let count: u32 = entry.value.parse().unwrap_or(limit);
        if count < limit {
            entry.value = (count + 1).to_string();
            return Ok(WindowHit::Allowed);
        }

        Ok(WindowHit::Denied {
            retry_after: entry.expires_at - now,
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
