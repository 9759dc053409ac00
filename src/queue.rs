//! Job queue - durable handoff from admission to workers
//!
//! Jobs are serialized as flat JSON objects and appended to a single list in
//! the shared store. Workers block on the head of that list.
//!
//! Known limitation: there is no acknowledgement. A job popped by a worker
//! that dies before writing its result is lost, and its poll keeps reporting
//! "running" until the client gives up.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::SharedStore;

/// Job persisted on the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub language: String,
    pub code: String,
    /// Unix seconds at enqueue time
    #[serde(default)]
    pub enqueued_at: u64,
}

impl Job {
    /// Create a job with a freshly generated id
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            language: language.into(),
            code: code.into(),
            enqueued_at: unix_now(),
        }
    }
}

#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn SharedStore>,
    name: String,
}

impl JobQueue {
    pub fn new(store: Arc<dyn SharedStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a job to the tail of the queue and return its id
    pub async fn enqueue(&self, job: &Job) -> Result<String> {
        let payload = serde_json::to_string(job)?;
        self.store
            .push(&self.name, &payload)
            .await
            .with_context(|| format!("Failed to enqueue job {}", job.job_id))?;
        debug!("Enqueued job {} on {}", job.job_id, self.name);
        Ok(job.job_id.clone())
    }

    /// Block until a job is available and claim it.
    ///
    /// Entries that fail to parse are logged and skipped.
    pub async fn dequeue(&self) -> Result<Job> {
        loop {
            let payload = self.store.pop_blocking(&self.name).await?;
            match serde_json::from_str::<Job>(&payload) {
                Ok(job) => return Ok(job),
                Err(e) => {
                    warn!("Failed to parse job data: {}. Data: {}", e, payload);
                    continue;
                }
            }
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_job_wire_shape() {
        let job = Job {
            job_id: "abc".to_string(),
            language: "python".to_string(),
            code: "print(1)".to_string(),
            enqueued_at: 7,
        };

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["jobId"], "abc");
        assert_eq!(json["language"], "python");
        assert_eq!(json["code"], "print(1)");
    }

    #[test]
    fn test_job_accepts_minimal_payload() {
        let job: Job =
            serde_json::from_str(r#"{"jobId":"x","language":"java","code":"class Main {}"}"#)
                .unwrap();
        assert_eq!(job.job_id, "x");
        assert_eq!(job.enqueued_at, 0);
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = Job::new("python", "print(1)");
        let b = Job::new("python", "print(1)");
        assert_ne!(a.job_id, b.job_id);
    }

    #[tokio::test]
    async fn test_dequeue_preserves_order_and_skips_garbage() {
        let store = Arc::new(MemoryStore::new());
        let queue = JobQueue::new(store.clone(), "jobs");

        let first = Job::new("python", "print(1)");
        let second = Job::new("python", "print(2)");
        queue.enqueue(&first).await.unwrap();
        store.push("jobs", "not json").await.unwrap();
        queue.enqueue(&second).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap(), first);
        assert_eq!(queue.dequeue().await.unwrap(), second);
        assert!(store.is_empty("jobs"));
    }
}
