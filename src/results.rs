//! Result store - TTL-bounded job outcomes polled by clients

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{keys, SharedStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Terminal outcome of a job as persisted in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub status: ResultStatus,
    pub output: String,
    /// Wall time spent by the worker, in seconds
    pub execution_time: f64,
    /// Unix seconds at write time
    #[serde(default)]
    pub stored_at: u64,
}

/// What a client sees when polling
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollResponse {
    /// Not completed yet, never existed, or already expired
    Running,
    #[serde(rename_all = "camelCase")]
    Completed {
        output: String,
        result: ResultStatus,
        execution_time: f64,
    },
}

impl From<ResultRecord> for PollResponse {
    fn from(record: ResultRecord) -> Self {
        PollResponse::Completed {
            output: record.output,
            result: record.status,
            execution_time: record.execution_time,
        }
    }
}

#[derive(Clone)]
pub struct ResultStore {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
}

impl ResultStore {
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn put(&self, job_id: &str, record: &ResultRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.store
            .put_with_ttl(&keys::result(job_id), &json, self.ttl)
            .await
            .with_context(|| format!("Failed to store result for job {}", job_id))
    }

    /// Fetch a record. `None` covers both "not finished" and "expired".
    pub async fn get(&self, job_id: &str) -> Result<Option<ResultRecord>> {
        let Some(json) = self.store.get(&keys::result(job_id)).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&json) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("Discarding unreadable result for job {}: {}", job_id, e);
                Ok(None)
            }
        }
    }
}
