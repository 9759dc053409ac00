//! Admission controller - the synchronous half of the pipeline
//!
//! `submit` validates a submission, charges the client's rate limit and hands
//! a fresh job to the queue without waiting for execution. `poll` reads the
//! result store. Both are what a transport layer (HTTP, CLI) calls.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Rejection;
use crate::languages::LanguageRegistry;
use crate::queue::{Job, JobQueue};
use crate::rate_limiter::{RateDecision, RateLimiter};
use crate::results::{PollResponse, ResultStore};
use crate::store::SharedStore;

/// Accepted submission, serialized as `{"status":"queued","jobId":...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename = "queued", rename_all = "camelCase")]
pub struct Submission {
    pub job_id: String,
}

pub struct AdmissionController {
    registry: Arc<LanguageRegistry>,
    rate_limiter: RateLimiter,
    queue: JobQueue,
    results: ResultStore,
    max_code_size: usize,
}

impl AdmissionController {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        rate_limiter: RateLimiter,
        queue: JobQueue,
        results: ResultStore,
        max_code_size: usize,
    ) -> Self {
        Self {
            registry,
            rate_limiter,
            queue,
            results,
            max_code_size,
        }
    }

    /// Wire every component to one shared store using the process configuration
    pub fn from_config(
        config: &Config,
        registry: Arc<LanguageRegistry>,
        store: Arc<dyn SharedStore>,
    ) -> Self {
        Self::new(
            registry,
            RateLimiter::new(
                store.clone(),
                config.rate_limit_requests,
                config.rate_limit_window,
            ),
            JobQueue::new(store.clone(), config.queue_name.clone()),
            ResultStore::new(store, config.result_ttl),
            config.max_code_size,
        )
    }

    /// Validate and enqueue a submission.
    ///
    /// Checks run in order and stop at the first failure: empty code, code
    /// size in bytes, language, rate limit. Nothing is enqueued on rejection.
    pub async fn submit(
        &self,
        code: &str,
        language: &str,
        client_id: &str,
    ) -> Result<Submission, Rejection> {
        if code.trim().is_empty() {
            return Err(Rejection::EmptyCode);
        }

        if code.len() > self.max_code_size {
            return Err(Rejection::CodeTooLarge {
                size: code.len(),
                limit: self.max_code_size,
            });
        }

        let profile = self
            .registry
            .get(language)
            .ok_or_else(|| Rejection::UnsupportedLanguage(language.trim().to_string()))?;

        match self.rate_limiter.check(client_id).await {
            Ok(RateDecision::Allowed) => {}
            Ok(RateDecision::Limited { retry_after_secs }) => {
                return Err(Rejection::RateLimited { retry_after_secs });
            }
            Err(e) => {
                warn!("Rate limit check failed for {}: {:#}", client_id, e);
                return Err(Rejection::QueueUnavailable(format!("{:#}", e)));
            }
        }

        let job = Job::new(profile.id.clone(), code);
        let job_id = self.queue.enqueue(&job).await.map_err(|e| {
            warn!("Failed to enqueue submission from {}: {:#}", client_id, e);
            Rejection::QueueUnavailable(format!("{:#}", e))
        })?;

        info!(
            "Job queued: job_id={}, language={}, client={}",
            job_id, profile.id, client_id
        );
        Ok(Submission { job_id })
    }

    /// Current state of a job. Unknown, expired and unfinished jobs all read as running.
    pub async fn poll(&self, job_id: &str) -> Result<PollResponse> {
        Ok(match self.results.get(job_id).await? {
            Some(record) => record.into(),
            None => PollResponse::Running,
        })
    }
}
