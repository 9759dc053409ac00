//! Worker loop - drains the job queue into the result store
//!
//! Each loop blocks on the queue, runs the job through the sandbox engine and
//! writes exactly one result record. Failures of a single job are logged and
//! never stop the loop; only a broker failure on dequeue ends it.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::{error, info};

use crate::queue::{unix_now, Job, JobQueue};
use crate::results::{ResultRecord, ResultStatus, ResultStore};
use crate::sandbox::{ExecutionResult, SandboxEngine};

/// Output stored for a failed job that produced no stderr
pub const GENERIC_FAILURE: &str = "Execution failed";

pub struct Worker {
    id: usize,
    queue: JobQueue,
    engine: Arc<SandboxEngine>,
    results: ResultStore,
}

impl Worker {
    pub fn new(id: usize, queue: JobQueue, engine: Arc<SandboxEngine>, results: ResultStore) -> Self {
        Self {
            id,
            queue,
            engine,
            results,
        }
    }

    /// Consume jobs until the queue itself fails
    pub async fn run(&self) -> Result<()> {
        info!("Worker {} waiting for jobs on {}", self.id, self.queue.name());

        loop {
            let job = self.queue.dequeue().await?;
            self.handle(&job).await;
        }
    }

    /// Execute one job and persist its record; errors are logged, not returned
    pub async fn handle(&self, job: &Job) {
        info!(
            "Worker {} received job: job_id={}, language={}",
            self.id, job.job_id, job.language
        );

        let record = self.process(job).await;

        if let Err(e) = self.results.put(&job.job_id, &record).await {
            error!("Failed to store result for job {}: {:#}", job.job_id, e);
            return;
        }

        info!(
            "Job completed: job_id={}, status={:?}, execution_time={:.3}s",
            job.job_id, record.status, record.execution_time
        );
    }

    async fn process(&self, job: &Job) -> ResultRecord {
        let started = Instant::now();
        let result = self.engine.run(&job.language, &job.code).await;
        let mut record = to_record(result);
        record.execution_time = round_millis(started.elapsed().as_secs_f64());
        record
    }
}

/// Classify an execution by exit code alone
pub fn to_record(result: ExecutionResult) -> ResultRecord {
    let (status, output) = if result.is_success() {
        (ResultStatus::Success, result.stdout)
    } else if result.stderr.is_empty() {
        (ResultStatus::Error, GENERIC_FAILURE.to_string())
    } else {
        (ResultStatus::Error, result.stderr)
    };

    ResultRecord {
        status,
        output,
        execution_time: round_millis(result.execution_time_seconds),
        stored_at: unix_now(),
    }
}

fn round_millis(secs: f64) -> f64 {
    (secs * 1000.0).round() / 1000.0
}
