//! Sandboxed code execution pipeline
//!
//! Submissions are validated and rate limited by the [`AdmissionController`],
//! queued on a shared store, executed by [`Worker`] loops inside isolated
//! containers and published to a TTL-bounded result store that clients poll.

pub mod admission;
pub mod config;
pub mod error;
pub mod health;
pub mod languages;
pub mod queue;
pub mod rate_limiter;
pub mod results;
pub mod sandbox;
pub mod store;
pub mod worker;

pub use admission::{AdmissionController, Submission};
pub use config::Config;
pub use error::{Rejection, SandboxError};
pub use languages::{LanguageProfile, LanguageRegistry};
pub use results::{PollResponse, ResultRecord, ResultStatus};
pub use sandbox::{ExecutionResult, SandboxEngine};
pub use worker::Worker;
