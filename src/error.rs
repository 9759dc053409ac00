//! Error types at the pipeline boundaries

use serde::Serialize;
use thiserror::Error;

/// Synchronous rejection of a submission. No job id is issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Code cannot be empty")]
    EmptyCode,

    #[error("Code size of {size} bytes exceeds the {limit} byte limit")]
    CodeTooLarge { size: usize, limit: usize },

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Job queue unavailable: {0}")]
    QueueUnavailable(String),
}

impl Rejection {
    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::EmptyCode => "empty_code",
            Rejection::CodeTooLarge { .. } => "code_too_large",
            Rejection::UnsupportedLanguage(_) => "unsupported_language",
            Rejection::RateLimited { .. } => "rate_limited",
            Rejection::QueueUnavailable(_) => "queue_unavailable",
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Rejection::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Wire body handed to the transport layer
    pub fn body(&self) -> RejectionBody {
        RejectionBody {
            kind: self.kind(),
            detail: self.to_string(),
            retry_after: self.retry_after(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub kind: &'static str,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Failures inside the sandbox engine. Never escapes `SandboxEngine::run`.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Execution for '{0}' is not supported")]
    UnknownLanguage(String),

    #[error("Failed to build image {image}: {log}")]
    BuildFailed { image: String, log: String },

    #[error("Failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("Container runtime failure: {0:#}")]
    Runtime(#[from] anyhow::Error),
}
