//! Process configuration
//!
//! Loaded from environment variables (optionally seeded from a `.env` file by
//! the binary). Every knob has a default so a bare environment works.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Resource ceilings applied to every sandboxed process
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxLimits {
    /// Memory ceiling in docker notation (e.g., "128m")
    pub memory: String,
    /// CPU share (e.g., "0.5")
    pub cpus: String,
    /// Maximum number of processes
    pub pids: u32,
    /// Size of the writable/executable /tmp
    pub tmpfs_size: String,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory: "128m".to_string(),
            cpus: "0.5".to_string(),
            pids: 64,
            tmpfs_size: "64m".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub queue_name: String,
    /// Submissions allowed per client per window
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    /// Maximum UTF-8 byte length of submitted code
    pub max_code_size: usize,
    /// Default wall-clock deadline (profiles may override)
    pub execution_timeout: Duration,
    pub sandbox_limits: SandboxLimits,
    /// Per-stream character limit on captured output
    pub max_output_chars: usize,
    pub result_ttl: Duration,
    /// Worker loops per process
    pub worker_concurrency: usize,
    /// Optional language table replacing the builtin one
    pub languages_config: Option<PathBuf>,
    pub docker_bin: String,
    /// Parent directory of per-job workspaces (system temp dir when unset)
    pub workspace_root: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            queue_name: "code_execution_queue".to_string(),
            rate_limit_requests: 5,
            rate_limit_window: Duration::from_secs(60),
            max_code_size: 10 * 1024,
            execution_timeout: Duration::from_secs(5),
            sandbox_limits: SandboxLimits::default(),
            max_output_chars: 10_000,
            result_ttl: Duration::from_secs(300),
            worker_concurrency: 1,
            languages_config: None,
            docker_bin: "docker".to_string(),
            workspace_root: None,
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        // Workers and admission only meet through Redis; the in-memory store
        // cannot be shared across processes
        if let Some(backend) = lookup("STORE_BACKEND") {
            if !backend.trim().eq_ignore_ascii_case("redis") {
                anyhow::bail!(
                    "STORE_BACKEND={} is not supported, the worker requires redis",
                    backend
                );
            }
        }

        let config = Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            queue_name: lookup("QUEUE_NAME").unwrap_or(defaults.queue_name),
            rate_limit_requests: parse_or(&lookup, "RATE_LIMIT_REQUESTS", defaults.rate_limit_requests)?,
            rate_limit_window: secs_or(&lookup, "RATE_LIMIT_WINDOW", defaults.rate_limit_window)?,
            max_code_size: parse_or(&lookup, "MAX_CODE_SIZE", defaults.max_code_size)?,
            execution_timeout: secs_or(&lookup, "EXECUTION_TIMEOUT", defaults.execution_timeout)?,
            sandbox_limits: SandboxLimits {
                memory: lookup("EXECUTION_MEMORY").unwrap_or(defaults.sandbox_limits.memory),
                cpus: lookup("EXECUTION_CPUS").unwrap_or(defaults.sandbox_limits.cpus),
                pids: parse_or(&lookup, "EXECUTION_MAX_PIDS", defaults.sandbox_limits.pids)?,
                tmpfs_size: lookup("EXECUTION_TMPFS_SIZE")
                    .unwrap_or(defaults.sandbox_limits.tmpfs_size),
            },
            max_output_chars: parse_or(&lookup, "MAX_OUTPUT_CHARS", defaults.max_output_chars)?,
            result_ttl: secs_or(&lookup, "RESULT_TTL", defaults.result_ttl)?,
            worker_concurrency: parse_or(&lookup, "WORKER_CONCURRENCY", defaults.worker_concurrency)?,
            languages_config: lookup("LANGUAGES_CONFIG").map(PathBuf::from),
            docker_bin: lookup("DOCKER_BIN").unwrap_or(defaults.docker_bin),
            workspace_root: lookup("SANDBOX_WORKSPACE_ROOT").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rate_limit_requests == 0 {
            anyhow::bail!("RATE_LIMIT_REQUESTS must be at least 1");
        }
        if self.rate_limit_window.is_zero() {
            anyhow::bail!("RATE_LIMIT_WINDOW must be at least 1 second");
        }
        if self.execution_timeout.is_zero() {
            anyhow::bail!("EXECUTION_TIMEOUT must be at least 1 second");
        }
        if self.result_ttl.is_zero() {
            anyhow::bail!("RESULT_TTL must be at least 1 second");
        }
        if self.worker_concurrency == 0 {
            anyhow::bail!("WORKER_CONCURRENCY must be at least 1");
        }
        Ok(())
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}
