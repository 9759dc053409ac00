//! Container runtime abstraction
//!
//! The engine drives isolated processes only through this trait. The runtime
//! does NOT:
//! - Enforce the wall-clock deadline (the engine wraps `run` in a timeout)
//! - Truncate output beyond the byte budget
//! - Decide success or failure

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::SandboxLimits;
use crate::languages::LanguageProfile;

/// Path at which the job workspace is mounted inside the sandbox
pub const WORKSPACE_MOUNT: &str = "/app";

/// Everything needed to launch one sandboxed process
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Unique name, used to terminate the process on deadline
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// Host directory mounted read-write at `WORKSPACE_MOUNT`
    pub workspace: PathBuf,
    pub limits: SandboxLimits,
    /// Maximum bytes kept per output stream
    pub output_budget: usize,
    /// `uid:gid` the process runs as; `None` keeps the image's own user
    pub user: Option<String>,
}

/// Raw result of a process that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerOutcome {
    /// -1 when the process was killed by a signal
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub success: bool,
    /// Build diagnostics (stderr, or stdout when stderr is empty)
    pub log: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Verify the runtime is reachable
    async fn ping(&self) -> Result<()>;

    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Build (or pull) the image of a profile
    async fn build_image(&self, profile: &LanguageProfile) -> Result<BuildOutcome>;

    /// Launch the process and wait for it to exit
    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerOutcome>;

    /// Forcibly stop and remove a running process by name
    async fn terminate(&self, name: &str) -> Result<()>;
}
