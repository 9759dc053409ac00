//! Sandbox execution engine
//!
//! Single entry point (`SandboxEngine::run`) that owns every side effect of
//! executing untrusted code:
//! - Resolving the language profile
//! - Making sure the sandbox image exists (building it at most once)
//! - Materializing a private workspace holding the source file
//! - Launching the isolated process under a wall-clock deadline
//! - Bounding captured output
//!
//! Every failure is folded into an `ExecutionResult` with exit code -1. The
//! workspace is removed on every exit path.

pub mod docker;
pub mod images;
pub mod output;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{Config, SandboxLimits};
use crate::error::SandboxError;
use crate::languages::{LanguageProfile, LanguageRegistry};

pub use self::docker::DockerRuntime;
pub use self::images::ImageCache;
pub use self::output::TRUNCATION_MARKER;
pub use self::runtime::{ContainerRuntime, ContainerSpec};

/// Uid and gid of the unprivileged user baked into the sandbox images
pub const SANDBOX_UID: u32 = 1000;

/// Result of one sandboxed execution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// -1 for timeouts, build failures and engine faults
    pub exit_code: i32,
    pub execution_time_seconds: f64,
}

impl ExecutionResult {
    /// Exit code alone decides success; stderr output does not
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    fn failure(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: -1,
            execution_time_seconds: 0.0,
        }
    }

    fn timed_out(deadline: Duration) -> Self {
        Self::failure(timeout_message(deadline))
    }
}

pub fn timeout_message(deadline: Duration) -> String {
    format!(
        "Execution timed out after {}s (possible infinite loop)",
        deadline.as_secs_f64()
    )
}

/// Engine settings taken from the process configuration
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub limits: SandboxLimits,
    pub default_timeout: Duration,
    pub max_output_chars: usize,
    pub workspace_root: Option<PathBuf>,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            limits: config.sandbox_limits.clone(),
            default_timeout: config.execution_timeout,
            max_output_chars: config.max_output_chars,
            workspace_root: config.workspace_root.clone(),
        }
    }
}

pub struct SandboxEngine {
    registry: Arc<LanguageRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    images: ImageCache,
    settings: EngineSettings,
}

impl SandboxEngine {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            runtime,
            images: ImageCache::new(),
            settings,
        }
    }

    /// Run `source_code` as `language` inside the sandbox. Never fails.
    pub async fn run(&self, language: &str, source_code: &str) -> ExecutionResult {
        let started = Instant::now();

        let mut result = match self.try_run(language, source_code).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Sandbox execution failed for {}: {}", language, e);
                ExecutionResult::failure(e.to_string())
            }
        };

        result.execution_time_seconds = started.elapsed().as_secs_f64();
        result
    }

    async fn try_run(&self, language: &str, source_code: &str) -> Result<ExecutionResult, SandboxError> {
        let profile = self
            .registry
            .get(language)
            .ok_or_else(|| SandboxError::UnknownLanguage(language.trim().to_string()))?;

        self.images.ensure(self.runtime.as_ref(), profile).await?;

        let workspace = Workspace::create(
            self.settings.workspace_root.as_deref(),
            &profile.entry_filename,
            source_code,
        )
        .map_err(SandboxError::Workspace)?;

        let result = self.execute(profile, &workspace).await;
        workspace.close();
        result
    }

    async fn execute(&self, profile: &LanguageProfile, workspace: &Workspace) -> Result<ExecutionResult, SandboxError> {
        let spec = ContainerSpec {
            name: format!("coderun-{}", Uuid::new_v4()),
            image: profile.image_ref.clone(),
            command: profile.run_command.clone(),
            workspace: workspace.path().to_path_buf(),
            limits: self.settings.limits.clone(),
            output_budget: output::capture_budget(self.settings.max_output_chars),
            user: workspace.user.clone(),
        };
        let deadline = profile.deadline(self.settings.default_timeout);

        debug!(
            "Launching {} for {} (deadline {:?})",
            spec.name, profile.id, deadline
        );

        let outcome = match tokio::time::timeout(deadline, self.runtime.run(&spec)).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                warn!("Container {} exceeded {:?}, terminating", spec.name, deadline);
                if let Err(e) = self.runtime.terminate(&spec.name).await {
                    warn!("Failed to terminate container {}: {:#}", spec.name, e);
                }
                return Ok(ExecutionResult::timed_out(deadline));
            }
        };

        let max_chars = self.settings.max_output_chars;
        Ok(ExecutionResult {
            stdout: output::truncate_output(
                String::from_utf8_lossy(&outcome.stdout).into_owned(),
                max_chars,
            ),
            stderr: output::truncate_output(
                String::from_utf8_lossy(&outcome.stderr).into_owned(),
                max_chars,
            ),
            exit_code: outcome.exit_code,
            execution_time_seconds: 0.0,
        })
    }
}

/// Process-private directory holding the source file, removed on drop.
///
/// The directory is writable by whoever the container runs as: a root worker
/// hands it to `SANDBOX_UID`, any other worker runs the container as itself.
struct Workspace {
    dir: TempDir,
    user: Option<String>,
}

impl Workspace {
    fn create(root: Option<&Path>, entry_filename: &str, source_code: &str) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("coderun-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755))?;
        let entry = dir.path().join(entry_filename);
        fs::write(&entry, source_code)?;
        fs::set_permissions(&entry, fs::Permissions::from_mode(0o644))?;

        let owner = fs::metadata(dir.path())?;
        let user = if owner.uid() == 0 {
            std::os::unix::fs::chown(dir.path(), Some(SANDBOX_UID), Some(SANDBOX_UID))?;
            std::os::unix::fs::chown(&entry, Some(SANDBOX_UID), Some(SANDBOX_UID))?;
            None
        } else {
            Some(format!("{}:{}", owner.uid(), owner.gid()))
        };

        Ok(Self { dir, user })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("Failed to remove workspace {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Behavior, FakeRuntime};
    use super::*;
    use std::sync::atomic::Ordering;

    fn settings(timeout_secs: u64, max_output_chars: usize) -> EngineSettings {
        EngineSettings {
            limits: SandboxLimits::default(),
            default_timeout: Duration::from_secs(timeout_secs),
            max_output_chars,
            workspace_root: None,
        }
    }

    fn engine(runtime: Arc<FakeRuntime>) -> SandboxEngine {
        SandboxEngine::new(
            Arc::new(LanguageRegistry::builtin().unwrap()),
            runtime,
            settings(5, 10_000),
        )
    }

    #[tokio::test]
    async fn test_runs_code_and_cleans_workspace() {
        let runtime = Arc::new(FakeRuntime::new());
        let result = engine(runtime.clone()).run("python", "print('hello')").await;

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "");

        let workspaces = runtime.workspaces.lock().unwrap();
        assert_eq!(workspaces.len(), 1);
        assert!(!workspaces[0].exists());
    }

    #[tokio::test]
    async fn test_unknown_language_is_synthetic_failure() {
        let runtime = Arc::new(FakeRuntime::new());
        let result = engine(runtime.clone()).run("ruby", "puts 1").await;

        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("ruby"));
        assert!(runtime.workspaces.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_kills_and_cleans_up() {
        let runtime = Arc::new(FakeRuntime::new());
        let engine = engine(runtime.clone());

        let result = engine.run("python", "while True:\n    pass").await;

        assert_eq!(result.exit_code, -1);
        assert_eq!(result.stdout, "");
        assert_eq!(result.stderr, timeout_message(Duration::from_secs(5)));
        assert_eq!(runtime.terminated.lock().unwrap().len(), 1);
        assert!(!runtime.workspaces.lock().unwrap()[0].exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_java_gets_longer_deadline() {
        let runtime = Arc::new(FakeRuntime::new());
        let result = engine(runtime).run("java", "while True").await;
        assert_eq!(result.stderr, timeout_message(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_build_failure_aborts_job() {
        let runtime = Arc::new(FakeRuntime::new().failing_builds());
        let result = engine(runtime.clone()).run("python", "print('x')").await;

        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("apk add failed"));
        assert!(runtime.workspaces.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_build_once() {
        let runtime = Arc::new(FakeRuntime::new());
        let engine = Arc::new(engine(runtime.clone()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.run("python", &format!("print('{}')", i)).await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().exit_code, 0);
        }
        assert_eq!(runtime.build_count(), 1);
    }

    #[tokio::test]
    async fn test_waiters_share_a_failed_build() {
        let runtime = Arc::new(FakeRuntime::new().failing_builds());
        let engine = Arc::new(engine(runtime.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.run("python", "print('x')").await })
            })
            .collect();

        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.exit_code, -1);
            assert!(result.stderr.contains("apk add failed"));
        }
        assert_eq!(runtime.build_count(), 1);

        // A request arriving after the failure tries again
        engine.run("python", "print('x')").await;
        assert_eq!(runtime.build_count(), 2);
    }

    #[tokio::test]
    async fn test_different_images_build_in_parallel() {
        let runtime = Arc::new(FakeRuntime::new().with_build_delay(Duration::from_millis(100)));
        let engine = engine(runtime.clone());

        let (python, javascript) = tokio::join!(
            engine.run("python", "print('py')"),
            engine.run("javascript", "print('js')"),
        );

        assert_eq!(python.stdout, "py\n");
        assert_eq!(javascript.stdout, "js\n");
        assert_eq!(runtime.build_count(), 2);
        assert_eq!(runtime.max_builds_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_workspace_is_owned_by_the_container_user() {
        let runtime = Arc::new(FakeRuntime::new());
        engine(runtime.clone()).run("python", "print('x')").await;

        let identities = runtime.run_identities.lock().unwrap();
        assert_eq!(identities.len(), 1);
        match &identities[0] {
            (owner, Some(user)) => {
                assert_ne!(*owner, 0);
                assert!(user.starts_with(&format!("{}:", owner)));
            }
            (owner, None) => assert_eq!(*owner, SANDBOX_UID),
        }
    }

    #[tokio::test]
    async fn test_existing_image_is_not_rebuilt() {
        let runtime = Arc::new(FakeRuntime::new().with_image("coderun-python:latest"));
        engine(runtime.clone()).run("python", "print('x')").await;
        assert_eq!(runtime.build_count(), 0);
    }

    #[tokio::test]
    async fn test_output_is_truncated_per_stream() {
        let runtime = Arc::new(FakeRuntime::with_behavior(|_| Behavior::Exit {
            code: 3,
            stdout: "o".repeat(500),
            stderr: "e".repeat(50),
        }));
        let engine = SandboxEngine::new(
            Arc::new(LanguageRegistry::builtin().unwrap()),
            runtime,
            settings(5, 100),
        );

        let result = engine.run("python", "anything").await;
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout.chars().count(), 100 + TRUNCATION_MARKER.chars().count());
        assert!(result.stdout.ends_with(TRUNCATION_MARKER));
        assert_eq!(result.stderr, "e".repeat(50));
    }

    #[tokio::test]
    async fn test_runtime_fault_becomes_result() {
        let runtime = Arc::new(FakeRuntime::with_behavior(|_| {
            Behavior::Fault("Cannot connect to the Docker daemon".to_string())
        }));
        let result = engine(runtime.clone()).run("python", "print(1)").await;

        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("Docker daemon"));
        assert!(!runtime.workspaces.lock().unwrap()[0].exists());
    }

    #[tokio::test]
    async fn test_source_written_to_entry_file() {
        let runtime = Arc::new(FakeRuntime::with_behavior(|source| Behavior::Exit {
            code: 0,
            stdout: source.to_string(),
            stderr: String::new(),
        }));
        let result = engine(runtime).run("  JavaScript ", "console.log(1)").await;
        assert_eq!(result.stdout, "console.log(1)");
    }

    #[test]
    fn test_zero_exit_with_stderr_is_success() {
        let result = ExecutionResult {
            stdout: String::new(),
            stderr: "DeprecationWarning".to_string(),
            exit_code: 0,
            execution_time_seconds: 0.1,
        };
        assert!(result.is_success());
    }
}
