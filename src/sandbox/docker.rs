//! Docker container runtime
//!
//! Thin wrapper around the docker CLI. Every process runs with no network, a
//! read-only root filesystem, a small exec-capable tmpfs at /tmp, the job
//! workspace mounted at /app, hard memory/CPU/pid ceilings, all capabilities
//! dropped and privilege escalation disabled.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::output::read_capped;
use super::runtime::{BuildOutcome, ContainerOutcome, ContainerRuntime, ContainerSpec, WORKSPACE_MOUNT};
use crate::languages::LanguageProfile;

/// Upper bound on a single image build or pull
const BUILD_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker_bin: String,
}

impl DockerRuntime {
    pub fn new(docker_bin: impl Into<String>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.docker_bin);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }
}

/// Arguments for `docker run`
pub fn run_args(spec: &ContainerSpec) -> Vec<String> {
    let limits = &spec.limits;

    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--pull=never".to_string(),
        "--network=none".to_string(),
        "--read-only".to_string(),
        "--tmpfs".to_string(),
        format!("/tmp:rw,exec,nosuid,size={}", limits.tmpfs_size),
        format!("--memory={}", limits.memory),
        // Equal to --memory so the ceiling cannot be dodged through swap
        format!("--memory-swap={}", limits.memory),
        format!("--cpus={}", limits.cpus),
        format!("--pids-limit={}", limits.pids),
        "--security-opt=no-new-privileges".to_string(),
        "--cap-drop=ALL".to_string(),
        "-v".to_string(),
        format!("{}:{}:rw", spec.workspace.display(), WORKSPACE_MOUNT),
        "-w".to_string(),
        WORKSPACE_MOUNT.to_string(),
    ];
    if let Some(user) = &spec.user {
        args.push(format!("--user={}", user));
    }
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        let output = self
            .command()
            .args(["version", "--format", "{{.Server.Version}}"])
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.docker_bin))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Docker daemon is not reachable: {}", stderr.trim());
        }

        debug!(
            "Docker server version {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let status = self
            .command()
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("Failed to run {} image inspect", self.docker_bin))?;

        Ok(status.success())
    }

    async fn build_image(&self, profile: &LanguageProfile) -> Result<BuildOutcome> {
        let mut cmd = self.command();
        match &profile.build_source {
            Some(context_dir) => {
                info!(
                    "Building image {} from {}",
                    profile.image_ref,
                    context_dir.display()
                );
                cmd.arg("build")
                    .arg("-t")
                    .arg(&profile.image_ref)
                    .arg(context_dir);
            }
            None => {
                info!("Pulling image {}", profile.image_ref);
                cmd.arg("pull").arg(&profile.image_ref);
            }
        }

        let output = match tokio::time::timeout(BUILD_TIMEOUT, cmd.output()).await {
            Ok(output) => output.context("Failed to run image build")?,
            Err(_) => {
                return Ok(BuildOutcome {
                    success: false,
                    log: format!(
                        "Image build timed out after {}s",
                        BUILD_TIMEOUT.as_secs()
                    ),
                })
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let log = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };

        Ok(BuildOutcome {
            success: output.status.success(),
            log,
        })
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerOutcome> {
        let args = run_args(spec);
        debug!("Running docker with args: {:?}", args);

        let mut child = self
            .command()
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.docker_bin))?;

        let stdout = child.stdout.take().context("Container stdout not captured")?;
        let stderr = child.stderr.take().context("Container stderr not captured")?;

        let (status, stdout, stderr) = tokio::try_join!(
            child.wait(),
            read_capped(stdout, spec.output_budget),
            read_capped(stderr, spec.output_budget),
        )
        .context("Failed to collect container output")?;

        Ok(ContainerOutcome {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn terminate(&self, name: &str) -> Result<()> {
        let output = self
            .command()
            .args(["rm", "-f", name])
            .output()
            .await
            .with_context(|| format!("Failed to run {} rm", self.docker_bin))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Already gone (--rm raced us) is fine
            if !stderr.contains("No such container") {
                warn!("Failed to remove container {}: {}", name, stderr.trim());
            }
        }
        Ok(())
    }
}
