//! Scripted container runtime for tests

use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::runtime::{BuildOutcome, ContainerOutcome, ContainerRuntime, ContainerSpec};
use crate::languages::LanguageProfile;

pub enum Behavior {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// Never exits on its own
    Hang,
    /// The runtime itself fails
    Fault(String),
}

type BehaviorFn = Box<dyn Fn(&str) -> Behavior + Send + Sync>;

pub struct FakeRuntime {
    existing: Mutex<HashSet<String>>,
    build_ok: bool,
    build_delay: Duration,
    behavior: BehaviorFn,
    pub builds: AtomicUsize,
    builds_in_flight: AtomicUsize,
    /// Highest number of builds observed running at once
    pub max_builds_in_flight: AtomicUsize,
    pub workspaces: Mutex<Vec<PathBuf>>,
    /// Workspace owner uid and requested user, captured while each process runs
    pub run_identities: Mutex<Vec<(u32, Option<String>)>>,
    pub terminated: Mutex<Vec<String>>,
}

impl FakeRuntime {
    /// Runtime whose processes echo a tiny subset of Python:
    /// `print('x')` prints x, code containing `while True` hangs and
    /// code containing `raise` fails with a traceback.
    pub fn new() -> Self {
        Self::with_behavior(|source| {
            if source.contains("while True") {
                Behavior::Hang
            } else if source.contains("raise") {
                Behavior::Exit {
                    code: 1,
                    stdout: String::new(),
                    stderr: "Traceback (most recent call last):\nValueError".to_string(),
                }
            } else {
                let stdout = source
                    .lines()
                    .filter_map(|line| {
                        line.trim()
                            .strip_prefix("print('")
                            .and_then(|rest| rest.strip_suffix("')"))
                    })
                    .map(|text| format!("{}\n", text))
                    .collect();
                Behavior::Exit {
                    code: 0,
                    stdout,
                    stderr: String::new(),
                }
            }
        })
    }

    pub fn with_behavior(behavior: impl Fn(&str) -> Behavior + Send + Sync + 'static) -> Self {
        Self {
            existing: Mutex::new(HashSet::new()),
            build_ok: true,
            build_delay: Duration::from_millis(20),
            behavior: Box::new(behavior),
            builds: AtomicUsize::new(0),
            builds_in_flight: AtomicUsize::new(0),
            max_builds_in_flight: AtomicUsize::new(0),
            workspaces: Mutex::new(Vec::new()),
            run_identities: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_builds(mut self) -> Self {
        self.build_ok = false;
        self
    }

    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = delay;
        self
    }

    pub fn with_image(self, image: &str) -> Self {
        self.existing.lock().unwrap().insert(image.to_string());
        self
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.existing.lock().unwrap().contains(image))
    }

    async fn build_image(&self, profile: &LanguageProfile) -> Result<BuildOutcome> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let running = self.builds_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_builds_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.build_delay).await;
        self.builds_in_flight.fetch_sub(1, Ordering::SeqCst);

        if !self.build_ok {
            return Ok(BuildOutcome {
                success: false,
                log: "step 2/4: apk add failed".to_string(),
            });
        }

        self.existing
            .lock()
            .unwrap()
            .insert(profile.image_ref.clone());
        Ok(BuildOutcome {
            success: true,
            log: String::new(),
        })
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<ContainerOutcome> {
        self.workspaces.lock().unwrap().push(spec.workspace.clone());
        let owner = std::fs::metadata(&spec.workspace)?.uid();
        self.run_identities
            .lock()
            .unwrap()
            .push((owner, spec.user.clone()));

        let entry = std::fs::read_dir(&spec.workspace)?
            .next()
            .ok_or_else(|| anyhow::anyhow!("workspace is empty"))??;
        let source = std::fs::read_to_string(entry.path())?;

        match (self.behavior)(&source) {
            Behavior::Exit {
                code,
                stdout,
                stderr,
            } => Ok(ContainerOutcome {
                exit_code: code,
                stdout: stdout.into_bytes(),
                stderr: stderr.into_bytes(),
            }),
            Behavior::Hang => std::future::pending().await,
            Behavior::Fault(message) => Err(anyhow::anyhow!(message)),
        }
    }

    async fn terminate(&self, name: &str) -> Result<()> {
        self.terminated.lock().unwrap().push(name.to_string());
        Ok(())
    }
}
