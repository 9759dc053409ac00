//! Image availability with per-image build exclusion
//!
//! Each image reference gets its own lazily created async mutex, kept for the
//! process lifetime. Builds of different images proceed in parallel; callers
//! asking for an image that is being built wait for that build and then
//! re-check instead of building again. When the build they waited on failed,
//! they share its failure; only callers arriving after it try again.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::runtime::ContainerRuntime;
use crate::error::SandboxError;
use crate::languages::LanguageProfile;

/// Build exclusion and last outcome for one image reference
#[derive(Debug, Default)]
struct BuildSlot {
    /// Completed build attempts, bumped while `last_failure` is held
    attempts: AtomicU64,
    /// Log of the most recent attempt, if it failed
    last_failure: tokio::sync::Mutex<Option<String>>,
}

#[derive(Debug, Default)]
pub struct ImageCache {
    /// Images known to exist
    ready: Mutex<HashSet<String>>,
    slots: Mutex<HashMap<String, Arc<BuildSlot>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self, image: &str) -> bool {
        lock(&self.ready).contains(image)
    }

    fn mark_ready(&self, image: &str) {
        lock(&self.ready).insert(image.to_string());
    }

    fn slot(&self, image: &str) -> Arc<BuildSlot> {
        lock(&self.slots)
            .entry(image.to_string())
            .or_default()
            .clone()
    }

    async fn exists(&self, runtime: &dyn ContainerRuntime, image: &str) -> Result<bool, SandboxError> {
        if self.is_ready(image) {
            return Ok(true);
        }
        if runtime.image_exists(image).await? {
            self.mark_ready(image);
            return Ok(true);
        }
        Ok(false)
    }

    /// Make sure the profile's image exists, building it at most once
    pub async fn ensure(
        &self,
        runtime: &dyn ContainerRuntime,
        profile: &LanguageProfile,
    ) -> Result<(), SandboxError> {
        let image = profile.image_ref.as_str();
        if self.exists(runtime, image).await? {
            return Ok(());
        }

        let slot = self.slot(image);
        let seen = slot.attempts.load(Ordering::SeqCst);
        let mut last_failure = slot.last_failure.lock().await;

        // Another caller may have finished the build while we waited
        if self.exists(runtime, image).await? {
            debug!("Image {} became available while waiting", image);
            return Ok(());
        }
        if slot.attempts.load(Ordering::SeqCst) != seen {
            if let Some(log) = last_failure.as_ref() {
                debug!("Reusing failed build of image {}", image);
                return Err(SandboxError::BuildFailed {
                    image: image.to_string(),
                    log: log.clone(),
                });
            }
        }

        info!("Image {} missing, building for {}", image, profile.id);
        let outcome = runtime.build_image(profile).await;
        slot.attempts.fetch_add(1, Ordering::SeqCst);

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                *last_failure = Some(format!("{:#}", e));
                return Err(e.into());
            }
        };
        if !outcome.success {
            warn!("Build of image {} failed", image);
            *last_failure = Some(outcome.log.clone());
            return Err(SandboxError::BuildFailed {
                image: image.to_string(),
                log: outcome.log,
            });
        }

        info!("Image {} built successfully", image);
        *last_failure = None;
        self.mark_ready(image);
        Ok(())
    }
}
