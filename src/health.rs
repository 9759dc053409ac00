//! Dependency health check

use serde::Serialize;
use tracing::warn;

use crate::sandbox::ContainerRuntime;
use crate::store::SharedStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub store: bool,
    pub runtime: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.store && self.runtime
    }
}

/// Ping the shared store and the container runtime concurrently
pub async fn check(store: &dyn SharedStore, runtime: &dyn ContainerRuntime) -> HealthReport {
    let (store_result, runtime_result) = tokio::join!(store.ping(), runtime.ping());

    if let Err(e) = &store_result {
        warn!("Store health check failed: {:#}", e);
    }
    if let Err(e) = &runtime_result {
        warn!("Container runtime health check failed: {:#}", e);
    }

    HealthReport {
        store: store_result.is_ok(),
        runtime: runtime_result.is_ok(),
    }
}
