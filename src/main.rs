use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use coderun::config::Config;
use coderun::health;
use coderun::languages::LanguageRegistry;
use coderun::queue::JobQueue;
use coderun::results::ResultStore;
use coderun::sandbox::{ContainerRuntime, DockerRuntime, EngineSettings, SandboxEngine};
use coderun::store::{RedisStore, SharedStore};
use coderun::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("coderun=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    let registry = match &config.languages_config {
        Some(path) => {
            let registry = LanguageRegistry::from_file(path)?;
            info!("Loaded language configurations from {}", path.display());
            registry
        }
        None => LanguageRegistry::builtin()?,
    };
    info!(
        "Supported languages: {}",
        registry.supported_languages().join(", ")
    );

    info!("Starting Code Execution Worker...");

    // Fail fast when containers cannot be launched at all
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::new(config.docker_bin.clone()));
    runtime
        .ping()
        .await
        .context("Container runtime is unavailable")?;
    info!("Confirmed container runtime is available");

    let stores = connect_stores(&config).await?;
    let primary = stores.first().context("No store connection available")?;
    let report = health::check(primary.as_ref(), runtime.as_ref()).await;
    if report.is_healthy() {
        info!("Health check passed: {:?}", report);
    } else {
        warn!("Health check degraded: {:?}", report);
    }

    let engine = Arc::new(SandboxEngine::new(
        Arc::new(registry),
        runtime,
        EngineSettings::from(&config),
    ));

    let mut workers = JoinSet::new();
    for (id, store) in stores.into_iter().enumerate() {
        let worker = Worker::new(
            id,
            JobQueue::new(store.clone(), config.queue_name.clone()),
            engine.clone(),
            ResultStore::new(store, config.result_ttl),
        );
        workers.spawn(async move { (id, worker.run().await) });
    }
    info!(
        "Spawned {} worker(s), waiting for jobs...",
        config.worker_concurrency
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping workers");
        }
        Some(joined) = workers.join_next() => {
            match joined {
                Ok((id, Err(e))) => error!("Worker {} stopped: {:#}", id, e),
                Ok((id, Ok(()))) => warn!("Worker {} exited", id),
                Err(e) => error!("Worker task panicked: {}", e),
            }
        }
    }

    workers.shutdown().await;
    info!("Code Execution Worker stopped");
    Ok(())
}

/// One store handle per worker loop so a blocking pop never stalls writes
async fn connect_stores(config: &Config) -> Result<Vec<Arc<dyn SharedStore>>> {
    let mut stores: Vec<Arc<dyn SharedStore>> = Vec::with_capacity(config.worker_concurrency);
    for _ in 0..config.worker_concurrency {
        stores.push(Arc::new(RedisStore::connect(&config.redis_url).await?));
    }
    info!("Connected to Redis at {}", config.redis_url);
    Ok(stores)
}
