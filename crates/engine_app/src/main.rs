//! # engine_app: Coordinator
//!
//! Headless demo of the engine task core. It owns the resource manager (and
//! with it the fiber scheduler), loads every resource named in a manifest,
//! and runs a fixed-timestep tick loop whose work is done by fibers.
//!
//! ## Startup Sequence
//!
//! 1. Parse the command line and read the manifest.
//! 2. Start the resource manager over in-memory collaborators.
//! 3. Request every manifest resource; run the tick loop meanwhile.
//! 4. Report load outcomes and scheduler counters, then shut down.

mod config;
mod tick;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engine_resource::{Manifest, MemoryCatalog, MemoryFilesystem, MemoryGraphics, ResourceManager};

use config::AppConfig;
use tick::{TickLoop, spawn_bodies};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("engine_app=info".parse()?))
        .init();

    let config = AppConfig::parse();
    info!(workers = config.workers, "engine coordinator starting");

    let manifest = config.manifest()?;
    let filesystem = seed_filesystem(&manifest);
    let catalog = MemoryCatalog::from_manifest(manifest).context("loading manifest")?;
    let ids = catalog.ids();

    let manager = Arc::new(ResourceManager::new(
        config.resources(),
        Arc::new(catalog),
        Arc::new(filesystem),
        Arc::new(MemoryGraphics::with_latency(Duration::from_millis(2))),
    )?);

    let ticker = {
        let manager = manager.clone();
        let mut tick_loop = TickLoop::new(config.tick(), spawn_bodies(config.bodies));
        tokio::task::spawn_blocking(move || tick_loop.run(manager.scheduler()))
    };

    let pending: Vec<_> = ids.iter().map(|id| manager.request_resource(id)).collect();
    for (id, outcome) in ids.iter().zip(join_all(pending).await) {
        match outcome {
            Ok(resource) => info!(
                resource = %id,
                gpu = %resource.gpu(),
                dependencies = resource.dependencies().len(),
                "resource ready"
            ),
            Err(err) => warn!(resource = %id, %err, root = %err.root_cause(), "resource failed"),
        }
    }

    ticker.await.context("tick loop task")??;

    let stats = manager.stats();
    info!(
        cached = stats.cached,
        ready = stats.ready,
        failed = stats.failed,
        fibers = stats.scheduler.submitted,
        resumes = stats.scheduler.resumes,
        "run complete"
    );

    manager.shutdown();
    info!("engine coordinator shut down");
    Ok(())
}

/// In-memory files for every descriptor. Only the last source candidate is
/// present, so fallback resolution gets exercised.
fn seed_filesystem(manifest: &Manifest) -> MemoryFilesystem {
    let filesystem = MemoryFilesystem::with_latency(Duration::from_millis(1));
    for descriptor in &manifest.resources {
        if let Some(path) = descriptor.sources.last() {
            let contents = format!("// {}\n", descriptor.id);
            filesystem.insert(path.clone(), contents.into_bytes());
        }
    }
    filesystem
}
