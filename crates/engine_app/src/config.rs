//! Command-line configuration for the demo coordinator.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use engine_resource::{Manifest, ResourceManagerConfig};

use crate::tick::TickConfig;

/// Manifest used when `--manifest` is not given.
const DEMO_MANIFEST: &str = include_str!("../assets/demo_manifest.json");

/// Run the engine task core headless: tick transforms as fibers and load the
/// resources of a manifest against in-memory collaborators.
#[derive(Debug, Clone, Parser)]
#[command(name = "engine_app", version)]
pub struct AppConfig {
    /// Scheduler worker threads.
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: u16,

    /// Target ticks per second.
    #[arg(long, default_value_t = 60.0)]
    pub tick_rate: f64,

    /// Ticks to run before exiting (0 = until interrupted).
    #[arg(long, default_value_t = 120)]
    pub max_ticks: u64,

    /// Number of simulated bodies.
    #[arg(long, default_value_t = 1024)]
    pub bodies: usize,

    /// Bodies integrated per fiber.
    #[arg(long, default_value_t = 128, value_parser = clap::value_parser!(u32).range(1..))]
    pub chunk_size: u32,

    /// Resource manifest (JSON). Defaults to a built-in demo manifest.
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Drop failed loads from the cache instead of keeping them.
    #[arg(long)]
    pub retry_failures: bool,
}

impl AppConfig {
    #[must_use]
    pub fn tick(&self) -> TickConfig {
        TickConfig {
            tick_rate: self.tick_rate,
            max_ticks: self.max_ticks,
            chunk_size: self.chunk_size as usize,
        }
    }

    #[must_use]
    pub fn resources(&self) -> ResourceManagerConfig {
        ResourceManagerConfig::default()
            .with_workers(usize::from(self.workers))
            .with_retain_failures(!self.retry_failures)
    }

    /// Read and parse the manifest.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a valid manifest.
    pub fn manifest(&self) -> Result<Manifest> {
        let json = match &self.manifest {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("reading manifest {}", path.display()))?,
            None => DEMO_MANIFEST.to_owned(),
        };
        serde_json::from_str(&json).context("parsing manifest")
    }
}

#[cfg(test)]
mod tests {
    use engine_resource::{MemoryCatalog, ResourceId};

    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::parse_from(["engine_app"]);
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_ticks, 120);
        assert!(config.manifest.is_none());
        assert!(config.resources().retain_failures);
        assert_eq!(config.resources().scheduler.worker_count, 4);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(AppConfig::try_parse_from(["engine_app", "--workers", "0"]).is_err());
    }

    #[test]
    fn test_demo_manifest_is_valid() {
        let config = AppConfig::parse_from(["engine_app"]);
        let catalog = MemoryCatalog::from_manifest(config.manifest().unwrap()).unwrap();
        assert!(catalog.ids().contains(&ResourceId::material("sprite")));
        assert!(catalog.ids().contains(&ResourceId::canvas("scene")));
    }
}
