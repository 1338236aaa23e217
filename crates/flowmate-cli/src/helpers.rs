//! Shared helper functions used across CLI subcommands.

use std::path::Path;

use anyhow::{Context, Result};
use flowmate_intent::builtin::builtin_catalog;
use flowmate_intent::{FlowmateConfig, Orchestrator};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::demo::demo_registry;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load the config file, then apply `FLOWMATE_*` environment overrides.
pub fn load_config(path: &Path) -> Result<FlowmateConfig> {
    let mut config = FlowmateConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    config.apply_env();
    info!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Build an orchestrator over the built-in catalog and the demo plugins.
pub fn build_orchestrator(config: FlowmateConfig) -> Result<Orchestrator> {
    let catalog = builtin_catalog().context("built-in catalog is invalid")?;
    Orchestrator::new(catalog, demo_registry(), config).context("failed to build orchestrator")
}
