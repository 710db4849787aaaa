//! Engine binary for the Holdfast territory layer.
//!
//! Hosts a [`TerritoryLookup`] over the in-memory reference store and drives
//! its periodic maintenance until Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `holdfast-config.yaml` (defaults when absent)
//! 2. Initialize structured logging (tracing)
//! 3. Build the store and the lookup facade
//! 4. Seed the synthetic observer load, if configured
//! 5. Run the driver until Ctrl-C
//! 6. Shut the facade down (final drain, release caches and hooks)
//! 7. Log the final statistics

mod driver;
mod error;
mod load;

use std::path::Path;
use std::sync::Arc;

use holdfast_core::{HoldfastConfig, MemoryStore, TerritoryLookup, TerritoryStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::driver::{Driver, DriverIntervals};
use crate::error::EngineError;
use crate::load::SyntheticLoad;

/// Path of the configuration file, relative to the working directory.
const CONFIG_PATH: &str = "holdfast-config.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration, logging or load seeding fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = Path::new(CONFIG_PATH);
    let config_found = config_path.exists();
    let config = if config_found {
        HoldfastConfig::from_file(config_path).map_err(EngineError::from)?
    } else {
        HoldfastConfig::parse("").map_err(EngineError::from)?
    };

    // 2. Initialize structured logging.
    init_logging(&config)?;
    info!("holdfast-engine starting");
    if !config_found {
        info!(path = CONFIG_PATH, "Config file not found, using defaults");
    }
    info!(
        territory_capacity = config.cache.territory_capacity,
        ttl_ms = config.cache.ttl_ms,
        radius = config.locality.radius,
        drain_interval_ms = config.saves.drain_interval_ms,
        synthetic_observers = config.driver.synthetic_observers,
        "Configuration loaded"
    );

    // 3. Build the store and the facade.
    let store: Arc<dyn TerritoryStore> = Arc::new(MemoryStore::new());
    let lookup = Arc::new(TerritoryLookup::new(store, &config));

    // 4. Seed the synthetic load.
    let mut driver = Driver::new(Arc::clone(&lookup), DriverIntervals::from_config(&config));
    if config.driver.synthetic_observers > 0 {
        let load = SyntheticLoad::seed(
            &lookup,
            &config.driver.world,
            config.driver.synthetic_observers,
            config.driver.seed,
            config.driver.claim_every_ticks,
        )
        .map_err(EngineError::from)?;
        driver = driver.with_load(load);
    }

    // 5. Run until Ctrl-C.
    let report = driver
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for Ctrl-C, shutting down");
            }
        })
        .await;
    info!(
        drains = report.drains,
        skipped_drains = report.skipped_drains,
        saves_executed = report.saves_executed,
        saves_failed = report.saves_failed,
        idle_sweeps = report.idle_sweeps,
        idle_cells = report.idle_cells,
        ttl_sweeps = report.ttl_sweeps,
        load_ticks = report.load_ticks,
        "Driver stopped"
    );
    if let Some(load) = report.load {
        info!(
            claims = load.claims,
            refused = load.refused,
            releases = load.releases,
            "Synthetic load summary"
        );
    }

    // 6. Shut the facade down.
    let final_drain = lookup.shutdown();
    info!(
        executed = final_drain.executed,
        failed = final_drain.failed,
        "Final save drain complete"
    );

    // 7. Log final statistics.
    match serde_json::to_string(&lookup.stats()) {
        Ok(stats) => info!(stats = %stats, "holdfast-engine shutdown complete"),
        Err(err) => warn!(error = %err, "failed to serialize final stats"),
    }

    Ok(())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
fn init_logging(config: &HoldfastConfig) -> Result<(), EngineError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.logging.level).map_err(|e| EngineError::LogFilter {
            directive: config.logging.level.clone(),
            message: e.to_string(),
        })?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
