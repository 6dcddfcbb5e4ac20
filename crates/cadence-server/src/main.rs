//! Cadence game server binary.
//!
//! Loads configuration, registers the startup subsystems, starts the world
//! and waits for Ctrl-C before shutting it down.
//!
//! ```text
//! cadence-server [--no-run] [CONFIG_PATH]
//! ```
//!
//! With `--no-run` the subsystems are initialized and the process exits
//! without ever ticking. `CONFIG_PATH` defaults to `cadence.yaml`; a missing
//! file means defaults.
//!
//! # Startup Sequence
//!
//! 1. Parse arguments
//! 2. Load configuration
//! 3. Initialize structured logging (tracing)
//! 4. Register subsystems with the bootstrapper
//! 5. Start the world (boot, then the tick thread)
//! 6. Wait for Ctrl-C or termination
//! 7. Shut down, drain the executor and log the final report

mod error;
mod maintenance;
mod subsystems;

use std::path::PathBuf;
use std::sync::Arc;

use cadence_core::bootstrap::Bootstrapper;
use cadence_core::config::{DEFAULT_CONFIG_PATH, LoggingConfig, ServerConfig};
use cadence_core::world::{StartOptions, World};
use cadence_types::{BootStage, WorldState};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ServerError;
use crate::maintenance::SaveSweep;
use crate::subsystems::{
    BotPopulation, ContentCacheIndex, DatabaseEndpoint, PersistentStore, StartupAnnouncer,
};

/// Tick-driven game server.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(name = "cadence-server", version, about)]
struct Args {
    /// Initialize every subsystem, then exit without ticking.
    #[arg(long)]
    no_run: bool,

    /// YAML configuration file. A missing file means defaults.
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config_path: PathBuf,
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_err| EnvFilter::new(&logging.level));
    if logging.is_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

fn register_subsystems(config: &ServerConfig) -> Result<Bootstrapper, ServerError> {
    let mut boot = Bootstrapper::new();
    boot.register(BootStage::PersistentStore, PersistentStore)?
        .register(BootStage::Database, DatabaseEndpoint)?
        .register(BootStage::StartupPlugins, StartupAnnouncer)?
        .register(BootStage::ContentCaches, ContentCacheIndex)?;
    if config.world.simulated_population {
        boot.register(BootStage::SimulatedPopulation, BotPopulation::default())?;
    }
    Ok(boot)
}

/// Application entry point for the Cadence server.
///
/// # Errors
///
/// Returns an error (and the process exits non-zero) if configuration is
/// invalid, if startup fails, or if the shutdown signal cannot be awaited.
/// Bad arguments are reported by clap before anything starts.
#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let args = Args::parse();
    let run = !args.no_run;
    let config = ServerConfig::load_or_default(&args.config_path)?;
    init_logging(&config.logging);

    info!(
        config_path = %args.config_path.display(),
        world = config.world.name,
        tick_interval_ms = config.scheduler.tick_interval_ms,
        maintenance_interval_ticks = config.scheduler.maintenance_interval_ticks,
        executor_workers = config.scheduler.executor_workers,
        run,
        "cadence-server starting"
    );

    let boot = register_subsystems(&config)?;
    let options = StartOptions {
        run,
        config_path: args.config_path,
        ..StartOptions::default()
    }
    .with_maintenance(Arc::new(SaveSweep::new(&config.infrastructure.store_path)));

    let world = World::start_with_config(config, options, boot)?;

    if run {
        let mut states = world.state().subscribe();
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown signal received");
            }
            _ = states.wait_for(|state| *state == WorldState::Terminated) => {
                warn!("World terminated without a shutdown signal");
            }
        }
        world.shutdown();
    }

    match world.join().await {
        Some(report) => info!(
            final_tick = report.final_tick,
            ticks_fired = report.ticks_fired,
            overruns = report.overruns,
            maintenance_submitted = report.maintenance_submitted,
            pulses_dropped = report.pulses_dropped,
            "cadence-server stopped"
        ),
        None => info!("cadence-server initialized without running"),
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("cadence-server").chain(raw.iter().copied()))
    }

    #[test]
    fn defaults_to_running_with_default_config() {
        let parsed = args(&[]).unwrap();
        assert!(!parsed.no_run);
        assert_eq!(parsed.config_path, PathBuf::from("cadence.yaml"));
    }

    #[test]
    fn no_run_and_path_in_any_order() {
        let expected = Args {
            no_run: true,
            config_path: PathBuf::from("prod.yaml"),
        };
        assert_eq!(args(&["--no-run", "prod.yaml"]).unwrap(), expected);
        assert_eq!(args(&["prod.yaml", "--no-run"]).unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_flags_and_extra_paths() {
        assert!(args(&["--fast"]).is_err());
        assert!(args(&["a.yaml", "b.yaml"]).is_err());
    }

    #[test]
    fn population_is_registered_only_when_enabled() {
        let mut config = ServerConfig::default();
        assert_eq!(register_subsystems(&config).unwrap().len(), 4);
        config.world.simulated_population = true;
        assert_eq!(register_subsystems(&config).unwrap().len(), 5);
    }
}
