//! The scheduler context and its startup and shutdown entry points.
//!
//! A [`World`] owns everything the tick loop needs: configuration, the
//! readiness flag, the pulse submission point and the task executor. There
//! are no process-wide globals; collaborators get what they need through
//! [`BootContext`] or the accessors here.
//!
//! Startup runs on the caller's tokio runtime (the executor's workers live
//! there). Ticking runs on a dedicated OS thread named `tick` with its own
//! current-thread runtime, so nothing scheduled on the caller's runtime can
//! delay a tick.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use cadence_types::WorldState;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::bootstrap::{BootContext, BootReport, Bootstrapper, FatalStartupError};
use crate::clock::ClockReader;
use crate::config::{ConfigError, DEFAULT_CONFIG_PATH, ServerConfig};
use crate::driver::{DriverReport, TickDriver};
use crate::executor::TaskExecutor;
use crate::maintenance::MaintenanceTask;
use crate::pulse_runner::{PulseRunner, PulseSubmitter};
use crate::world_state::WorldStateCell;

/// Name of the dedicated tick thread.
pub const TICK_THREAD_NAME: &str = "tick";

/// Errors from [`World::start`].
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// `start` was called outside a tokio runtime.
    #[error("world must be started from within a tokio runtime: {source}")]
    NoRuntime {
        /// Error from the runtime lookup.
        source: TryCurrentError,
    },

    /// A subsystem failed during startup.
    #[error(transparent)]
    Boot(#[from] FatalStartupError),

    /// The tick thread or its runtime could not be created.
    #[error("failed to start tick thread: {source}")]
    TickThread {
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

/// How to start the world.
pub struct StartOptions {
    /// Flag the world ready and start ticking once startup completes. When
    /// `false`, subsystems are initialized and nothing else happens.
    pub run: bool,
    /// YAML configuration file. A missing file means defaults.
    pub config_path: PathBuf,
    /// Tasks handed to the executor every K ticks.
    pub maintenance: Vec<Arc<dyn MaintenanceTask>>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            run: true,
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            maintenance: Vec::new(),
        }
    }
}

impl core::fmt::Debug for StartOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let maintenance: Vec<&str> = self.maintenance.iter().map(|task| task.name()).collect();
        f.debug_struct("StartOptions")
            .field("run", &self.run)
            .field("config_path", &self.config_path)
            .field("maintenance", &maintenance)
            .finish()
    }
}

impl StartOptions {
    /// Add a periodic maintenance task.
    #[must_use]
    pub fn with_maintenance(mut self, task: Arc<dyn MaintenanceTask>) -> Self {
        self.maintenance.push(task);
        self
    }
}

#[derive(Debug)]
struct TickThread {
    handle: JoinHandle<()>,
    report: oneshot::Receiver<DriverReport>,
}

/// A started world.
///
/// Dropping a `World` terminates it, which stops the tick thread at its
/// next tick boundary. Use [`World::join`] to wait for that and to drain the
/// executor.
#[derive(Debug)]
pub struct World {
    config: ServerConfig,
    world: WorldStateCell,
    clock: ClockReader,
    submitter: PulseSubmitter,
    executor: TaskExecutor,
    boot: BootReport,
    tick: Option<TickThread>,
}

impl World {
    /// Load configuration from `options.config_path` and start the world.
    ///
    /// # Errors
    ///
    /// See [`World::start_with_config`]; additionally
    /// [`StartupError::Config`] if the file exists but is unusable.
    pub fn start(options: StartOptions, bootstrapper: Bootstrapper) -> Result<Self, StartupError> {
        let config = ServerConfig::load_or_default(&options.config_path)?;
        Self::start_with_config(config, options, bootstrapper)
    }

    /// Start the world from an already loaded configuration.
    /// `options.config_path` is ignored.
    ///
    /// Runs every startup stage in order. If `options.run` is set the world
    /// is flagged ready and the tick thread is started.
    ///
    /// # Errors
    ///
    /// - [`StartupError::NoRuntime`] outside a tokio runtime.
    /// - [`StartupError::Boot`] if any subsystem fails; nothing ticks.
    /// - [`StartupError::TickThread`] if the tick thread cannot be spawned;
    ///   the world is terminated.
    pub fn start_with_config(
        config: ServerConfig,
        options: StartOptions,
        bootstrapper: Bootstrapper,
    ) -> Result<Self, StartupError> {
        let runtime = Handle::try_current().map_err(|source| StartupError::NoRuntime { source })?;

        let world = WorldStateCell::new();
        let runner = PulseRunner::new();
        let submitter = runner.submitter();
        let executor = TaskExecutor::new(config.scheduler.executor_workers, &runtime);

        let ctx = BootContext {
            config: &config,
            run: options.run,
            pulses: &submitter,
            executor: &executor,
            world: &world,
        };
        let boot = match bootstrapper.run(&ctx) {
            Ok(report) => report,
            Err(err) => {
                executor.close();
                return Err(err.into());
            }
        };

        let mut driver =
            TickDriver::new(&config.scheduler, runner, executor.clone(), world.clone());
        for task in options.maintenance {
            driver.add_maintenance(task);
        }
        let clock = driver.clock();

        let tick = if options.run {
            match spawn_tick_thread(driver) {
                Ok(thread) => Some(thread),
                Err(source) => {
                    world.terminate();
                    executor.close();
                    return Err(StartupError::TickThread { source });
                }
            }
        } else {
            let pulses_dropped = driver.runner_mut().clear();
            info!(pulses_dropped, "Run flag not set; world initialized but not ticking");
            None
        };

        Ok(Self {
            config,
            world,
            clock,
            submitter,
            executor,
            boot,
            tick,
        })
    }

    /// Terminate the world. Idempotent.
    ///
    /// The tick loop checks the state before every tick, so no tick begins
    /// once the loop has observed the termination. A tick already past that
    /// check runs to completion; after [`World::join`] returns the clock no
    /// longer moves.
    pub fn shutdown(&self) {
        if self.world.terminate() {
            info!(tick = self.clock.ticks(), "World shutdown requested");
        } else {
            debug!("World already terminated");
        }
    }

    /// Wait for the tick thread to stop, then shut the executor down per
    /// `scheduler.shutdown_mode`.
    ///
    /// Only returns once the world is terminated; call [`World::shutdown`]
    /// first (or from another task via [`World::state`]). Returns `None`
    /// when the world never ticked.
    pub async fn join(mut self) -> Option<DriverReport> {
        let report = match self.tick.take() {
            Some(thread) => join_tick_thread(thread).await,
            None => None,
        };
        self.executor
            .shutdown(self.config.scheduler.shutdown_mode)
            .await;
        report
    }

    /// Pulse submission point. Usable from any thread.
    pub fn submitter(&self) -> PulseSubmitter {
        self.submitter.clone()
    }

    /// Read-only view of the tick counter.
    pub fn clock(&self) -> ClockReader {
        self.clock.clone()
    }

    /// The readiness flag.
    pub fn state(&self) -> WorldStateCell {
        self.world.clone()
    }

    /// Current world state.
    pub fn world_state(&self) -> WorldState {
        self.world.get()
    }

    /// Executor for off-tick work.
    pub fn executor(&self) -> TaskExecutor {
        self.executor.clone()
    }

    /// Configuration the world was started with.
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// What startup did.
    pub const fn boot_report(&self) -> &BootReport {
        &self.boot
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.world.terminate();
    }
}

fn spawn_tick_thread(driver: TickDriver) -> std::io::Result<TickThread> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let (report_tx, report) = oneshot::channel();

    let handle = std::thread::Builder::new()
        .name(TICK_THREAD_NAME.to_owned())
        .spawn(move || {
            let outcome = runtime.block_on(driver.run());
            if report_tx.send(outcome).is_err() {
                debug!("Tick report dropped; world was not joined");
            }
        })?;

    info!(thread = TICK_THREAD_NAME, "Tick thread started");
    Ok(TickThread { handle, report })
}

async fn join_tick_thread(thread: TickThread) -> Option<DriverReport> {
    let TickThread { handle, report } = thread;
    let report = report.await.ok();

    match tokio::task::spawn_blocking(move || handle.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(payload)) => {
            error!(
                panic = crate::panic_message(payload.as_ref()),
                "Tick thread panicked"
            );
        }
        Err(err) => error!(error = %err, "Failed to join tick thread"),
    }

    report
}
