//! Ordered startup sequence.
//!
//! The bootstrapper walks [`BootStage::ORDER`] once, calling every
//! registered [`Subsystem`] in stage order and, within a stage, in
//! registration order. The order is a fixed contract: each subsystem may
//! assume that everything in earlier stages is online.
//!
//! The first failure aborts startup. Nothing after the failing subsystem
//! runs and the world is never left `Ready` with a partial dependency graph.
//!
//! # Built-in stages
//!
//! - [`BootStage::SimulatedPopulation`] is skipped unless
//!   `world.simulated_population` is enabled.
//! - [`BootStage::WorldReady`] has no subsystems; it flips the world state
//!   to `Ready` when the run flag is set.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{Duration, Instant};

use cadence_types::{BootStage, WorldState};
use tracing::{error, info, warn};

use crate::BoxError;
use crate::config::ServerConfig;
use crate::executor::TaskExecutor;
use crate::pulse_runner::PulseSubmitter;
use crate::world_state::{WorldStateCell, WorldStateError};

/// An external subsystem brought online during startup.
pub trait Subsystem: Send {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Bring the subsystem online.
    fn init(&mut self, ctx: &BootContext<'_>) -> Result<(), BoxError>;
}

/// Everything a subsystem may touch while initializing.
#[derive(Debug)]
pub struct BootContext<'a> {
    /// Loaded configuration.
    pub config: &'a ServerConfig,
    /// Whether the world should start ticking once startup completes.
    pub run: bool,
    /// Submission point for pulses that should start with the world.
    pub pulses: &'a PulseSubmitter,
    /// Executor for any background work started during boot.
    pub executor: &'a TaskExecutor,
    /// World readiness flag.
    pub world: &'a WorldStateCell,
}

/// Registration errors.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    /// The stage is handled by the bootstrapper itself.
    #[error("stage {stage} does not accept subsystems")]
    ReservedStage {
        /// The rejected stage.
        stage: BootStage,
    },
}

/// Why a startup step failed.
#[derive(Debug, thiserror::Error)]
pub enum BootFailure {
    /// The subsystem returned an error.
    #[error("{source}")]
    Init {
        /// Error returned by the subsystem.
        source: BoxError,
    },

    /// The subsystem panicked.
    #[error("panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },

    /// The world could not be flagged ready.
    #[error(transparent)]
    WorldState(#[from] WorldStateError),
}

/// Startup failed. The process must not continue to run the world.
#[derive(Debug, thiserror::Error)]
#[error("startup failed at stage {stage} in {subsystem}: {source}")]
pub struct FatalStartupError {
    /// Stage that failed.
    pub stage: BootStage,
    /// Subsystem that failed.
    pub subsystem: String,
    /// What went wrong.
    #[source]
    pub source: BootFailure,
}

/// What a successful startup did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    /// Subsystems initialized, in order.
    pub initialized: Vec<(BootStage, String)>,
    /// Stages skipped by configuration.
    pub skipped: Vec<BootStage>,
    /// Whether the world was flagged ready.
    pub ready: bool,
    /// Wall time spent.
    pub elapsed: Duration,
}

/// Linear startup sequencer.
#[derive(Default)]
pub struct Bootstrapper {
    stages: BTreeMap<BootStage, Vec<Box<dyn Subsystem>>>,
}

impl core::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut map = f.debug_map();
        for (stage, subsystems) in &self.stages {
            let names: Vec<&str> = subsystems.iter().map(|s| s.name()).collect();
            map.entry(stage, &names);
        }
        map.finish()
    }
}

impl Bootstrapper {
    /// Create an empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subsystem to initialize during `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::ReservedStage`] for [`BootStage::WorldReady`].
    pub fn register(
        &mut self,
        stage: BootStage,
        subsystem: impl Subsystem + 'static,
    ) -> Result<&mut Self, BootError> {
        if stage == BootStage::WorldReady {
            return Err(BootError::ReservedStage { stage });
        }
        self.stages
            .entry(stage)
            .or_default()
            .push(Box::new(subsystem));
        Ok(self)
    }

    /// Number of registered subsystems.
    pub fn len(&self) -> usize {
        self.stages.values().map(Vec::len).sum()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.stages.values().all(Vec::is_empty)
    }

    /// Run every stage in order.
    ///
    /// # Errors
    ///
    /// Returns [`FatalStartupError`] for the first subsystem that fails or
    /// panics. If the world had already been flagged ready it is terminated,
    /// so the tick loop never starts on a half-initialized world.
    pub fn run(mut self, ctx: &BootContext<'_>) -> Result<BootReport, FatalStartupError> {
        let started = Instant::now();
        let mut report = BootReport::default();
        info!(world = ctx.config.world.name, run = ctx.run, "Prompting game world");

        for stage in BootStage::ORDER {
            let outcome = self.run_stage(stage, ctx, &mut report);
            if let Err(err) = outcome {
                error!(
                    stage = %err.stage,
                    subsystem = err.subsystem,
                    error = %err.source,
                    "Startup aborted"
                );
                if ctx.world.get() == WorldState::Ready {
                    ctx.world.terminate();
                }
                return Err(err);
            }
        }

        report.elapsed = started.elapsed();
        info!(
            subsystems = report.initialized.len(),
            ready = report.ready,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "Startup complete"
        );
        Ok(report)
    }

    fn run_stage(
        &mut self,
        stage: BootStage,
        ctx: &BootContext<'_>,
        report: &mut BootReport,
    ) -> Result<(), FatalStartupError> {
        match stage {
            BootStage::WorldReady => {
                if ctx.run {
                    ctx.world.mark_ready().map_err(|err| FatalStartupError {
                        stage,
                        subsystem: String::from("world"),
                        source: err.into(),
                    })?;
                    report.ready = true;
                    info!("World flagged ready");
                } else {
                    info!("Run flag not set, world left uninitialized");
                }
                return Ok(());
            }
            BootStage::SimulatedPopulation if !ctx.config.world.simulated_population => {
                if self.stages.contains_key(&stage) {
                    info!(stage = %stage, "Stage disabled by configuration");
                }
                report.skipped.push(stage);
                return Ok(());
            }
            _ => {}
        }

        let Some(subsystems) = self.stages.get_mut(&stage) else {
            return Ok(());
        };

        for subsystem in subsystems.iter_mut() {
            let name = subsystem.name().to_owned();
            let step_started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| subsystem.init(ctx)));

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(source)) => Some(BootFailure::Init { source }),
                Err(payload) => Some(BootFailure::Panicked {
                    message: crate::panic_message(payload.as_ref()),
                }),
            };
            if let Some(source) = failure {
                return Err(FatalStartupError {
                    stage,
                    subsystem: name,
                    source,
                });
            }

            let elapsed = step_started.elapsed();
            if elapsed > SLOW_INIT {
                warn!(
                    stage = %stage,
                    subsystem = name,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "Slow subsystem init"
                );
            } else {
                info!(stage = %stage, subsystem = name, "Subsystem initialized");
            }
            report.initialized.push((stage, name));
        }
        Ok(())
    }
}

/// Init time past which a subsystem is logged at warn level.
const SLOW_INIT: Duration = Duration::from_secs(5);

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::runtime::Handle;

    use super::*;
    use crate::pulse_runner::PulseRunner;

    struct Recording {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Recording {
        fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_owned(),
                log: Arc::clone(log),
                fail: false,
            }
        }

        fn failing(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                fail: true,
                ..Self::new(name, log)
            }
        }
    }

    impl Subsystem for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        fn init(&mut self, _ctx: &BootContext<'_>) -> Result<(), BoxError> {
            self.log.lock().unwrap().push(self.name.clone());
            if self.fail {
                return Err(format!("{} unavailable", self.name).into());
            }
            Ok(())
        }
    }

    struct Panics;

    impl Subsystem for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        fn init(&mut self, _ctx: &BootContext<'_>) -> Result<(), BoxError> {
            panic!("plugin loader exploded")
        }
    }

    struct Harness {
        config: ServerConfig,
        runner: PulseRunner,
        executor: TaskExecutor,
        world: WorldStateCell,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                config: ServerConfig::default(),
                runner: PulseRunner::new(),
                executor: TaskExecutor::new(1, &Handle::current()),
                world: WorldStateCell::new(),
            }
        }

        fn boot(&self, boot: Bootstrapper, run: bool) -> Result<BootReport, FatalStartupError> {
            let pulses = self.runner.submitter();
            let ctx = BootContext {
                config: &self.config,
                run,
                pulses: &pulses,
                executor: &self.executor,
                world: &self.world,
            };
            boot.run(&ctx)
        }
    }

    fn seven_steps(log: &Arc<Mutex<Vec<String>>>, failing_step: Option<usize>) -> Bootstrapper {
        let stages = [
            (BootStage::PersistentStore, "store"),
            (BootStage::Database, "database"),
            (BootStage::Scripts, "scripts"),
            (BootStage::Plugins, "plugins"),
            (BootStage::ContentTables, "drop-tables"),
            (BootStage::StartupPlugins, "startup-plugins"),
            (BootStage::ContentCaches, "object-examine-cache"),
        ];
        let mut boot = Bootstrapper::new();
        for (index, (stage, name)) in stages.into_iter().enumerate() {
            let step = index.saturating_add(1);
            if Some(step) == failing_step {
                boot.register(stage, Recording::failing(name, log)).unwrap();
            } else {
                boot.register(stage, Recording::new(name, log)).unwrap();
            }
        }
        boot
    }

    #[tokio::test]
    async fn runs_in_stage_order_and_flags_ready() {
        let harness = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut boot = Bootstrapper::new();
        // Registered out of order on purpose.
        boot.register(BootStage::Plugins, Recording::new("plugins", &log))
            .unwrap()
            .register(BootStage::PersistentStore, Recording::new("store", &log))
            .unwrap()
            .register(BootStage::Plugins, Recording::new("plugins-2", &log))
            .unwrap()
            .register(BootStage::Database, Recording::new("database", &log))
            .unwrap();

        let report = harness.boot(boot, true).unwrap();
        assert_eq!(
            log.lock().unwrap().clone(),
            vec!["store", "database", "plugins", "plugins-2"]
        );
        assert!(report.ready);
        assert_eq!(report.initialized.len(), 4);
        assert_eq!(harness.world.get(), WorldState::Ready);
    }

    #[tokio::test]
    async fn failure_at_step_four_stops_everything_after_it() {
        let harness = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = harness
            .boot(seven_steps(&log, Some(4)), true)
            .unwrap_err();

        assert_eq!(err.stage, BootStage::Plugins);
        assert_eq!(err.subsystem, "plugins");
        assert!(matches!(err.source, BootFailure::Init { .. }));
        assert_eq!(
            log.lock().unwrap().clone(),
            vec!["store", "database", "scripts", "plugins"]
        );
        assert_eq!(harness.world.get(), WorldState::Uninitialized);
    }

    #[tokio::test]
    async fn failure_after_ready_terminates_world() {
        let harness = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let err = harness
            .boot(seven_steps(&log, Some(7)), true)
            .unwrap_err();
        assert_eq!(err.stage, BootStage::ContentCaches);
        assert_eq!(harness.world.get(), WorldState::Terminated);
    }

    #[tokio::test]
    async fn panicking_subsystem_is_fatal() {
        let harness = Harness::new();
        let mut boot = Bootstrapper::new();
        boot.register(BootStage::Plugins, Panics).unwrap();
        let err = harness.boot(boot, true).unwrap_err();
        match err.source {
            BootFailure::Panicked { message } => assert_eq!(message, "plugin loader exploded"),
            other => panic!("unexpected failure: {other}"),
        }
        assert_eq!(harness.world.get(), WorldState::Uninitialized);
    }

    #[tokio::test]
    async fn run_flag_off_leaves_world_uninitialized() {
        let harness = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let report = harness.boot(seven_steps(&log, None), false).unwrap();
        assert!(!report.ready);
        assert_eq!(log.lock().unwrap().len(), 7);
        assert_eq!(harness.world.get(), WorldState::Uninitialized);
    }

    #[tokio::test]
    async fn simulated_population_is_optional() {
        let mut harness = Harness::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut boot = Bootstrapper::new();
        boot.register(BootStage::SimulatedPopulation, Recording::new("bots", &log))
            .unwrap();
        let report = harness.boot(boot, true).unwrap();
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(report.skipped, vec![BootStage::SimulatedPopulation]);

        harness.config.world.simulated_population = true;
        harness.world = WorldStateCell::new();
        let mut boot = Bootstrapper::new();
        boot.register(BootStage::SimulatedPopulation, Recording::new("bots", &log))
            .unwrap();
        let report = harness.boot(boot, true).unwrap();
        assert_eq!(log.lock().unwrap().clone(), vec!["bots"]);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn world_ready_stage_is_reserved() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut boot = Bootstrapper::new();
        assert!(matches!(
            boot.register(BootStage::WorldReady, Recording::new("nope", &log)),
            Err(BootError::ReservedStage { .. })
        ));
        assert!(boot.is_empty());
    }

    #[test]
    fn len_counts_all_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        assert_eq!(seven_steps(&log, None).len(), 7);
    }
}
