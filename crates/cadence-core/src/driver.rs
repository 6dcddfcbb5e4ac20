//! The fixed-interval tick loop.
//!
//! Each tick runs, in order:
//!
//! 1. **Clock** -- increment the global tick counter.
//! 2. **Pulses** -- [`PulseRunner::advance`] on this thread, synchronously.
//! 3. **Maintenance** -- every K-th tick, hand each registered
//!    [`MaintenanceTask`] to the [`TaskExecutor`]. Nothing slow runs inline.
//!
//! [`TickDriver::run`] fires ticks on a [`tokio::time::interval`] with
//! [`MissedTickBehavior::Delay`]. When a tick overruns its period the
//! interval is reset, so the next tick fires a full period after the
//! overrunning tick ended. Missed cadence is dropped rather than replayed
//! in a burst, and an overloaded loop still idles one period between ticks.
//!
//! The driver moves `Idle -> Running -> Stopped`. `run` consumes the driver,
//! so a stopped driver cannot be restarted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::clock::{ClockError, ClockReader, GlobalClock};
use crate::config::SchedulerConfig;
use crate::executor::TaskExecutor;
use crate::maintenance::{MaintenanceSnapshot, MaintenanceTask};
use crate::pulse_runner::{AdvanceSummary, PulseRunner, PulseSubmitter};
use crate::world_state::WorldStateCell;

/// Shortest period the loop will fire at.
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Lifecycle of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Constructed, not yet firing.
    Idle,
    /// Firing ticks.
    Running,
    /// Shut down. Terminal.
    Stopped,
}

/// Summary of a single tick's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    /// The tick number that was executed.
    pub tick: u64,
    /// What the pulse runner did.
    pub pulses: AdvanceSummary,
    /// Maintenance items handed to the executor on this tick.
    pub maintenance_submitted: usize,
    /// Time spent on the tick thread.
    pub elapsed: Duration,
}

/// Final accounting returned by [`TickDriver::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverReport {
    /// Clock value when the driver stopped.
    pub final_tick: u64,
    /// Ticks fired by this driver.
    pub ticks_fired: u64,
    /// Ticks whose synchronous work exceeded the period.
    pub overruns: u64,
    /// Maintenance items handed to the executor.
    pub maintenance_submitted: u64,
    /// Live pulses discarded at shutdown.
    pub pulses_dropped: usize,
}

/// Drives the clock, the pulse runner and periodic maintenance.
pub struct TickDriver {
    clock: GlobalClock,
    runner: PulseRunner,
    executor: TaskExecutor,
    world: WorldStateCell,
    maintenance: Vec<Arc<dyn MaintenanceTask>>,
    tick_interval: Duration,
    maintenance_interval: u64,
    state: DriverState,
    ticks_fired: u64,
    overruns: u64,
    maintenance_submitted: u64,
}

impl core::fmt::Debug for TickDriver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TickDriver")
            .field("tick", &self.clock.ticks())
            .field("state", &self.state)
            .field("live_pulses", &self.runner.len())
            .field("maintenance_tasks", &self.maintenance.len())
            .field("tick_interval", &self.tick_interval)
            .field("maintenance_interval", &self.maintenance_interval)
            .finish_non_exhaustive()
    }
}

impl TickDriver {
    /// Create an idle driver with a fresh clock at tick 0.
    pub fn new(
        config: &SchedulerConfig,
        runner: PulseRunner,
        executor: TaskExecutor,
        world: WorldStateCell,
    ) -> Self {
        Self::with_clock(GlobalClock::new(), config, runner, executor, world)
    }

    /// Create an idle driver around an existing clock.
    pub fn with_clock(
        clock: GlobalClock,
        config: &SchedulerConfig,
        runner: PulseRunner,
        executor: TaskExecutor,
        world: WorldStateCell,
    ) -> Self {
        Self {
            clock,
            runner,
            executor,
            world,
            maintenance: Vec::new(),
            tick_interval: config.tick_interval().max(MIN_TICK_INTERVAL),
            maintenance_interval: config.maintenance_interval_ticks.max(1),
            state: DriverState::Idle,
            ticks_fired: 0,
            overruns: 0,
            maintenance_submitted: 0,
        }
    }

    /// Register a task to run every K ticks.
    pub fn add_maintenance(&mut self, task: Arc<dyn MaintenanceTask>) {
        self.maintenance.push(task);
    }

    /// Read-only view of the clock.
    pub fn clock(&self) -> ClockReader {
        self.clock.reader()
    }

    /// Submission point feeding this driver's runner.
    pub fn submitter(&self) -> PulseSubmitter {
        self.runner.submitter()
    }

    /// Direct access to the runner, for use before the loop starts.
    pub const fn runner_mut(&mut self) -> &mut PulseRunner {
        &mut self.runner
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> DriverState {
        self.state
    }

    /// Execute one tick: clock, pulses, maintenance.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] if the counter cannot advance;
    /// nothing else is run in that case.
    pub fn tick(&mut self) -> Result<TickSummary, ClockError> {
        let started = Instant::now();
        let tick = self.clock.advance()?;
        self.ticks_fired = self.ticks_fired.saturating_add(1);

        let pulses = self.runner.advance(tick);

        let maintenance_submitted = if tick.checked_rem(self.maintenance_interval) == Some(0) {
            self.submit_maintenance(tick)
        } else {
            0
        };

        Ok(TickSummary {
            tick,
            pulses,
            maintenance_submitted,
            elapsed: started.elapsed(),
        })
    }

    fn submit_maintenance(&mut self, tick: u64) -> usize {
        let snapshot = MaintenanceSnapshot {
            tick,
            live_pulses: self.runner.len(),
            taken_at: Utc::now(),
        };

        let mut submitted: usize = 0;
        for task in &self.maintenance {
            let task = Arc::clone(task);
            let name = task.name();
            match self.executor.submit(name, move || task.run(&snapshot)) {
                Ok(()) => submitted = submitted.saturating_add(1),
                Err(err) => warn!(tick, task = name, error = %err, "maintenance not submitted"),
            }
        }

        debug!(tick, submitted, "maintenance submitted");
        self.maintenance_submitted = self
            .maintenance_submitted
            .saturating_add(u64::try_from(submitted).unwrap_or(u64::MAX));
        submitted
    }

    /// Fire ticks until the world is terminated.
    ///
    /// Waits for the world to become ready first; returns straight away if
    /// it is already terminated. Must run on the dedicated tick thread.
    pub async fn run(mut self) -> DriverReport {
        let mut states = self.world.subscribe();

        loop {
            let current = *states.borrow_and_update();
            if current.accepts_ticks() {
                break;
            }
            if current.is_terminal() || states.changed().await.is_err() {
                return self.finish();
            }
        }

        self.state = DriverState::Running;
        info!(
            tick_interval_ms = u64::try_from(self.tick_interval.as_millis()).unwrap_or(u64::MAX),
            maintenance_interval = self.maintenance_interval,
            maintenance_tasks = self.maintenance.len(),
            "Tick loop starting"
        );

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                changed = states.changed() => {
                    if changed.is_err() || !states.borrow_and_update().accepts_ticks() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if !self.world.get().accepts_ticks() {
                        break;
                    }
                    match self.tick() {
                        Ok(summary) => {
                            if self.observe(&summary) {
                                interval.reset();
                            }
                        }
                        Err(err) => {
                            error!(error = %err, "Tick loop halted");
                            break;
                        }
                    }
                }
            }
        }

        self.finish()
    }

    /// Record a finished tick. Returns whether it overran its period.
    fn observe(&mut self, summary: &TickSummary) -> bool {
        let overran = summary.elapsed > self.tick_interval;
        if overran {
            self.overruns = self.overruns.saturating_add(1);
            warn!(
                tick = summary.tick,
                elapsed_ms = u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX),
                "Tick overran its period; next tick rescheduled from now"
            );
        }
        if summary.pulses.failed > 0 {
            debug!(
                tick = summary.tick,
                failed = summary.pulses.failed,
                "Pulses failed this tick"
            );
        }
        overran
    }

    fn finish(mut self) -> DriverReport {
        self.state = DriverState::Stopped;
        let pulses_dropped = self.runner.clear();
        let report = DriverReport {
            final_tick: self.clock.ticks(),
            ticks_fired: self.ticks_fired,
            overruns: self.overruns,
            maintenance_submitted: self.maintenance_submitted,
            pulses_dropped,
        };
        info!(
            final_tick = report.final_tick,
            ticks_fired = report.ticks_fired,
            overruns = report.overruns,
            pulses_dropped,
            "Tick loop stopped"
        );
        report
    }
}
