//! Resumable deferred actions.
//!
//! A [`Pulse`] waits `delay` ticks, runs its [`PulseAction`] once, and then
//! either re-arms (repeating pulses) or finishes. Pulses are owned by the
//! [`PulseRunner`] once submitted; the submitter keeps only a
//! [`PulseHandle`] with which it can request a stop.
//!
//! ```text
//! PENDING --(delay reaches 0)--> ACTIVE --(Continue, repeating)--> PENDING
//!                                  |
//!                                  +--(Stop / error / panic)----> TERMINAL
//! ```
//!
//! [`PulseRunner`]: crate::pulse_runner::PulseRunner

use std::borrow::Cow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cadence_types::PulseId;

use crate::BoxError;
use crate::pulse_runner::PulseSubmitter;

/// What a pulse action wants after running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseStatus {
    /// Keep the pulse alive. Only valid for repeating pulses.
    Continue,
    /// The pulse is done and should be removed.
    Stop,
}

/// Lifecycle position of a pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseState {
    /// Waiting for its delay to run out.
    Pending,
    /// Delay is zero; the action runs on this step.
    Active,
    /// Finished, stopped, or failed. Never steps again.
    Terminal,
}

/// Per-pulse failure. The runner logs these and drops the pulse.
#[derive(Debug, thiserror::Error)]
pub enum PulseExecutionError {
    /// The action returned an error.
    #[error("pulse action failed: {source}")]
    Action {
        /// Error returned by the action.
        source: BoxError,
    },

    /// A one-shot pulse returned [`PulseStatus::Continue`].
    #[error("non-repeating pulse returned Continue")]
    ContinueWithoutRepeat,

    /// The action panicked.
    #[error("pulse action panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
}

/// Information handed to a pulse action on every run.
#[derive(Debug)]
pub struct PulseContext<'a> {
    /// Tick currently being processed.
    pub tick: u64,
    /// Handle of the running pulse.
    pub id: PulseId,
    /// Submission point for follow-up pulses. Pulses submitted here are
    /// picked up on the next tick.
    pub pulses: &'a PulseSubmitter,
}

/// The work a pulse performs when its delay runs out.
pub trait PulseAction: Send {
    /// Run the action for the current tick.
    fn execute(&mut self, ctx: &PulseContext<'_>) -> Result<PulseStatus, BoxError>;
}

/// Adapter that turns a closure into a [`PulseAction`].
pub struct FnAction<F>(F);

impl<F> PulseAction for FnAction<F>
where
    F: FnMut(&PulseContext<'_>) -> Result<PulseStatus, BoxError> + Send,
{
    fn execute(&mut self, ctx: &PulseContext<'_>) -> Result<PulseStatus, BoxError> {
        (self.0)(ctx)
    }
}

/// Wrap a closure as a [`PulseAction`].
pub fn action<F>(f: F) -> FnAction<F>
where
    F: FnMut(&PulseContext<'_>) -> Result<PulseStatus, BoxError> + Send,
{
    FnAction(f)
}

/// Cloneable stop switch for a submitted pulse.
#[derive(Debug, Clone)]
pub struct PulseHandle {
    id: PulseId,
    stopped: Arc<AtomicBool>,
}

impl PulseHandle {
    /// Handle of the pulse.
    pub const fn id(&self) -> PulseId {
        self.id
    }

    /// Request a stop. Takes effect no later than the pulse's next step.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested or the pulse has finished.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// A resumable unit of deferred or periodic work.
pub struct Pulse {
    id: PulseId,
    name: Cow<'static, str>,
    delay: u64,
    interval: u64,
    repeating: bool,
    state: PulseState,
    stopped: Arc<AtomicBool>,
    action: Box<dyn PulseAction>,
}

impl core::fmt::Debug for Pulse {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pulse")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("delay", &self.delay)
            .field("interval", &self.interval)
            .field("repeating", &self.repeating)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Pulse {
    /// A pulse that runs once after `delay` ticks.
    ///
    /// A delay of 0 runs on the first step after submission, as does 1.
    pub fn once(
        name: impl Into<Cow<'static, str>>,
        delay: u64,
        action: impl PulseAction + 'static,
    ) -> Self {
        Self::build(name.into(), delay, delay, false, Box::new(action))
    }

    /// A pulse that runs every `interval` ticks until it returns
    /// [`PulseStatus::Stop`] or is stopped. The first run happens after
    /// `interval` ticks; see [`Pulse::with_delay`] to change that.
    pub fn repeating(
        name: impl Into<Cow<'static, str>>,
        interval: u64,
        action: impl PulseAction + 'static,
    ) -> Self {
        Self::build(name.into(), interval, interval, true, Box::new(action))
    }

    fn build(
        name: Cow<'static, str>,
        delay: u64,
        interval: u64,
        repeating: bool,
        action: Box<dyn PulseAction>,
    ) -> Self {
        Self {
            id: PulseId::new(),
            name,
            delay,
            interval,
            repeating,
            state: if delay == 0 {
                PulseState::Active
            } else {
                PulseState::Pending
            },
            stopped: Arc::new(AtomicBool::new(false)),
            action,
        }
    }

    /// Use a caller-chosen handle instead of a fresh one, so that a second
    /// submission under the same handle is rejected while this one is live.
    #[must_use]
    pub fn keyed(mut self, id: PulseId) -> Self {
        self.id = id;
        self
    }

    /// Override the delay before the first run.
    #[must_use]
    pub fn with_delay(mut self, delay: u64) -> Self {
        self.delay = delay;
        self.state = if delay == 0 {
            PulseState::Active
        } else {
            PulseState::Pending
        };
        self
    }

    /// Handle of this pulse.
    pub const fn id(&self) -> PulseId {
        self.id
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ticks remaining before the next run.
    pub const fn delay(&self) -> u64 {
        self.delay
    }

    /// Whether the pulse re-arms after running.
    pub const fn is_repeating(&self) -> bool {
        self.repeating
    }

    /// Current lifecycle position.
    pub const fn state(&self) -> PulseState {
        self.state
    }

    /// Whether the pulse has been stopped, by itself or through a handle.
    pub fn is_stopped(&self) -> bool {
        self.state == PulseState::Terminal || self.stopped.load(Ordering::Acquire)
    }

    /// A stop switch sharing this pulse's flag.
    pub fn handle(&self) -> PulseHandle {
        PulseHandle {
            id: self.id,
            stopped: Arc::clone(&self.stopped),
        }
    }

    /// Force the pulse to `Terminal`. Idempotent.
    pub fn stop(&mut self) {
        self.state = PulseState::Terminal;
        self.stopped.store(true, Ordering::Release);
    }

    /// Advance the pulse by one tick.
    ///
    /// Counts the delay down and, once it reaches zero, runs the action
    /// exactly once. A stopped pulse returns [`PulseStatus::Stop`] without
    /// running. After any error the pulse is `Terminal`.
    ///
    /// # Errors
    ///
    /// Returns [`PulseExecutionError`] if the action fails, panics, or a
    /// one-shot pulse asks to continue.
    pub fn step(&mut self, ctx: &PulseContext<'_>) -> Result<PulseStatus, PulseExecutionError> {
        if self.is_stopped() {
            self.stop();
            return Ok(PulseStatus::Stop);
        }

        self.delay = self.delay.saturating_sub(1);
        if self.delay > 0 {
            self.state = PulseState::Pending;
            return Ok(PulseStatus::Continue);
        }
        self.state = PulseState::Active;

        let action = &mut self.action;
        let outcome = catch_unwind(AssertUnwindSafe(|| action.execute(ctx)));

        match outcome {
            Ok(Ok(PulseStatus::Stop)) => {
                self.stop();
                Ok(PulseStatus::Stop)
            }
            Ok(Ok(PulseStatus::Continue)) if self.repeating => {
                // The action may have stopped its own handle while running.
                if self.is_stopped() {
                    self.stop();
                    return Ok(PulseStatus::Stop);
                }
                self.delay = self.interval;
                self.state = if self.delay == 0 {
                    PulseState::Active
                } else {
                    PulseState::Pending
                };
                Ok(PulseStatus::Continue)
            }
            Ok(Ok(PulseStatus::Continue)) => {
                self.stop();
                Err(PulseExecutionError::ContinueWithoutRepeat)
            }
            Ok(Err(source)) => {
                self.stop();
                Err(PulseExecutionError::Action { source })
            }
            Err(payload) => {
                self.stop();
                Err(PulseExecutionError::Panicked {
                    message: crate::panic_message(payload.as_ref()),
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::pulse_runner::PulseRunner;

    fn counting(counter: &Arc<AtomicU32>, status: PulseStatus) -> impl PulseAction + 'static {
        let counter = Arc::clone(counter);
        action(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(status)
        })
    }

    fn step_n(pulse: &mut Pulse, runner: &PulseRunner, n: u64) -> Vec<PulseStatus> {
        let submitter = runner.submitter();
        (1..=n)
            .map(|tick| {
                let ctx = PulseContext {
                    tick,
                    id: pulse.id(),
                    pulses: &submitter,
                };
                pulse.step(&ctx).unwrap()
            })
            .collect()
    }

    #[test]
    fn one_shot_runs_after_delay() {
        let runner = PulseRunner::new();
        let hits = Arc::new(AtomicU32::new(0));
        let mut pulse = Pulse::once("delay-3", 3, counting(&hits, PulseStatus::Stop));

        let statuses = step_n(&mut pulse, &runner, 2);
        assert_eq!(statuses, vec![PulseStatus::Continue, PulseStatus::Continue]);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(pulse.state(), PulseState::Pending);

        let statuses = step_n(&mut pulse, &runner, 1);
        assert_eq!(statuses, vec![PulseStatus::Stop]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(pulse.state(), PulseState::Terminal);
    }

    #[test]
    fn zero_delay_runs_on_first_step() {
        let runner = PulseRunner::new();
        let hits = Arc::new(AtomicU32::new(0));
        let mut pulse = Pulse::once("now", 0, counting(&hits, PulseStatus::Stop));
        assert_eq!(pulse.state(), PulseState::Active);
        assert_eq!(step_n(&mut pulse, &runner, 1), vec![PulseStatus::Stop]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn repeating_pulse_rearms_to_interval() {
        let runner = PulseRunner::new();
        let hits = Arc::new(AtomicU32::new(0));
        let mut pulse = Pulse::repeating("every-2", 2, counting(&hits, PulseStatus::Continue));

        let _ = step_n(&mut pulse, &runner, 6);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(pulse.delay(), 2);
        assert!(!pulse.is_stopped());
    }

    #[test]
    fn one_shot_continue_is_rejected() {
        let runner = PulseRunner::new();
        let submitter = runner.submitter();
        let hits = Arc::new(AtomicU32::new(0));
        let mut pulse = Pulse::once("confused", 1, counting(&hits, PulseStatus::Continue));
        let ctx = PulseContext {
            tick: 1,
            id: pulse.id(),
            pulses: &submitter,
        };
        assert!(matches!(
            pulse.step(&ctx),
            Err(PulseExecutionError::ContinueWithoutRepeat)
        ));
        assert_eq!(pulse.state(), PulseState::Terminal);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_action_is_contained() {
        let runner = PulseRunner::new();
        let submitter = runner.submitter();
        let mut pulse = Pulse::once("boom", 0, action(|_ctx| panic!("kaboom")));
        let ctx = PulseContext {
            tick: 1,
            id: pulse.id(),
            pulses: &submitter,
        };
        match pulse.step(&ctx) {
            Err(PulseExecutionError::Panicked { message }) => assert_eq!(message, "kaboom"),
            other => panic!("expected panic error, got {other:?}"),
        }
        assert!(pulse.is_stopped());
    }

    #[test]
    fn handle_stop_prevents_execution() {
        let runner = PulseRunner::new();
        let hits = Arc::new(AtomicU32::new(0));
        let mut pulse = Pulse::repeating("stoppable", 1, counting(&hits, PulseStatus::Continue));
        let handle = pulse.handle();

        let _ = step_n(&mut pulse, &runner, 2);
        handle.stop();
        handle.stop();
        assert_eq!(step_n(&mut pulse, &runner, 1), vec![PulseStatus::Stop]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(pulse.state(), PulseState::Terminal);
    }

    #[test]
    fn keyed_pulse_uses_given_id() {
        let id = PulseId::new();
        let pulse = Pulse::once("keyed", 1, action(|_ctx| Ok(PulseStatus::Stop))).keyed(id);
        assert_eq!(pulse.id(), id);
        assert_eq!(pulse.handle().id(), id);
    }
}
