//! Owner and stepper of all live pulses.
//!
//! The [`PulseRunner`] lives on the tick thread and is the only code that
//! ever steps a pulse. Other subsystems schedule work through a cloneable
//! [`PulseSubmitter`], which performs the duplicate check immediately and
//! then hands the pulse over a channel. The runner drains that channel at
//! the start of every [`advance`](PulseRunner::advance), so a pulse
//! submitted mid-tick is first stepped on the following tick.
//!
//! # Invariants
//!
//! - Live pulses are stepped in insertion order.
//! - No pulse is stepped twice in the same tick.
//! - A pulse that stops, finishes, or fails is removed before the next tick.
//! - A failing pulse never prevents the remaining pulses from stepping.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cadence_types::PulseId;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::pulse::{Pulse, PulseContext, PulseExecutionError, PulseHandle, PulseStatus};

/// Set of handles that are submitted and not yet removed.
type LiveRegistry = Arc<Mutex<BTreeSet<PulseId>>>;

fn lock(registry: &Mutex<BTreeSet<PulseId>>) -> MutexGuard<'_, BTreeSet<PulseId>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A pulse handle was submitted while a pulse with the same handle is
/// still live.
#[derive(Debug, thiserror::Error)]
#[error("pulse {id} is already live")]
pub struct DuplicateSubmissionError {
    /// The offending handle.
    pub id: PulseId,
}

/// Errors returned by [`PulseSubmitter::submit`].
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The handle is already live.
    #[error(transparent)]
    Duplicate(#[from] DuplicateSubmissionError),

    /// The runner has been dropped (the tick loop is gone).
    #[error("pulse runner is closed; pulse {id} was not scheduled")]
    RunnerClosed {
        /// Handle of the rejected pulse.
        id: PulseId,
    },
}

/// Counts from one call to [`PulseRunner::advance`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvanceSummary {
    /// Tick the advance ran for.
    pub tick: u64,
    /// Pulses moved from the inbox into the live set.
    pub admitted: usize,
    /// Pulses stepped.
    pub stepped: usize,
    /// Pulses removed after finishing or being stopped.
    pub retired: usize,
    /// Pulses removed after failing.
    pub failed: usize,
}

/// Cloneable, thread-safe entry point for scheduling pulses.
#[derive(Debug, Clone)]
pub struct PulseSubmitter {
    registry: LiveRegistry,
    sender: mpsc::UnboundedSender<Pulse>,
}

impl PulseSubmitter {
    /// Schedule a pulse. It is first stepped on the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Duplicate`] if a pulse with the same handle is
    /// live, or [`SubmitError::RunnerClosed`] if the runner no longer exists.
    pub fn submit(&self, pulse: Pulse) -> Result<PulseHandle, SubmitError> {
        let id = pulse.id();
        if !lock(&self.registry).insert(id) {
            return Err(DuplicateSubmissionError { id }.into());
        }
        let handle = pulse.handle();
        if self.sender.send(pulse).is_err() {
            lock(&self.registry).remove(&id);
            return Err(SubmitError::RunnerClosed { id });
        }
        debug!(pulse_id = %id, "pulse queued for next tick");
        Ok(handle)
    }

    /// Whether a pulse with this handle is queued or live.
    pub fn is_live(&self, id: PulseId) -> bool {
        lock(&self.registry).contains(&id)
    }
}

/// The live set of pulses, stepped once per tick.
#[derive(Debug)]
pub struct PulseRunner {
    live: Vec<Pulse>,
    registry: LiveRegistry,
    inbox: mpsc::UnboundedReceiver<Pulse>,
    submitter: PulseSubmitter,
}

impl Default for PulseRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseRunner {
    /// Create an empty runner.
    pub fn new() -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();
        let registry = LiveRegistry::default();
        Self {
            live: Vec::new(),
            registry: Arc::clone(&registry),
            inbox,
            submitter: PulseSubmitter { registry, sender },
        }
    }

    /// A submitter feeding this runner.
    pub fn submitter(&self) -> PulseSubmitter {
        self.submitter.clone()
    }

    /// Add a pulse directly to the live set. For use on the tick thread, or
    /// before the tick loop starts.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateSubmissionError`] if a pulse with the same handle
    /// is live or queued.
    pub fn submit(&mut self, pulse: Pulse) -> Result<PulseHandle, DuplicateSubmissionError> {
        let id = pulse.id();
        if !lock(&self.registry).insert(id) {
            return Err(DuplicateSubmissionError { id });
        }
        let handle = pulse.handle();
        self.live.push(pulse);
        Ok(handle)
    }

    /// Number of live pulses (queued submissions not included).
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether no pulses are live.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Whether a pulse with this handle is in the live set.
    pub fn contains(&self, id: PulseId) -> bool {
        self.live.iter().any(|pulse| pulse.id() == id)
    }

    /// Step every live pulse once for `tick`.
    ///
    /// Pulses submitted through a [`PulseSubmitter`] since the previous call
    /// are admitted first. Failures are logged with the pulse's identity and
    /// the tick, and the pulse is dropped; they never escape this call.
    pub fn advance(&mut self, tick: u64) -> AdvanceSummary {
        let mut summary = AdvanceSummary {
            tick,
            ..AdvanceSummary::default()
        };

        while let Ok(pulse) = self.inbox.try_recv() {
            self.live.push(pulse);
            summary.admitted = summary.admitted.saturating_add(1);
        }

        let submitter = &self.submitter;
        let mut removed = Vec::new();

        self.live.retain_mut(|pulse| {
            let ctx = PulseContext {
                tick,
                id: pulse.id(),
                pulses: submitter,
            };
            summary.stepped = summary.stepped.saturating_add(1);

            match pulse.step(&ctx) {
                Ok(PulseStatus::Continue) => true,
                Ok(PulseStatus::Stop) => {
                    summary.retired = summary.retired.saturating_add(1);
                    removed.push(pulse.id());
                    false
                }
                Err(err) => {
                    report_failure(tick, pulse, &err);
                    summary.failed = summary.failed.saturating_add(1);
                    removed.push(pulse.id());
                    false
                }
            }
        });

        if !removed.is_empty() {
            let mut registry = lock(&self.registry);
            for id in &removed {
                registry.remove(id);
            }
        }

        summary
    }

    /// Stop and drop every live and queued pulse. Returns how many were
    /// dropped.
    pub fn clear(&mut self) -> usize {
        while let Ok(pulse) = self.inbox.try_recv() {
            self.live.push(pulse);
        }
        let dropped = self.live.len();
        for pulse in &mut self.live {
            pulse.stop();
        }
        self.live.clear();
        lock(&self.registry).clear();
        dropped
    }
}

fn report_failure(tick: u64, pulse: &Pulse, err: &PulseExecutionError) {
    match err {
        PulseExecutionError::ContinueWithoutRepeat => warn!(
            tick,
            pulse_id = %pulse.id(),
            pulse = pulse.name(),
            "non-repeating pulse asked to continue, stopping it"
        ),
        PulseExecutionError::Action { .. } | PulseExecutionError::Panicked { .. } => error!(
            tick,
            pulse_id = %pulse.id(),
            pulse = pulse.name(),
            error = %err,
            "pulse failed, stopping it"
        ),
    }
}
