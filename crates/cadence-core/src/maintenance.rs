//! Periodic maintenance run off the tick thread.
//!
//! Every K ticks the driver hands each registered [`MaintenanceTask`] to the
//! [`TaskExecutor`](crate::executor::TaskExecutor) together with an immutable
//! [`MaintenanceSnapshot`]. Tasks never receive a reference into tick-thread
//! state; anything shared they need must come through their own
//! thread-safe accessor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::executor::TaskError;

/// Values captured on the tick thread at the moment maintenance was due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceSnapshot {
    /// Tick that triggered this run.
    pub tick: u64,
    /// Live pulses after that tick's advance.
    pub live_pulses: usize,
    /// Wall-clock time the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

/// Bulk or slow work that runs every K ticks (save sweeps, disconnection
/// sweeps, cache compaction).
pub trait MaintenanceTask: Send + Sync + 'static {
    /// Label used for logs and executor accounting.
    fn name(&self) -> &'static str;

    /// Perform the work. Runs on an executor worker, never on the tick
    /// thread.
    fn run(&self, snapshot: &MaintenanceSnapshot) -> Result<(), TaskError>;
}
