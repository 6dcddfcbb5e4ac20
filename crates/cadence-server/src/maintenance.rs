//! Periodic maintenance tasks.

use std::path::PathBuf;

use cadence_core::executor::TaskError;
use cadence_core::maintenance::{MaintenanceSnapshot, MaintenanceTask};
use tracing::debug;

/// Name of the checkpoint file written under the store directory.
pub const CHECKPOINT_FILE: &str = "checkpoint";

/// Records the latest maintenance snapshot, as YAML, in the store directory.
#[derive(Debug)]
pub struct SaveSweep {
    path: PathBuf,
}

impl SaveSweep {
    /// Sweep writing to `<store_path>/checkpoint`.
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            path: store_path.into().join(CHECKPOINT_FILE),
        }
    }
}

impl MaintenanceTask for SaveSweep {
    fn name(&self) -> &'static str {
        "save-sweep"
    }

    fn run(&self, snapshot: &MaintenanceSnapshot) -> Result<(), TaskError> {
        let body = serde_yml::to_string(snapshot)?;
        std::fs::write(&self.path, body)?;
        debug!(tick = snapshot.tick, path = %self.path.display(), "Checkpoint written");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn writes_the_latest_snapshot() {
        let dir = std::env::temp_dir().join(format!("cadence-sweep-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sweep = SaveSweep::new(&dir);

        let mut latest = None;
        for tick in [50, 100] {
            let snapshot = MaintenanceSnapshot {
                tick,
                live_pulses: 3,
                taken_at: std::time::SystemTime::now().into(),
            };
            sweep.run(&snapshot).unwrap();
            latest = Some(snapshot);
        }

        let written = std::fs::read_to_string(dir.join(CHECKPOINT_FILE)).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
        let restored: MaintenanceSnapshot = serde_yml::from_str(&written).unwrap();
        assert_eq!(Some(restored), latest);
    }

    #[test]
    fn missing_directory_is_a_task_error() {
        let sweep = SaveSweep::new("definitely/not/a/store");
        let snapshot = MaintenanceSnapshot {
            tick: 1,
            live_pulses: 0,
            taken_at: std::time::SystemTime::now().into(),
        };
        assert!(sweep.run(&snapshot).is_err());
    }
}
