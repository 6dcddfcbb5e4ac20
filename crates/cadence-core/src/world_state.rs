//! Process-wide readiness flag.
//!
//! [`WorldStateCell`] wraps a [`tokio::sync::watch`] channel so the tick
//! thread can await transitions instead of polling. Transitions only move
//! forward: `Uninitialized -> Ready` once, and anything `-> Terminated`.

use std::sync::Arc;

use cadence_types::WorldState;
use tokio::sync::watch;

/// Errors raised by illegal world-state transitions.
#[derive(Debug, thiserror::Error)]
pub enum WorldStateError {
    /// The requested transition is not permitted from the current state.
    #[error("cannot move world state from {from} to {to}")]
    InvalidTransition {
        /// State the world was in.
        from: WorldState,
        /// State that was requested.
        to: WorldState,
    },
}

/// Shared, observable [`WorldState`].
#[derive(Debug, Clone)]
pub struct WorldStateCell {
    tx: Arc<watch::Sender<WorldState>>,
}

impl Default for WorldStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldStateCell {
    /// Create a cell in [`WorldState::Uninitialized`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(WorldState::Uninitialized);
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    pub fn get(&self) -> WorldState {
        *self.tx.borrow()
    }

    /// Flip `Uninitialized` to `Ready`.
    ///
    /// # Errors
    ///
    /// Returns [`WorldStateError::InvalidTransition`] if the world is
    /// already ready or terminated.
    pub fn mark_ready(&self) -> Result<(), WorldStateError> {
        let mut from = WorldState::Uninitialized;
        let changed = self.tx.send_if_modified(|state| {
            from = *state;
            if *state == WorldState::Uninitialized {
                *state = WorldState::Ready;
                true
            } else {
                false
            }
        });
        if changed {
            Ok(())
        } else {
            Err(WorldStateError::InvalidTransition {
                from,
                to: WorldState::Ready,
            })
        }
    }

    /// Move to `Terminated`. Idempotent; returns `true` only for the call
    /// that performed the transition.
    pub fn terminate(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = WorldState::Terminated;
                true
            }
        })
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<WorldState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn starts_uninitialized() {
        assert_eq!(WorldStateCell::new().get(), WorldState::Uninitialized);
    }

    #[test]
    fn ready_only_once() {
        let cell = WorldStateCell::new();
        cell.mark_ready().unwrap();
        assert_eq!(cell.get(), WorldState::Ready);
        assert!(matches!(
            cell.mark_ready(),
            Err(WorldStateError::InvalidTransition {
                from: WorldState::Ready,
                ..
            })
        ));
    }

    #[test]
    fn terminate_is_idempotent_and_final() {
        let cell = WorldStateCell::new();
        cell.mark_ready().unwrap();
        assert!(cell.terminate());
        assert!(!cell.terminate());
        assert_eq!(cell.get(), WorldState::Terminated);
        assert!(cell.mark_ready().is_err());
        assert_eq!(cell.get(), WorldState::Terminated);
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let cell = WorldStateCell::new();
        let mut rx = cell.subscribe();
        let clone = cell.clone();
        let waiter = tokio::spawn(async move {
            rx.wait_for(|state| state.is_terminal()).await.map(|s| *s)
        });
        clone.terminate();
        assert_eq!(waiter.await.unwrap().unwrap(), WorldState::Terminated);
    }
}
