//! Tick-driven scheduling core for the Cadence game server.
//!
//! This crate owns the fixed-interval simulation loop and everything it
//! drives: startup sequencing, the global tick counter, deferred actions
//! ("pulses") and off-tick work.
//!
//! # Modules
//!
//! - [`bootstrap`] -- Ordered startup sequence over external subsystems.
//! - [`clock`] -- Global tick counter with a single writer.
//! - [`config`] -- Configuration loading from `cadence.yaml` into
//!   strongly-typed structs.
//! - [`driver`] -- The fixed-interval tick loop.
//! - [`executor`] -- Bounded worker pool for blocking or bulk work.
//! - [`maintenance`] -- Periodic off-tick work and its immutable snapshot.
//! - [`placement`] -- Bounded random tile selection for spawning.
//! - [`pulse`] -- Resumable deferred actions.
//! - [`pulse_runner`] -- Owner and stepper of all live pulses.
//! - [`world`] -- The scheduler context with the startup and shutdown
//!   entry points.
//! - [`world_state`] -- Process-wide readiness flag.

pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod driver;
pub mod executor;
pub mod maintenance;
pub mod placement;
pub mod pulse;
pub mod pulse_runner;
pub mod world;
pub mod world_state;

use std::any::Any;

/// Boxed error returned by collaborator code (pulse actions, executor work,
/// subsystem initialization).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Render a caught panic payload as text for logging.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}
