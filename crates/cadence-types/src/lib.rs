//! Shared type definitions for the Cadence tick scheduler.
//!
//! - [`ids`] -- Strongly typed identifiers ([`PulseId`]).
//! - [`enums`] -- [`WorldState`], [`ShutdownMode`] and [`BootStage`].

pub mod enums;
pub mod ids;

pub use enums::{BootStage, ShutdownMode, WorldState};
pub use ids::PulseId;
