//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Scheduler handles are strongly typed so a pulse handle can never be
//! confused with any other identifier at compile time. IDs use UUID v7
//! (time-ordered), which keeps log output roughly sorted by creation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Opaque handle of a pulse submitted to the pulse runner.
    ///
    /// Subsystems that must never schedule the same logical action twice
    /// (one walk pulse per entity, one respawn timer per spawn point) build
    /// the id themselves with [`PulseId::from`] and let the runner's
    /// duplicate guard reject a second submission.
    PulseId
}
