//! Enumeration types shared between the scheduler core and the server binary.

use serde::{Deserialize, Serialize};

/// Process-wide readiness of the game world.
///
/// The lifecycle is strictly forward: `Uninitialized` at process start,
/// `Ready` once startup completes, `Terminated` on shutdown. Nothing leads
/// back to `Ready` from `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldState {
    /// Startup has not finished; the tick loop must not run.
    #[default]
    Uninitialized,
    /// All subsystems are online; the tick loop may run.
    Ready,
    /// Shutdown was requested; no further ticks fire.
    Terminated,
}

impl WorldState {
    /// Whether the tick loop is allowed to fire in this state.
    pub const fn accepts_ticks(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether this state is final.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl core::fmt::Display for WorldState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let label = match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Terminated => "terminated",
        };
        f.write_str(label)
    }
}

/// What happens to queued and in-flight executor work on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Stop accepting work, then wait for every queued item to finish.
    #[default]
    Drain,
    /// Stop accepting work and drop whatever has not started yet.
    Abandon,
}

/// A step in the fixed startup sequence.
///
/// The order of [`BootStage::ORDER`] is a contract, not something discovered
/// at runtime: each stage may rely on every earlier stage being online.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootStage {
    /// Content cache and server store on disk.
    PersistentStore,
    /// Primary database connection.
    Database,
    /// Secondary databases (exchange, hiscores and the like).
    AuxiliaryDatabases,
    /// Script loading.
    Scripts,
    /// Configuration that plugins depend on.
    PrePluginConfig,
    /// Plugin discovery and initialization.
    Plugins,
    /// Configuration that depends on plugins.
    PostPluginConfig,
    /// Static content tables (drop tables and similar).
    ContentTables,
    /// Optional simulated population (bots).
    SimulatedPopulation,
    /// Registration of world callbacks.
    Callbacks,
    /// Plugins that run once at startup.
    StartupPlugins,
    /// Built-in flip of the world state to [`WorldState::Ready`].
    WorldReady,
    /// Caches derived from the loaded content.
    ContentCaches,
}

impl BootStage {
    /// Every stage in the order the bootstrapper runs them.
    pub const ORDER: [Self; 13] = [
        Self::PersistentStore,
        Self::Database,
        Self::AuxiliaryDatabases,
        Self::Scripts,
        Self::PrePluginConfig,
        Self::Plugins,
        Self::PostPluginConfig,
        Self::ContentTables,
        Self::SimulatedPopulation,
        Self::Callbacks,
        Self::StartupPlugins,
        Self::WorldReady,
        Self::ContentCaches,
    ];

    /// Short snake-case name used in logs and errors.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PersistentStore => "persistent_store",
            Self::Database => "database",
            Self::AuxiliaryDatabases => "auxiliary_databases",
            Self::Scripts => "scripts",
            Self::PrePluginConfig => "pre_plugin_config",
            Self::Plugins => "plugins",
            Self::PostPluginConfig => "post_plugin_config",
            Self::ContentTables => "content_tables",
            Self::SimulatedPopulation => "simulated_population",
            Self::Callbacks => "callbacks",
            Self::StartupPlugins => "startup_plugins",
            Self::WorldReady => "world_ready",
            Self::ContentCaches => "content_caches",
        }
    }
}

impl core::fmt::Display for BootStage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
