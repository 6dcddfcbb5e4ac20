//! Subsystems registered with the bootstrapper.
//!
//! These are the server's stand-ins for external collaborators. Each one
//! does the minimum needed to prove its dependency is usable and fails
//! startup if it is not.

use std::collections::HashSet;
use std::path::Path;

use cadence_core::BoxError;
use cadence_core::bootstrap::{BootContext, Subsystem};
use cadence_core::placement::{self, DEFAULT_MAX_ATTEMPTS, PlacementError, SpawnArea, Tile};
use cadence_core::pulse::{Pulse, PulseAction, PulseContext, PulseStatus, action};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

/// Ticks between roaming moves of the simulated population.
const ROAM_INTERVAL: u64 = 5;

/// Makes sure the store and cache directories exist.
#[derive(Debug, Default)]
pub struct PersistentStore;

impl Subsystem for PersistentStore {
    fn name(&self) -> &str {
        "persistent-store"
    }

    fn init(&mut self, ctx: &BootContext<'_>) -> Result<(), BoxError> {
        let infra = &ctx.config.infrastructure;
        for dir in [&infra.store_path, &infra.cache_path] {
            std::fs::create_dir_all(dir)
                .map_err(|err| format!("cannot prepare directory {dir}: {err}"))?;
        }
        info!(
            store_path = infra.store_path,
            cache_path = infra.cache_path,
            "Persistent store ready"
        );
        Ok(())
    }
}

/// Checks that the primary database endpoint is a Postgres URL.
#[derive(Debug, Default)]
pub struct DatabaseEndpoint;

impl Subsystem for DatabaseEndpoint {
    fn name(&self) -> &str {
        "database"
    }

    fn init(&mut self, ctx: &BootContext<'_>) -> Result<(), BoxError> {
        let url = &ctx.config.infrastructure.database_url;
        let Some((_scheme, rest)) = url
            .split_once("://")
            .filter(|(scheme, _)| matches!(*scheme, "postgres" | "postgresql"))
        else {
            return Err(format!("unsupported database url: {url}").into());
        };
        // Log the host only; the rest may carry credentials.
        let host = rest.rsplit('@').next().unwrap_or(rest);
        info!(host, "Database endpoint configured");
        Ok(())
    }
}

/// Logs once the first tick has run.
#[derive(Debug, Default)]
pub struct StartupAnnouncer;

impl Subsystem for StartupAnnouncer {
    fn name(&self) -> &str {
        "startup-announcer"
    }

    fn init(&mut self, ctx: &BootContext<'_>) -> Result<(), BoxError> {
        let world = ctx.config.world.name.clone();
        ctx.pulses.submit(Pulse::once(
            "announce-online",
            0,
            action(move |pulse| {
                info!(world, tick = pulse.tick, "World online");
                Ok(PulseStatus::Stop)
            }),
        ))?;
        Ok(())
    }
}

/// Indexes the content cache off the tick thread.
#[derive(Debug, Default)]
pub struct ContentCacheIndex;

impl Subsystem for ContentCacheIndex {
    fn name(&self) -> &str {
        "content-cache-index"
    }

    fn init(&mut self, ctx: &BootContext<'_>) -> Result<(), BoxError> {
        let dir = ctx.config.infrastructure.cache_path.clone();
        ctx.executor.submit("content-cache-index", move || {
            let entries = count_entries(Path::new(&dir))?;
            info!(cache_path = dir, entries, "Content cache indexed");
            Ok(())
        })?;
        Ok(())
    }
}

fn count_entries(dir: &Path) -> std::io::Result<usize> {
    std::fs::read_dir(dir)?.try_fold(0_usize, |count, entry| {
        entry.map(|_entry| count.saturating_add(1))
    })
}

/// Places the simulated population and keeps it roaming.
#[derive(Debug)]
pub struct BotPopulation {
    area: SpawnArea,
}

impl BotPopulation {
    /// Population confined to `area`.
    pub const fn new(area: SpawnArea) -> Self {
        Self { area }
    }
}

impl Default for BotPopulation {
    fn default() -> Self {
        Self::new(SpawnArea::WILDERNESS)
    }
}

impl Subsystem for BotPopulation {
    fn name(&self) -> &str {
        "bot-population"
    }

    fn init(&mut self, ctx: &BootContext<'_>) -> Result<(), BoxError> {
        let size = usize::try_from(ctx.config.world.population_size)?;
        let mut rng = StdRng::from_os_rng();
        let bots = place_bots(&mut rng, &self.area, size)?;
        info!(bots = bots.len(), center = %self.area.center, "Simulated population placed");

        let roam = Roam::new(rng, self.area, bots);
        ctx.pulses
            .submit(Pulse::repeating("population-roam", ROAM_INTERVAL, roam))?;
        Ok(())
    }
}

/// Pick `count` distinct tiles in `area`.
///
/// # Errors
///
/// Returns [`PlacementError::Exhausted`] when a free tile cannot be found,
/// which happens once the area is close to full.
pub fn place_bots<R: Rng + ?Sized>(
    rng: &mut R,
    area: &SpawnArea,
    count: usize,
) -> Result<Vec<Tile>, PlacementError> {
    let mut occupied = HashSet::with_capacity(count);
    let mut bots = Vec::with_capacity(count);
    for _ in 0..count {
        let tile = placement::random_location(rng, area, DEFAULT_MAX_ATTEMPTS, |tile| {
            !occupied.contains(&tile)
        })?;
        occupied.insert(tile);
        bots.push(tile);
    }
    Ok(bots)
}

/// Moves one bot to a free tile every time it runs.
#[derive(Debug)]
struct Roam {
    rng: StdRng,
    area: SpawnArea,
    bots: Vec<Tile>,
    occupied: HashSet<Tile>,
}

impl Roam {
    fn new(rng: StdRng, area: SpawnArea, bots: Vec<Tile>) -> Self {
        let occupied = bots.iter().copied().collect();
        Self {
            rng,
            area,
            bots,
            occupied,
        }
    }
}

impl PulseAction for Roam {
    fn execute(&mut self, ctx: &PulseContext<'_>) -> Result<PulseStatus, BoxError> {
        if self.bots.is_empty() {
            return Ok(PulseStatus::Stop);
        }
        let index = self.rng.random_range(0..self.bots.len());
        let occupied = &self.occupied;
        match placement::random_location(&mut self.rng, &self.area, DEFAULT_MAX_ATTEMPTS, |tile| {
            !occupied.contains(&tile)
        }) {
            Ok(to) => {
                if let Some(bot) = self.bots.get_mut(index) {
                    self.occupied.remove(&*bot);
                    self.occupied.insert(to);
                    debug!(tick = ctx.tick, from = %bot, %to, "Bot moved");
                    *bot = to;
                }
            }
            Err(err) => debug!(tick = ctx.tick, error = %err, "Bot stayed put"),
        }
        Ok(PulseStatus::Continue)
    }
}
