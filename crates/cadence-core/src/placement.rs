//! Random tile selection for spawning.
//!
//! A candidate tile is drawn uniformly from a square around a center and
//! offered to a caller-supplied predicate (teleport permitted, tile not
//! occupied by an object). Rejected candidates are retried up to a fixed
//! number of attempts; exhaustion is an error rather than an endless loop.

use rand::Rng;

/// Attempts made by callers that have no better bound.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 64;

/// A position in the world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tile {
    /// East-west coordinate.
    pub x: i32,
    /// North-south coordinate.
    pub y: i32,
    /// Height level.
    pub plane: u8,
}

impl Tile {
    /// Construct a tile.
    pub const fn new(x: i32, y: i32, plane: u8) -> Self {
        Self { x, y, plane }
    }
}

impl core::fmt::Display for Tile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.plane)
    }
}

/// A square of tiles `center ± radius` on the center's plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnArea {
    /// Middle of the square.
    pub center: Tile,
    /// Half the side length, in tiles.
    pub radius: u16,
}

impl SpawnArea {
    /// The wilderness square used for simulated-population spawns.
    pub const WILDERNESS: Self = Self {
        center: Tile::new(3075, 3954, 0),
        radius: 15,
    };

    /// Whether `tile` lies inside the square.
    pub fn contains(&self, tile: Tile) -> bool {
        let radius = i64::from(self.radius);
        let dx = (i64::from(tile.x) - i64::from(self.center.x)).abs();
        let dy = (i64::from(tile.y) - i64::from(self.center.y)).abs();
        tile.plane == self.center.plane && dx <= radius && dy <= radius
    }
}

/// Errors from tile selection.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// Every candidate was rejected.
    #[error("no acceptable tile found after {attempts} attempts")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
}

/// Draw tiles from `area` until `accept` returns `true`, at most
/// `max_attempts` times.
///
/// # Errors
///
/// Returns [`PlacementError::Exhausted`] if no candidate is accepted.
pub fn random_location<R>(
    rng: &mut R,
    area: &SpawnArea,
    max_attempts: u32,
    mut accept: impl FnMut(Tile) -> bool,
) -> Result<Tile, PlacementError>
where
    R: Rng + ?Sized,
{
    let radius = i32::from(area.radius);
    for _ in 0..max_attempts {
        let dx = rng.random_range(radius.saturating_neg()..=radius);
        let dy = rng.random_range(radius.saturating_neg()..=radius);
        let candidate = Tile::new(
            area.center.x.saturating_add(dx),
            area.center.y.saturating_add(dy),
            area.center.plane,
        );
        if accept(candidate) {
            return Ok(candidate);
        }
    }
    Err(PlacementError::Exhausted {
        attempts: max_attempts,
    })
}
