//! Global tick counter.
//!
//! The clock is the single source of truth for simulation time. Exactly one
//! [`GlobalClock`] exists per world and it is owned by the tick driver, so
//! the tick thread is the only writer. Everyone else observes the counter
//! through a cheap, cloneable [`ClockReader`].
//!
//! # Design Principles
//!
//! - The counter only moves forward, one tick at a time.
//! - Overflow is reported, never wrapped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,
}

/// The writable tick counter. Not `Clone`: there is one writer.
#[derive(Debug, Default)]
pub struct GlobalClock {
    ticks: Arc<AtomicU64>,
}

impl GlobalClock {
    /// Create a clock at tick 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock at an explicit tick (useful for testing and state
    /// restoration).
    pub fn starting_at(ticks: u64) -> Self {
        Self {
            ticks: Arc::new(AtomicU64::new(ticks)),
        }
    }

    /// Advance the clock by one tick. Returns the new tick number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] if the tick counter would exceed
    /// `u64::MAX`.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        let next = self
            .ticks()
            .checked_add(1)
            .ok_or(ClockError::TickOverflow)?;
        self.ticks.store(next, Ordering::Release);
        Ok(next)
    }

    /// Return the current tick number.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Hand out a read-only view of this clock.
    pub fn reader(&self) -> ClockReader {
        ClockReader {
            ticks: Arc::clone(&self.ticks),
        }
    }
}

/// Read-only view of the [`GlobalClock`], safe to share across threads.
#[derive(Debug, Clone)]
pub struct ClockReader {
    ticks: Arc<AtomicU64>,
}

impl ClockReader {
    /// Return the current tick number.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn clock_starts_at_tick_zero() {
        let clock = GlobalClock::new();
        assert_eq!(clock.ticks(), 0);
    }

    #[test]
    fn clock_advances() {
        let mut clock = GlobalClock::new();
        assert_eq!(clock.advance().unwrap(), 1);
        assert_eq!(clock.advance().unwrap(), 2);
        assert_eq!(clock.ticks(), 2);
    }

    #[test]
    fn reader_observes_writer() {
        let mut clock = GlobalClock::new();
        let reader = clock.reader();
        for _ in 0..10 {
            let _ = clock.advance();
        }
        assert_eq!(reader.ticks(), 10);
        assert_eq!(reader.clone().ticks(), 10);
    }

    #[test]
    fn overflow_is_reported_and_counter_unchanged() {
        let mut clock = GlobalClock::starting_at(u64::MAX);
        assert!(matches!(clock.advance(), Err(ClockError::TickOverflow)));
        assert_eq!(clock.ticks(), u64::MAX);
    }
}
