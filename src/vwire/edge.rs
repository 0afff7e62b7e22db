//! Edge tracking for the sleep-state virtual wires.
//!
//! SLP_S3/S4/S5 receipts are not acted upon by the engine. The interrupt
//! path records the last edge seen and consumers poll or clear it.

use core::sync::atomic::{AtomicU8, Ordering};

use super::VwSignal;

/// Last edge observed on a sleep wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SleepEdge {
    /// Nothing seen since the last clear.
    None = 0,
    /// Wire went high.
    Rising = 1,
    /// Wire went low.
    Falling = 2,
}

impl SleepEdge {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => SleepEdge::Rising,
            2 => SleepEdge::Falling,
            _ => SleepEdge::None,
        }
    }
}

/// Per-signal edge latches for SLP_S3, SLP_S4 and SLP_S5.
#[derive(Debug)]
pub struct SleepEdgeTracker {
    edges: [AtomicU8; 3],
}

impl SleepEdgeTracker {
    /// Creates a tracker with no edge latched.
    pub const fn new() -> Self {
        Self {
            edges: [AtomicU8::new(0), AtomicU8::new(0), AtomicU8::new(0)],
        }
    }

    fn slot(signal: VwSignal) -> Option<usize> {
        match signal {
            VwSignal::SlpS3 => Some(0),
            VwSignal::SlpS4 => Some(1),
            VwSignal::SlpS5 => Some(2),
            _ => None,
        }
    }

    /// Latches the edge implied by a received level.
    ///
    /// Returns `false` for signals that are not tracked.
    pub fn record(&self, signal: VwSignal, level: bool) -> bool {
        let Some(slot) = Self::slot(signal) else {
            return false;
        };
        let edge = if level {
            SleepEdge::Rising
        } else {
            SleepEdge::Falling
        };
        self.edges[slot].store(edge as u8, Ordering::Release);
        true
    }

    /// Returns the latched edge without clearing it.
    pub fn get(&self, signal: VwSignal) -> SleepEdge {
        match Self::slot(signal) {
            Some(slot) => SleepEdge::from_raw(self.edges[slot].load(Ordering::Acquire)),
            None => SleepEdge::None,
        }
    }

    /// Clears the latch and returns what it held.
    pub fn clear(&self, signal: VwSignal) -> SleepEdge {
        match Self::slot(signal) {
            Some(slot) => SleepEdge::from_raw(self.edges[slot].swap(0, Ordering::AcqRel)),
            None => SleepEdge::None,
        }
    }
}

impl Default for SleepEdgeTracker {
    fn default() -> Self {
        Self::new()
    }
}
