//! Simulation time with femtosecond precision and delta cycles.
//!
//! [`SimTime`] orders events first by physical time (femtoseconds, the LRM's
//! finest resolution) and then by delta cycle index within one time step.
//! Zero-delay transactions are scheduled at the *next* delta of the current
//! instant, which is what makes the two-phase cycle of the scheduler
//! deterministic.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Femtoseconds per picosecond.
pub const FS_PER_PS: u64 = 1_000;
/// Femtoseconds per nanosecond.
pub const FS_PER_NS: u64 = 1_000_000;
/// Femtoseconds per microsecond.
pub const FS_PER_US: u64 = 1_000_000_000;

/// A simulation time point with femtosecond resolution and delta index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimTime {
    /// Physical simulation time in femtoseconds.
    pub fs: u64,
    /// Delta cycle index within the current time step.
    pub delta: u32,
}

impl SimTime {
    /// The time point at zero femtoseconds, delta zero.
    pub const ZERO: SimTime = SimTime { fs: 0, delta: 0 };

    /// Creates a time from a femtosecond value with delta 0.
    pub fn from_fs(fs: u64) -> Self {
        Self { fs, delta: 0 }
    }

    /// Creates a time from a nanosecond value with delta 0.
    pub fn from_ns(ns: u64) -> Self {
        Self {
            fs: ns * FS_PER_NS,
            delta: 0,
        }
    }

    /// Returns the next delta cycle at the same physical time.
    pub fn next_delta(&self) -> Self {
        Self {
            fs: self.fs,
            delta: self.delta + 1,
        }
    }

    /// Returns this time advanced by `delay_fs`, with the delta reset if the
    /// delay is non-zero and incremented otherwise.
    pub fn after(&self, delay_fs: u64) -> Self {
        if delay_fs == 0 {
            self.next_delta()
        } else {
            Self {
                fs: self.fs + delay_fs,
                delta: 0,
            }
        }
    }

    /// Advances to a new physical time, resetting the delta counter.
    pub fn advance_to(&self, new_fs: u64) -> Self {
        debug_assert!(
            new_fs >= self.fs,
            "cannot advance backwards: {} -> {}",
            self.fs,
            new_fs
        );
        Self {
            fs: new_fs,
            delta: 0,
        }
    }

    /// Returns `true` if `other` is at the same physical time.
    pub fn same_instant(&self, other: &SimTime) -> bool {
        self.fs == other.fs
    }
}

impl Default for SimTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fs.cmp(&other.fs).then(self.delta.cmp(&other.delta))
    }
}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fs = self.fs;
        if fs == 0 {
            write!(f, "0 fs")?;
        } else if fs >= FS_PER_US && fs % FS_PER_US == 0 {
            write!(f, "{} us", fs / FS_PER_US)?;
        } else if fs >= FS_PER_NS && fs % FS_PER_NS == 0 {
            write!(f, "{} ns", fs / FS_PER_NS)?;
        } else if fs >= FS_PER_PS && fs % FS_PER_PS == 0 {
            write!(f, "{} ps", fs / FS_PER_PS)?;
        } else {
            write!(f, "{fs} fs")?;
        }
        if self.delta > 0 {
            write!(f, "+d{}", self.delta)?;
        }
        Ok(())
    }
}
