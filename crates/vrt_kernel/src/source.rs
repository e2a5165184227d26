//! Value sources: drivers with transaction queues, port connections, and
//! the pseudo-sources used by force/deposit.
//!
//! Each nexus carries a list of sources. A driver belongs to exactly one
//! process and holds a time-ordered queue of future transactions mutated
//! under the pulse-rejection rules of the LRM's signal-update algorithm. A
//! port source pulls the driving value of an upstream nexus, optionally
//! through a conversion closure.

use crate::process::ProcessId;
use crate::time::SimTime;
use std::sync::Arc;

/// A conversion closure applied on a converted port association. Reads the
/// packed upstream bytes and writes the converted downstream bytes.
pub type Conversion = Arc<dyn Fn(&[u8], &mut [u8]) + Send + Sync>;

/// One scheduled transaction in a driver's queue.
#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    /// When the transaction fires.
    pub when: SimTime,
    /// The scheduled value (nexus-width bytes).
    pub value: Vec<u8>,
    /// A null transaction, produced by `disconnect`; a fired null leaves
    /// the driver contributing nothing until re-driven.
    pub null: bool,
}

/// A process's driver for one nexus.
pub struct Driver {
    /// The owning process.
    pub process: ProcessId,
    /// The value the driver currently contributes (after the most recently
    /// fired transaction).
    pub current: Vec<u8>,
    /// Whether the driver is currently null (disconnected).
    pub null: bool,
    /// Future transactions, ascending by time.
    pub waveforms: Vec<Waveform>,
}

impl Driver {
    /// Creates a driver contributing `initial` until a transaction fires.
    pub fn new(process: ProcessId, initial: Vec<u8>) -> Self {
        Self {
            process,
            current: initial,
            null: false,
            waveforms: Vec::new(),
        }
    }

    /// Inserts a transaction at `when`, applying the queue-editing rules:
    ///
    /// 1. Every pending transaction at or after `when` is deleted — a new
    ///    assignment supersedes the projected future.
    /// 2. If a retained transaction inside `[when - reject, when)` already
    ///    schedules the same value, the new transaction is redundant and is
    ///    suppressed (the earlier time is retained).
    ///
    /// Returns `true` if the transaction was inserted.
    pub fn schedule(&mut self, when: SimTime, reject_fs: u64, value: Vec<u8>, null: bool) -> bool {
        self.waveforms.retain(|wf| wf.when < when);
        if reject_fs > 0 {
            let window_start = when.fs.saturating_sub(reject_fs);
            let duplicate = self.waveforms.iter().any(|wf| {
                wf.when.fs >= window_start && wf.value == value && wf.null == null
            });
            if duplicate {
                return false;
            }
        }
        self.waveforms.push(Waveform { when, value, null });
        true
    }

    /// Fires every transaction due at or before `now`, the last one winning,
    /// and updates the contributed value. Returns `true` if any fired.
    pub fn fire_due(&mut self, now: SimTime) -> bool {
        let due = self
            .waveforms
            .iter()
            .take_while(|wf| wf.when <= now)
            .count();
        if due == 0 {
            return false;
        }
        for wf in self.waveforms.drain(..due) {
            self.null = wf.null;
            if !wf.null {
                self.current = wf.value;
            }
        }
        true
    }

    /// Overwrites the contributed value directly, bypassing the queue (the
    /// zero-delay fast path). As with any assignment, every projected
    /// transaction after the insertion point is deleted, which here is the
    /// whole queue.
    pub fn drive_fast(&mut self, value: Vec<u8>, null: bool) {
        self.waveforms.clear();
        self.null = null;
        if !null {
            self.current = value;
        }
    }
}

/// A source of values for one nexus.
pub enum Source {
    /// A process driver with its transaction queue.
    Driver(Driver),
    /// A port association pulling from an upstream nexus.
    Port {
        /// The nexus this port reads.
        upstream: crate::nexus::NexusId,
        /// Conversion applied between upstream and downstream bytes.
        conversion: Option<Conversion>,
    },
}

impl Source {
    /// Returns the driver, if this source is one.
    pub fn as_driver(&self) -> Option<&Driver> {
        match self {
            Source::Driver(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the driver mutably, if this source is one.
    pub fn as_driver_mut(&mut self) -> Option<&mut Driver> {
        match self {
            Source::Driver(d) => Some(d),
            _ => None,
        }
    }

    /// Clones this source for the tail half of a nexus split, narrowing
    /// driver values and queued transactions to the byte sub-range.
    ///
    /// Port sources are cloned with the upstream reference left for the
    /// caller to retarget once the upstream side has been split.
    pub fn clone_narrowed(&self, byte_offset: usize, byte_len: usize) -> Source {
        match self {
            Source::Driver(d) => Source::Driver(Driver {
                process: d.process,
                current: d.current[byte_offset..byte_offset + byte_len].to_vec(),
                null: d.null,
                waveforms: d
                    .waveforms
                    .iter()
                    .map(|wf| Waveform {
                        when: wf.when,
                        value: wf.value[byte_offset..byte_offset + byte_len].to_vec(),
                        null: wf.null,
                    })
                    .collect(),
            }),
            Source::Port {
                upstream,
                conversion,
            } => Source::Port {
                upstream: *upstream,
                conversion: conversion.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrt_common::ArenaId;

    fn pid() -> ProcessId {
        ProcessId::from_raw(0)
    }

    fn t(fs: u64) -> SimTime {
        SimTime::from_fs(fs)
    }

    #[test]
    fn schedule_orders_by_time() {
        let mut d = Driver::new(pid(), vec![0]);
        assert!(d.schedule(t(10), 0, vec![1], false));
        // A later assignment supersedes everything at or after its time
        assert!(d.schedule(t(5), 0, vec![2], false));
        assert_eq!(d.waveforms.len(), 1);
        assert_eq!(d.waveforms[0].when, t(5));
        assert_eq!(d.waveforms[0].value, vec![2]);
    }

    #[test]
    fn later_schedule_keeps_earlier() {
        let mut d = Driver::new(pid(), vec![0]);
        d.schedule(t(5), 0, vec![1], false);
        d.schedule(t(10), 0, vec![2], false);
        assert_eq!(d.waveforms.len(), 2);
        assert_eq!(d.waveforms[0].when, t(5));
        assert_eq!(d.waveforms[1].when, t(10));
    }

    #[test]
    fn pulse_rejection_suppresses_duplicate_value() {
        let mut d = Driver::new(pid(), vec![0]);
        assert!(d.schedule(t(100), 50, vec![1], false));
        // Same value 30 fs later, within the 50 fs window: suppressed
        assert!(!d.schedule(t(130), 50, vec![1], false));
        assert_eq!(d.waveforms.len(), 1);
        assert_eq!(d.waveforms[0].when, t(100));
    }

    #[test]
    fn pulse_rejection_keeps_differing_values() {
        let mut d = Driver::new(pid(), vec![0]);
        d.schedule(t(100), 50, vec![1], false);
        assert!(d.schedule(t(130), 50, vec![0], false));
        assert_eq!(d.waveforms.len(), 2);
    }

    #[test]
    fn duplicate_outside_window_is_kept() {
        let mut d = Driver::new(pid(), vec![0]);
        d.schedule(t(100), 10, vec![1], false);
        assert!(d.schedule(t(200), 10, vec![1], false));
        assert_eq!(d.waveforms.len(), 2);
    }

    #[test]
    fn zero_reject_never_suppresses() {
        let mut d = Driver::new(pid(), vec![0]);
        d.schedule(t(100), 0, vec![1], false);
        assert!(d.schedule(t(101), 0, vec![1], false));
        assert_eq!(d.waveforms.len(), 2);
    }

    #[test]
    fn third_transaction_supersedes() {
        let mut d = Driver::new(pid(), vec![0]);
        d.schedule(t(100), 50, vec![1], false);
        d.schedule(t(130), 50, vec![0], false);
        // Supersedes both pending transactions
        d.schedule(t(90), 0, vec![3], false);
        assert_eq!(d.waveforms.len(), 1);
        assert_eq!(d.waveforms[0].value, vec![3]);
    }

    #[test]
    fn fire_due_applies_last_value() {
        let mut d = Driver::new(pid(), vec![0]);
        d.schedule(t(5), 0, vec![1], false);
        d.schedule(t(10), 0, vec![2], false);
        assert!(d.fire_due(t(10)));
        assert_eq!(d.current, vec![2]);
        assert!(d.waveforms.is_empty());
    }

    #[test]
    fn fire_due_leaves_future() {
        let mut d = Driver::new(pid(), vec![0]);
        d.schedule(t(5), 0, vec![1], false);
        d.schedule(t(10), 0, vec![2], false);
        assert!(d.fire_due(t(5)));
        assert_eq!(d.current, vec![1]);
        assert_eq!(d.waveforms.len(), 1);
        assert!(!d.fire_due(t(6)));
    }

    #[test]
    fn null_transaction_disconnects() {
        let mut d = Driver::new(pid(), vec![7]);
        d.schedule(t(5), 0, Vec::new(), true);
        d.fire_due(t(5));
        assert!(d.null);
        // The last non-null value is retained for register semantics
        assert_eq!(d.current, vec![7]);
        // Driving again reconnects
        d.schedule(t(10), 0, vec![1], false);
        d.fire_due(t(10));
        assert!(!d.null);
        assert_eq!(d.current, vec![1]);
    }

    #[test]
    fn drive_fast_bypasses_queue() {
        let mut d = Driver::new(pid(), vec![0]);
        d.schedule(t(100), 0, vec![9], false);
        d.drive_fast(vec![3], false);
        assert_eq!(d.current, vec![3]);
        // The projected transaction at 100 is superseded
        assert!(d.waveforms.is_empty());
    }

    #[test]
    fn clone_narrowed_driver() {
        let mut d = Driver::new(pid(), vec![1, 2, 3, 4]);
        d.schedule(t(5), 0, vec![5, 6, 7, 8], false);
        let src = Source::Driver(d);
        let tail = src.clone_narrowed(2, 2);
        let tail = tail.as_driver().unwrap();
        assert_eq!(tail.current, vec![3, 4]);
        assert_eq!(tail.waveforms[0].value, vec![7, 8]);
    }
}
