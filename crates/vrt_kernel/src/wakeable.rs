//! Wakeables, pending lists, and trigger guards.
//!
//! Anything resumable by an event notification — a process, an external
//! watch callback, or an implicit signal recomputation — is referenced
//! through a [`WakeableRef`]. Each nexus keeps the wakeables sensitive to it
//! in a [`Pending`] list; notification drains the list and enqueues each
//! entry exactly once, after consulting its optional trigger guard.

use crate::alloc::StaticArena;
use crate::process::ProcessId;
use crate::signal::{self, Signal, SignalId};
use crate::time::SimTime;
use std::cell::Cell;
use std::sync::Arc;
use vrt_common::{define_arena_id, Arena, Ident};

define_arena_id! {
    /// Opaque ID of an external watch in the model's watch arena.
    WatchId
}

define_arena_id! {
    /// Opaque ID of a trigger guard in the model's trigger arena.
    TriggerId
}

/// A handle to anything an event notification can resume.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WakeableRef {
    /// A simulation process (including property checkers and transfers).
    Process(ProcessId),
    /// An external watch callback.
    Watch(WatchId),
    /// An implicit signal whose value the kernel recomputes.
    Implicit(SignalId),
}

/// The wakeables waiting on one nexus.
///
/// Stays inline for the overwhelmingly common zero- and one-waiter cases
/// and only grows a heap list when a second waiter shows up.
#[derive(Clone, Default, Debug)]
pub enum Pending {
    /// Nobody waiting.
    #[default]
    None,
    /// Exactly one waiter.
    One(WakeableRef),
    /// Two or more waiters.
    Many(Vec<WakeableRef>),
}

impl Pending {
    /// Adds a waiter, deduplicating so a wakeable registered twice in the
    /// same instant is still notified only once.
    pub fn add(&mut self, w: WakeableRef) {
        match self {
            Pending::None => *self = Pending::One(w),
            Pending::One(existing) => {
                if *existing != w {
                    *self = Pending::Many(vec![*existing, w]);
                }
            }
            Pending::Many(list) => {
                if !list.contains(&w) {
                    list.push(w);
                }
            }
        }
    }

    /// Removes a waiter if present.
    pub fn remove(&mut self, w: WakeableRef) {
        match self {
            Pending::None => {}
            Pending::One(existing) => {
                if *existing == w {
                    *self = Pending::None;
                }
            }
            Pending::Many(list) => list.retain(|x| *x != w),
        }
    }

    /// The current waiters, in registration order. Sensitivity persists
    /// across notifications, so this copies rather than drains.
    pub fn snapshot(&self) -> Vec<WakeableRef> {
        match self {
            Pending::None => Vec::new(),
            Pending::One(w) => vec![*w],
            Pending::Many(list) => list.clone(),
        }
    }

    /// Returns `true` if nobody is waiting.
    pub fn is_empty(&self) -> bool {
        matches!(self, Pending::None)
    }

    /// Number of waiters.
    pub fn len(&self) -> usize {
        match self {
            Pending::None => 0,
            Pending::One(_) => 1,
            Pending::Many(list) => list.len(),
        }
    }
}

/// Read-only view of signal state handed to trigger and watch closures.
pub struct ReadCtx<'a> {
    /// The signal arena.
    pub signals: &'a Arena<SignalId, Signal>,
    /// The static value memory.
    pub mem: &'a StaticArena,
    /// Current simulation instant.
    pub now: SimTime,
}

impl ReadCtx<'_> {
    /// The current value bytes of a signal.
    pub fn value(&self, id: SignalId) -> &[u8] {
        let sig = &self.signals[id];
        self.mem.bytes(sig.current_slot())
    }

    /// One scalar element of a signal's current value.
    pub fn scalar(&self, id: SignalId, index: u32) -> u64 {
        let sig = &self.signals[id];
        signal::read_scalar(self.mem.bytes(sig.current_slot()), sig.elem_size, index)
    }
}

/// The predicate of a trigger guard.
pub enum TriggerKind {
    /// An arbitrary predicate over current signal values.
    Function(Arc<dyn Fn(&ReadCtx) -> bool + Send + Sync>),
    /// Logical or of two sub-triggers.
    Or(TriggerId, TriggerId),
    /// True while element 0 of `signal` equals `value`.
    CmpEq {
        /// The compared signal.
        signal: SignalId,
        /// The expected scalar.
        value: u64,
    },
}

/// A memoized guard predicate filtering spurious wakeups.
///
/// The result is cached per simulation instant: within one delta cycle the
/// predicate is evaluated at most once no matter how many nexuses notify
/// through it.
pub struct Trigger {
    kind: TriggerKind,
    cache: Cell<Option<(SimTime, bool)>>,
}

impl Trigger {
    /// Wraps a predicate kind.
    pub fn new(kind: TriggerKind) -> Self {
        Self {
            kind,
            cache: Cell::new(None),
        }
    }
}

/// Evaluates a trigger, consulting and refreshing its per-instant cache.
///
/// Triggers form a DAG through [`TriggerKind::Or`], so evaluation recurses
/// through the arena.
pub fn eval_trigger(triggers: &Arena<TriggerId, Trigger>, id: TriggerId, ctx: &ReadCtx) -> bool {
    let trigger = &triggers[id];
    if let Some((at, result)) = trigger.cache.get() {
        // full equality: each delta cycle is its own instant, so a guard
        // that flips mid-instant is re-evaluated on the next delta
        if at == ctx.now {
            return result;
        }
    }
    let result = match &trigger.kind {
        TriggerKind::Function(f) => f(ctx),
        TriggerKind::Or(a, b) => eval_trigger(triggers, *a, ctx) || eval_trigger(triggers, *b, ctx),
        TriggerKind::CmpEq { signal, value } => ctx.scalar(*signal, 0) == *value,
    };
    trigger.cache.set(Some((ctx.now, result)));
    result
}

/// An external watch: a callback invoked when a watched nexus changes.
/// Used by waveform dumpers and external tooling.
pub struct Watch {
    /// Name for diagnostics.
    pub name: Ident,
    /// The callback. Receives read access to signal state at the current
    /// instant. Taken out of the slot while running.
    pub callback: Option<Box<dyn FnMut(&ReadCtx) + Send>>,
    /// Optional trigger guard consulted before enqueueing.
    pub trigger: Option<TriggerId>,
    /// Postponed watches run only in the last delta of an instant.
    pub postponed: bool,
    /// True while the watch sits in a run queue; guards exactly-once
    /// enqueueing.
    pub queued: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrt_common::ArenaId;

    fn p(n: u32) -> WakeableRef {
        WakeableRef::Process(ProcessId::from_raw(n))
    }

    #[test]
    fn pending_grows_from_none() {
        let mut pending = Pending::default();
        assert!(pending.is_empty());
        pending.add(p(1));
        assert_eq!(pending.len(), 1);
        pending.add(p(2));
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.snapshot(), vec![p(1), p(2)]);
        // snapshotting does not drain
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn pending_deduplicates() {
        let mut pending = Pending::default();
        pending.add(p(1));
        pending.add(p(1));
        assert_eq!(pending.len(), 1);
        pending.add(p(2));
        pending.add(p(1));
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn pending_remove() {
        let mut pending = Pending::default();
        pending.add(p(1));
        pending.add(p(2));
        pending.add(p(3));
        pending.remove(p(2));
        assert_eq!(pending.snapshot(), vec![p(1), p(3)]);

        let mut single = Pending::One(p(7));
        single.remove(p(7));
        assert!(single.is_empty());
    }

    #[test]
    fn trigger_cache_is_per_instant() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let signals = Arena::new();
        let mem = StaticArena::with_limit(1 << 16);
        let mut triggers = Arena::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let id = triggers.alloc(Trigger::new(TriggerKind::Function(Arc::new(move |_| {
            calls2.fetch_add(1, Ordering::Relaxed);
            true
        }))));

        let t0 = SimTime::from_fs(1_000);
        let ctx = ReadCtx {
            signals: &signals,
            mem: &mem,
            now: t0,
        };
        assert!(eval_trigger(&triggers, id, &ctx));
        assert!(eval_trigger(&triggers, id, &ctx));
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        // Next delta at the same femtosecond is a new instant
        let ctx = ReadCtx {
            signals: &signals,
            mem: &mem,
            now: t0.next_delta(),
        };
        assert!(eval_trigger(&triggers, id, &ctx));
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn or_trigger_short_circuits() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let signals = Arena::new();
        let mem = StaticArena::with_limit(1 << 16);
        let mut triggers = Arena::new();
        let right_calls = Arc::new(AtomicUsize::new(0));
        let rc = Arc::clone(&right_calls);
        let left = triggers.alloc(Trigger::new(TriggerKind::Function(Arc::new(|_| true))));
        let right = triggers.alloc(Trigger::new(TriggerKind::Function(Arc::new(move |_| {
            rc.fetch_add(1, Ordering::Relaxed);
            false
        }))));
        let or = triggers.alloc(Trigger::new(TriggerKind::Or(left, right)));

        let ctx = ReadCtx {
            signals: &signals,
            mem: &mem,
            now: SimTime::ZERO,
        };
        assert!(eval_trigger(&triggers, or, &ctx));
        assert_eq!(right_calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn cmp_trigger_reads_signal() {
        use crate::signal::{Signal, SignalFlags, SIGNAL_HEADER_BYTES};

        let mut mem = StaticArena::with_limit(1 << 16);
        let slot = mem.alloc(Signal::alloc_size(4)).unwrap();
        let mut signals = Arena::new();
        let sid = signals.next_id();
        signals.alloc(Signal {
            name: Ident::from_raw(0),
            scope: ArenaId::from_raw(0),
            size: 4,
            elem_size: 4,
            flags: SignalFlags::empty(),
            slot,
            nexuses: Vec::new(),
            resolution: None,
            index: None,
        });
        let current = slot.narrow(SIGNAL_HEADER_BYTES, 4);
        mem.bytes_mut(current).copy_from_slice(&42u32.to_le_bytes());

        let mut triggers = Arena::new();
        let id = triggers.alloc(Trigger::new(TriggerKind::CmpEq {
            signal: sid,
            value: 42,
        }));
        let ctx = ReadCtx {
            signals: &signals,
            mem: &mem,
            now: SimTime::ZERO,
        };
        assert!(eval_trigger(&triggers, id, &ctx));
    }
}
