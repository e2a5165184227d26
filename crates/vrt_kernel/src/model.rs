//! The elaborated simulation model and its delta-cycle scheduler.
//!
//! [`Model`] owns every runtime entity (signals, nexuses, processes,
//! watches, triggers, scopes) in arenas, the value memory, the time-ordered
//! event heap, and the per-instant work queues. All kernel entry points
//! invoked by process code are methods on it; nothing goes through globals.
//!
//! One simulation cycle runs a fixed phase order: swap the deferred queues
//! into the run queues, fire due driver transactions, recompute driving
//! values in dependency-rank order, then effective values in rank order,
//! update implicit signals, and finally run the woken processes and
//! watches. Driving strictly before effective, effective strictly before
//! processes, processes strictly before postponed processes: the LRM's
//! signal semantics depend on that order. When an instant produces no
//! further work, postponed processes run, the end-of-instant hooks fire,
//! and time advances to the next queued event.

use crate::alloc::{StaticArena, Tlab};
use crate::error::{FaultKind, RtError};
use crate::nexus::{self, Nexus, NexusId};
use crate::process::{Process, ProcessBody, ProcessId, ProcessKind, ProcessState, Suspend};
use crate::resolution::Resolution;
use crate::scope::{Alias, Scope, ScopeId, ScopeKind};
use crate::signal::{self, Signal, SignalFlags, SignalId};
use crate::source::{Conversion, Driver, Source};
use crate::time::SimTime;
use crate::wakeable::{
    eval_trigger, ReadCtx, Trigger, TriggerId, TriggerKind, WakeableRef, Watch, WatchId,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vrt_common::{Arena, Ident, Interner, SourceLoc};
use vrt_diagnostics::{Diagnostic, DiagnosticSink, Severity};

/// Tunables fixed before elaboration.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// Consecutive delta cycles allowed at one instant before the run is
    /// aborted as an unstable feedback loop.
    pub max_delta: u32,
    /// Static value memory limit in bytes.
    pub heap_limit: usize,
    /// Lowest report severity that aborts the run.
    pub exit_severity: Severity,
    /// Seed for shuffling the per-cycle process run order, used to flush
    /// out missing-sensitivity bugs. `None` keeps wakeup order.
    pub shuffle_seed: Option<u64>,
    /// Number of coverage counter slots.
    pub coverage_slots: usize,
    /// Stop advancing time past this femtosecond count.
    pub time_limit: Option<u64>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_delta: 10_000,
            heap_limit: 256 << 20,
            exit_severity: Severity::Failure,
            shuffle_seed: None,
            coverage_slots: 0,
            time_limit: None,
        }
    }
}

/// A callback invoked at a simulation lifecycle point.
pub type Hook = Box<dyn FnMut(SimTime) + Send>;

#[derive(Default)]
struct Hooks {
    start: Vec<Hook>,
    end: Vec<Hook>,
    last_delta: Vec<Hook>,
    next_step: Vec<Hook>,
    processes_done: Vec<Hook>,
}

enum EventAction {
    /// Fire due transactions and recompute the nexus driving value.
    DriverUpdate(NexusId),
    /// Resume a process parked on a timeout.
    Resume(ProcessId),
}

struct TimedEvent {
    when: SimTime,
    /// FIFO tiebreak among same-instant events.
    seq: u64,
    action: EventAction,
}

impl PartialEq for TimedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}

impl Eq for TimedEvent {}

impl PartialOrd for TimedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.when, self.seq).cmp(&(other.when, other.seq))
    }
}

/// The whole elaborated design plus scheduler state.
pub struct Model {
    /// Tunables.
    pub config: KernelConfig,
    /// Name interner shared by every entity.
    pub interner: Interner,
    /// Diagnostic sink for recoverable and pre-fatal reporting.
    pub sink: DiagnosticSink,
    /// Static value memory.
    pub mem: StaticArena,
    /// Per-cycle scratch buffer for value propagation temporaries.
    tlab: Tlab,
    /// All signals.
    pub signals: Arena<SignalId, Signal>,
    /// All nexuses.
    pub nexuses: Arena<NexusId, Nexus>,
    /// All processes.
    pub processes: Arena<ProcessId, Process>,
    /// All external watches.
    pub watches: Arena<WatchId, Watch>,
    /// All trigger guards.
    pub triggers: Arena<TriggerId, Trigger>,
    /// The scope tree.
    pub scopes: Arena<ScopeId, Scope>,

    scope_stack: Vec<ScopeId>,
    now: SimTime,
    seq: u64,
    events: BinaryHeap<Reverse<TimedEvent>>,

    // Deferred queues: work for the next cycle of this instant.
    next_drivers: Vec<NexusId>,
    next_processes: Vec<ProcessId>,
    next_watches: Vec<WatchId>,
    next_implicit: Vec<SignalId>,

    // Active queues: work for the current cycle, filled by the queue swap
    // and by notifications during the value phases.
    run_procs: Vec<ProcessId>,
    run_watches: Vec<WatchId>,
    run_implicit: Vec<SignalId>,

    // End-of-instant queues.
    postponed_processes: Vec<ProcessId>,
    postponed_watches: Vec<WatchId>,

    implicits: HashMap<SignalId, Box<dyn FnMut(&ReadCtx) -> Vec<u8> + Send>>,
    hooks: Hooks,
    coverage: Vec<u64>,
    stop: Arc<AtomicBool>,
    rng: Option<StdRng>,
    active_process: Option<ProcessId>,
    iteration: u32,
    started: bool,
    processes_done_fired: bool,
}

impl Default for Model {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

impl Model {
    /// An empty model with a root scope.
    pub fn new(config: KernelConfig) -> Self {
        let interner = Interner::new();
        let mut scopes = Arena::new();
        let root = scopes.alloc(Scope::new(interner.get_or_intern("root"), ScopeKind::Root, None));
        let rng = config.shuffle_seed.map(StdRng::seed_from_u64);
        let coverage = vec![0; config.coverage_slots];
        Self {
            mem: StaticArena::with_limit(config.heap_limit),
            config,
            interner,
            sink: DiagnosticSink::new(),
            tlab: Tlab::new(),
            signals: Arena::new(),
            nexuses: Arena::new(),
            processes: Arena::new(),
            watches: Arena::new(),
            triggers: Arena::new(),
            scopes,
            scope_stack: vec![root],
            now: SimTime::ZERO,
            seq: 0,
            events: BinaryHeap::new(),
            next_drivers: Vec::new(),
            next_processes: Vec::new(),
            next_watches: Vec::new(),
            next_implicit: Vec::new(),
            run_procs: Vec::new(),
            run_watches: Vec::new(),
            run_implicit: Vec::new(),
            postponed_processes: Vec::new(),
            postponed_watches: Vec::new(),
            implicits: HashMap::new(),
            hooks: Hooks::default(),
            coverage,
            stop: Arc::new(AtomicBool::new(false)),
            rng,
            active_process: None,
            iteration: 0,
            started: false,
            processes_done_fired: false,
        }
    }

    /// Current simulation instant.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// The process currently being resumed, if any.
    pub fn active_process(&self) -> Option<ProcessId> {
        self.active_process
    }

    /// A clonable handle for requesting an external stop.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Requests a clean stop at the next phase boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    // ---- elaboration -----------------------------------------------------

    /// The scope new entities are registered under.
    pub fn current_scope(&self) -> ScopeId {
        // the root is never popped
        self.scope_stack[self.scope_stack.len() - 1]
    }

    /// Opens a child scope and makes it current.
    pub fn push_scope(&mut self, name: &str, kind: ScopeKind) -> ScopeId {
        let parent = self.current_scope();
        let name = self.interner.get_or_intern(name);
        let id = self.scopes.alloc(Scope::new(name, kind, Some(parent)));
        self.scopes[parent].children.push(id);
        self.scope_stack.push(id);
        id
    }

    /// Closes the current scope.
    pub fn pop_scope(&mut self) {
        debug_assert!(self.scope_stack.len() > 1);
        if self.scope_stack.len() > 1 {
            self.scope_stack.pop();
        }
    }

    /// Creates a signal in the current scope. All three value regions start
    /// at `default`, and one nexus covers the whole signal.
    pub fn init_signal(
        &mut self,
        name: &str,
        size: u32,
        elem_size: u32,
        flags: SignalFlags,
        default: &[u8],
    ) -> Result<SignalId, RtError> {
        debug_assert!(matches!(elem_size, 1 | 2 | 4 | 8));
        debug_assert_eq!(size % elem_size, 0);
        debug_assert_eq!(default.len(), size as usize);
        let slot = self.mem.alloc(Signal::alloc_size(size))?;
        Signal::write_header(&mut self.mem, slot, size);
        let name = self.interner.get_or_intern(name);
        let scope = self.current_scope();
        let sid = self.signals.next_id();
        let nid = self.nexuses.alloc(Nexus::new(sid, 0, size / elem_size, elem_size));
        let sig = Signal {
            name,
            scope,
            size,
            elem_size,
            flags,
            slot,
            nexuses: vec![nid],
            resolution: None,
            index: None,
        };
        self.mem.bytes_mut(sig.current_slot()).copy_from_slice(default);
        self.mem.bytes_mut(sig.last_value_slot()).copy_from_slice(default);
        self.mem.bytes_mut(sig.driving_slot()).copy_from_slice(default);
        self.signals.alloc(sig);
        self.scopes[scope].signals.push(sid);
        Ok(sid)
    }

    /// Attaches a resolution function to a signal.
    pub fn resolve_signal(&mut self, id: SignalId, resolution: Resolution) {
        let sig = &mut self.signals[id];
        sig.flags.insert(SignalFlags::RESOLVED);
        if resolution.is_composite() {
            sig.flags.insert(SignalFlags::COMPOSITE_RESOLUTION);
        }
        sig.resolution = Some(resolution);
    }

    /// Registers an alias name for a sub-range of an existing signal in the
    /// current scope, carving nexus boundaries at the range edges so later
    /// addressing through the alias stays aligned.
    pub fn alias_signal(
        &mut self,
        name: &str,
        signal: SignalId,
        offset: u32,
        count: u32,
    ) -> Result<(), RtError> {
        self.resolve_range(signal, offset, count)?;
        let name = self.interner.get_or_intern(name);
        let scope = self.current_scope();
        self.scopes[scope].aliases.push(Alias {
            name,
            signal,
            offset,
            count,
        });
        Ok(())
    }

    /// Connects `dst[dst_off..][..count]` as a port reading
    /// `src[src_off..][..count]`, optionally through a conversion closure.
    pub fn map_signal(
        &mut self,
        dst: SignalId,
        dst_off: u32,
        src: SignalId,
        src_off: u32,
        count: u32,
        conversion: Option<Conversion>,
    ) -> Result<(), RtError> {
        let down = self.resolve_range(dst, dst_off, count)?;
        let up = self.resolve_range(src, src_off, count)?;
        let pairs = self.align_ranges(down, up);
        for (d, u) in pairs {
            self.check_new_source(dst, d)?;
            self.nexuses[d].sources.push(Source::Port {
                upstream: u,
                conversion: conversion.clone(),
            });
            self.nexuses[u].outputs.push(d);
            let min_rank = self.nexuses[u].rank + 1;
            self.bump_rank(d, min_rank);
            // propagate the mapped value on the first cycle
            self.queue_driver_update(d);
        }
        Ok(())
    }

    /// Writes a constant into a port range at elaboration: the value lands
    /// in the driving and current regions and never changes.
    pub fn map_const(
        &mut self,
        signal: SignalId,
        offset: u32,
        count: u32,
        value: &[u8],
    ) -> Result<(), RtError> {
        self.resolve_range(signal, offset, count)?;
        let (cur, drv) = {
            let s = &self.signals[signal];
            (
                s.elem_range(s.current_slot(), offset, count),
                s.elem_range(s.driving_slot(), offset, count),
            )
        };
        debug_assert_eq!(value.len(), cur.len());
        self.mem.bytes_mut(cur).copy_from_slice(value);
        self.mem.bytes_mut(drv).copy_from_slice(value);
        Ok(())
    }

    /// Registers a process in the current scope. Every process runs once at
    /// time zero.
    pub fn add_process(
        &mut self,
        name: &str,
        kind: ProcessKind,
        postponed: bool,
        body: Box<dyn ProcessBody>,
    ) -> ProcessId {
        let name = self.interner.get_or_intern(name);
        let scope = self.current_scope();
        let mut proc = Process::new(name, scope, kind, body);
        proc.postponed = postponed;
        proc.queued = true;
        let id = self.processes.alloc(proc);
        self.scopes[scope].processes.push(id);
        if postponed {
            self.postponed_processes.push(id);
        } else {
            self.next_processes.push(id);
        }
        id
    }

    /// Registers an external watch over a signal range.
    pub fn add_watch(
        &mut self,
        name: &str,
        signal: SignalId,
        offset: u32,
        count: u32,
        postponed: bool,
        callback: Box<dyn FnMut(&ReadCtx) + Send>,
    ) -> Result<WatchId, RtError> {
        let name = self.interner.get_or_intern(name);
        let id = self.watches.alloc(Watch {
            name,
            callback: Some(callback),
            trigger: None,
            postponed,
            queued: false,
        });
        self.schedule_event(WakeableRef::Watch(id), signal, offset, count)?;
        Ok(id)
    }

    /// Marks a signal implicit and installs its recompute closure. The
    /// closure returns the full new value; wire its inputs up with
    /// [`schedule_event`](Self::schedule_event) on
    /// [`WakeableRef::Implicit`].
    pub fn register_implicit(
        &mut self,
        signal: SignalId,
        compute: Box<dyn FnMut(&ReadCtx) -> Vec<u8> + Send>,
    ) {
        self.signals[signal].flags.insert(SignalFlags::IMPLICIT);
        self.implicits.insert(signal, compute);
    }

    // ---- triggers --------------------------------------------------------

    /// A trigger wrapping an arbitrary predicate.
    pub fn function_trigger(
        &mut self,
        f: Arc<dyn Fn(&ReadCtx) -> bool + Send + Sync>,
    ) -> TriggerId {
        self.triggers.alloc(Trigger::new(TriggerKind::Function(f)))
    }

    /// A trigger true when either sub-trigger is.
    pub fn or_trigger(&mut self, a: TriggerId, b: TriggerId) -> TriggerId {
        self.triggers.alloc(Trigger::new(TriggerKind::Or(a, b)))
    }

    /// A trigger true while element 0 of `signal` equals `value`.
    pub fn compare_trigger(&mut self, signal: SignalId, value: u64) -> TriggerId {
        self.triggers
            .alloc(Trigger::new(TriggerKind::CmpEq { signal, value }))
    }

    /// Attaches a trigger guard to a process or watch.
    pub fn add_trigger(&mut self, w: WakeableRef, trigger: TriggerId) {
        match w {
            WakeableRef::Process(p) => self.processes[p].trigger = Some(trigger),
            WakeableRef::Watch(id) => self.watches[id].trigger = Some(trigger),
            WakeableRef::Implicit(_) => debug_assert!(false, "implicit signals take no trigger"),
        }
    }

    // ---- scheduling entry points -----------------------------------------

    /// Registers a persistent sensitivity of `w` to a signal range.
    pub fn schedule_event(
        &mut self,
        w: WakeableRef,
        signal: SignalId,
        offset: u32,
        count: u32,
    ) -> Result<(), RtError> {
        let ids = self.resolve_range(signal, offset, count)?;
        for id in ids {
            self.nexuses[id].pending.add(w);
        }
        Ok(())
    }

    /// Drops a previously registered sensitivity of `w` to a signal range.
    /// Ranges never registered are left alone.
    pub fn unschedule_event(
        &mut self,
        w: WakeableRef,
        signal: SignalId,
        offset: u32,
        count: u32,
    ) -> Result<(), RtError> {
        let ids = self.resolve_range(signal, offset, count)?;
        for id in ids {
            self.nexuses[id].pending.remove(w);
        }
        Ok(())
    }

    /// Parks a process for `delay_fs` femtoseconds; zero means the next
    /// delta cycle.
    pub fn schedule_process(&mut self, p: ProcessId, delay_fs: u64) {
        if delay_fs == 0 {
            if !self.processes[p].queued {
                self.processes[p].queued = true;
                self.next_processes.push(p);
            }
        } else {
            let when = self.now.after(delay_fs);
            self.push_event(when, EventAction::Resume(p));
        }
    }

    /// Creates `process`'s driver over a signal range without scheduling a
    /// transaction. The driver's first contribution is the range's present
    /// driving value.
    pub fn drive_signal(
        &mut self,
        process: ProcessId,
        signal: SignalId,
        offset: u32,
        count: u32,
    ) -> Result<(), RtError> {
        let ids = self.resolve_range(signal, offset, count)?;
        for id in ids {
            self.ensure_driver(process, signal, id)?;
        }
        Ok(())
    }

    /// Schedules a transaction on `process`'s driver over a signal range,
    /// creating the driver if this is its first contribution.
    ///
    /// Zero-delay scheduling on a sole unresolved source takes the fast
    /// path: the driver value is set directly and only a driving-value
    /// recompute is queued, bypassing the waveform queue. The fast path is
    /// unavailable the instant a second source exists.
    #[allow(clippy::too_many_arguments)]
    pub fn schedule_waveform(
        &mut self,
        process: ProcessId,
        signal: SignalId,
        offset: u32,
        count: u32,
        value: &[u8],
        delay_fs: u64,
        reject_fs: u64,
        null: bool,
    ) -> Result<(), RtError> {
        let ids = self.resolve_range(signal, offset, count)?;
        let when = self.now.after(delay_fs);
        let mut pos = 0usize;
        for id in ids {
            let len = self.nexuses[id].byte_len();
            let chunk = value[pos..pos + len].to_vec();
            pos += len;
            self.ensure_driver(process, signal, id)?;
            let fast = delay_fs == 0
                && self.nexuses[id].source_count() == 1
                && !self.signals[signal].flags.contains(SignalFlags::RESOLVED);
            if fast {
                if let Some(d) = self.nexuses[id].driver_mut(process) {
                    d.drive_fast(chunk, null);
                }
                self.queue_driver_update(id);
            } else {
                let scheduled = match self.nexuses[id].driver_mut(process) {
                    Some(d) => d.schedule(when, reject_fs, chunk, null),
                    None => false,
                };
                if scheduled {
                    if delay_fs == 0 {
                        self.queue_driver_update(id);
                    } else {
                        self.push_event(when, EventAction::DriverUpdate(id));
                    }
                }
            }
        }
        Ok(())
    }

    /// Overrides a signal range unconditionally until
    /// [`release`](Self::release).
    pub fn force(
        &mut self,
        signal: SignalId,
        offset: u32,
        count: u32,
        value: &[u8],
    ) -> Result<(), RtError> {
        let ids = self.resolve_range(signal, offset, count)?;
        let mut pos = 0usize;
        for id in ids {
            let len = self.nexuses[id].byte_len();
            self.nexuses[id].forced = Some(value[pos..pos + len].to_vec());
            pos += len;
            self.queue_driver_update(id);
        }
        Ok(())
    }

    /// Removes a force override; the next recompute reflects ordinary
    /// driver/resolution logic again.
    pub fn release(&mut self, signal: SignalId, offset: u32, count: u32) -> Result<(), RtError> {
        let ids = self.resolve_range(signal, offset, count)?;
        for id in ids {
            self.nexuses[id].forced = None;
            self.queue_driver_update(id);
        }
        Ok(())
    }

    /// Overrides a signal range for exactly one driving-value recompute.
    pub fn deposit(
        &mut self,
        signal: SignalId,
        offset: u32,
        count: u32,
        value: &[u8],
    ) -> Result<(), RtError> {
        let ids = self.resolve_range(signal, offset, count)?;
        let mut pos = 0usize;
        for id in ids {
            let len = self.nexuses[id].byte_len();
            self.nexuses[id].deposit = Some(value[pos..pos + len].to_vec());
            pos += len;
            self.queue_driver_update(id);
        }
        Ok(())
    }

    // ---- attribute queries -----------------------------------------------

    /// True if any nexus in the range changed value at the current instant.
    pub fn test_event(&mut self, signal: SignalId, offset: u32, count: u32) -> Result<bool, RtError> {
        let ids = self.resolve_range(signal, offset, count)?;
        Ok(ids.iter().any(|&id| {
            self.nexuses[id]
                .last_event
                .is_some_and(|t| t.same_instant(&self.now))
        }))
    }

    /// True if any nexus in the range had a transaction fire at the current
    /// instant, changed or not.
    pub fn test_active(&mut self, signal: SignalId, offset: u32, count: u32) -> Result<bool, RtError> {
        let ids = self.resolve_range(signal, offset, count)?;
        Ok(ids.iter().any(|&id| {
            self.nexuses[id]
                .last_active
                .is_some_and(|t| t.same_instant(&self.now))
        }))
    }

    /// Instant of the most recent value change anywhere in the range.
    pub fn last_event(&mut self, signal: SignalId, offset: u32, count: u32) -> Result<Option<SimTime>, RtError> {
        let ids = self.resolve_range(signal, offset, count)?;
        Ok(ids.iter().filter_map(|&id| self.nexuses[id].last_event).max())
    }

    /// Instant of the most recent activity anywhere in the range.
    pub fn last_active(&mut self, signal: SignalId, offset: u32, count: u32) -> Result<Option<SimTime>, RtError> {
        let ids = self.resolve_range(signal, offset, count)?;
        Ok(ids.iter().filter_map(|&id| self.nexuses[id].last_active).max())
    }

    /// The current (effective) value bytes of a whole signal.
    pub fn signal_value(&self, signal: SignalId) -> &[u8] {
        let s = &self.signals[signal];
        self.mem.bytes(s.current_slot())
    }

    /// The driving value bytes of a whole signal.
    pub fn driving_value(&self, signal: SignalId) -> &[u8] {
        let s = &self.signals[signal];
        self.mem.bytes(s.driving_slot())
    }

    /// The value bytes a signal held before its most recent change.
    pub fn last_value(&self, signal: SignalId) -> &[u8] {
        let s = &self.signals[signal];
        self.mem.bytes(s.last_value_slot())
    }

    // ---- scratch memory --------------------------------------------------

    /// Allocates `len` zeroed scratch bytes from the cycle's TLAB. The
    /// range stays valid until the end of the current cycle or until
    /// [`claim_scratch`](Self::claim_scratch).
    pub fn scratch_alloc(&mut self, len: usize) -> Range<usize> {
        self.tlab.alloc(len)
    }

    /// Scratch bytes previously allocated this cycle.
    pub fn scratch_bytes(&self, range: Range<usize>) -> &[u8] {
        self.tlab.bytes(range)
    }

    /// Scratch bytes previously allocated this cycle, mutably.
    pub fn scratch_bytes_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        self.tlab.bytes_mut(range)
    }

    /// Takes ownership of the cycle's scratch buffer, installing a fresh
    /// one. A suspending process calls this to carry intermediate state
    /// across the cycle boundary; ranges handed out this cycle index into
    /// the returned buffer.
    pub fn claim_scratch(&mut self) -> Vec<u8> {
        self.tlab.claim()
    }

    // ---- diagnostics, coverage, hooks ------------------------------------

    /// Emits an assert/report diagnostic. Severities at or above the
    /// configured exit severity abort the run.
    pub fn report(&mut self, severity: Severity, message: &str) -> Result<(), RtError> {
        self.sink
            .emit(Diagnostic::new(severity, message).at_time(self.now.fs));
        if severity.is_fatal(self.config.exit_severity) {
            return Err(RtError::SeverityAbort {
                severity,
                time_fs: self.now.fs,
                message: message.to_owned(),
            });
        }
        Ok(())
    }

    /// Surfaces a runtime fault from compiled code as a fatal error.
    pub fn raise_fault(&mut self, kind: FaultKind, loc: SourceLoc) -> RtError {
        self.sink
            .emit(Diagnostic::failure(kind.to_string()).at_time(self.now.fs).with_loc(loc.clone()));
        RtError::Fault { kind, loc }
    }

    /// Increments a coverage counter.
    pub fn coverage_bump(&mut self, tag: usize) {
        if let Some(slot) = self.coverage.get_mut(tag) {
            *slot += 1;
        }
    }

    /// The coverage counters, for persisting at end of run.
    pub fn coverage(&self) -> &[u64] {
        &self.coverage
    }

    /// Runs `f` at the start of simulation.
    pub fn on_start_of_sim(&mut self, f: Hook) {
        self.hooks.start.push(f);
    }

    /// Runs `f` at the end of the run, successful or aborted.
    pub fn on_end_of_sim(&mut self, f: Hook) {
        self.hooks.end.push(f);
    }

    /// Runs `f` in the last delta of every instant.
    pub fn on_last_delta(&mut self, f: Hook) {
        self.hooks.last_delta.push(f);
    }

    /// Runs `f` whenever simulated time advances.
    pub fn on_next_time_step(&mut self, f: Hook) {
        self.hooks.next_step.push(f);
    }

    /// Runs `f` once, when every process has finished.
    pub fn on_end_of_processes(&mut self, f: Hook) {
        self.hooks.processes_done.push(f);
    }

    // ---- the scheduler ---------------------------------------------------

    /// Runs until the event heap empties, the configured time limit is
    /// reached, or a stop is requested. Returns the final instant.
    pub fn run(&mut self) -> Result<SimTime, RtError> {
        if !self.started {
            self.started = true;
            let now = self.now;
            for h in &mut self.hooks.start {
                h(now);
            }
        }
        let result = self.run_inner();
        // end-of-run hooks fire even on abort, so coverage and waveform
        // tails get flushed
        let now = self.now;
        for h in &mut self.hooks.end {
            h(now);
        }
        result.map(|()| self.now)
    }

    fn run_inner(&mut self) -> Result<(), RtError> {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Err(RtError::Interrupted {
                    active_process: None,
                });
            }
            if self.has_instant_work() {
                if self.iteration > 0 {
                    if self.iteration > self.config.max_delta {
                        return Err(self.delta_limit_error());
                    }
                    self.now = self.now.next_delta();
                }
                self.run_cycle()?;
                self.iteration += 1;
                continue;
            }
            if !self.postponed_processes.is_empty() || !self.postponed_watches.is_empty() {
                self.run_postponed()?;
                continue;
            }
            let now = self.now;
            for h in &mut self.hooks.last_delta {
                h(now);
            }
            if !self.processes_done_fired
                && self.processes.len() > 0
                && self.processes.values().all(|p| p.state == ProcessState::Done)
            {
                self.processes_done_fired = true;
                for h in &mut self.hooks.processes_done {
                    h(now);
                }
            }
            let Some(next_fs) = self.events.peek().map(|Reverse(e)| e.when.fs) else {
                return Ok(());
            };
            if let Some(limit) = self.config.time_limit {
                if next_fs > limit {
                    if limit > self.now.fs {
                        self.now = self.now.advance_to(limit);
                    }
                    return Ok(());
                }
            }
            self.now = self.now.advance_to(next_fs);
            self.iteration = 0;
            let now = self.now;
            for h in &mut self.hooks.next_step {
                h(now);
            }
            self.drain_due();
        }
    }

    fn has_instant_work(&self) -> bool {
        !self.next_drivers.is_empty()
            || !self.next_processes.is_empty()
            || !self.next_watches.is_empty()
            || !self.next_implicit.is_empty()
            || !self.run_procs.is_empty()
            || !self.run_watches.is_empty()
            || !self.run_implicit.is_empty()
    }

    fn run_cycle(&mut self) -> Result<(), RtError> {
        // (1) swap the deferred queues into the run queues
        let drivers = std::mem::take(&mut self.next_drivers);
        let procs = std::mem::take(&mut self.next_processes);
        self.run_procs.extend(procs);
        let watches = std::mem::take(&mut self.next_watches);
        self.run_watches.extend(watches);
        let implicit = std::mem::take(&mut self.next_implicit);
        self.run_implicit.extend(implicit);

        // (3) fire due transactions and seed the driving-recompute heap
        let mut driving: BinaryHeap<Reverse<(u32, u64, NexusId)>> = BinaryHeap::new();
        let now = self.now;
        for nx in drivers {
            for src in &mut self.nexuses[nx].sources {
                if let Some(d) = src.as_driver_mut() {
                    d.fire_due(now);
                }
            }
            self.seq += 1;
            driving.push(Reverse((self.nexuses[nx].rank, self.seq, nx)));
        }

        // (4) driving values in rank order, then effective values in rank
        // order, so every value in a cone is final before anything derived
        // from it is computed
        let mut effective: BinaryHeap<Reverse<(u32, u64, NexusId)>> = BinaryHeap::new();
        let mut seen: HashSet<NexusId> = HashSet::new();
        while let Some(Reverse((_, _, nx))) = driving.pop() {
            if !seen.insert(nx) {
                continue;
            }
            self.nexuses[nx].last_active = Some(now);
            if self.update_driving(nx)? {
                self.seq += 1;
                effective.push(Reverse((self.nexuses[nx].rank, self.seq, nx)));
                for out in self.nexuses[nx].outputs.clone() {
                    self.seq += 1;
                    driving.push(Reverse((self.nexuses[out].rank, self.seq, out)));
                }
            }
        }
        let mut seen = HashSet::new();
        while let Some(Reverse((_, _, nx))) = effective.pop() {
            if !seen.insert(nx) {
                continue;
            }
            self.update_effective(nx);
        }

        // (5) implicit-signal updates
        let implicit = std::mem::take(&mut self.run_implicit);
        for sig in implicit {
            self.update_implicit(sig);
        }

        // (6) woken processes and watches
        let mut procs = std::mem::take(&mut self.run_procs);
        if let Some(rng) = &mut self.rng {
            procs.shuffle(rng);
        }
        for p in procs {
            self.run_process(p)?;
        }
        let watches = std::mem::take(&mut self.run_watches);
        for w in watches {
            self.run_watch(w);
        }

        self.tlab.reset();
        Ok(())
    }

    fn run_postponed(&mut self) -> Result<(), RtError> {
        let procs = std::mem::take(&mut self.postponed_processes);
        for p in procs {
            self.run_process(p)?;
        }
        let watches = std::mem::take(&mut self.postponed_watches);
        for w in watches {
            self.run_watch(w);
        }
        Ok(())
    }

    fn run_process(&mut self, p: ProcessId) -> Result<(), RtError> {
        if self.processes[p].state == ProcessState::Done {
            return Ok(());
        }
        if self.stop.load(Ordering::Relaxed) {
            return Err(RtError::Interrupted {
                active_process: Some(self.name_of(self.processes[p].name)),
            });
        }
        self.processes[p].queued = false;
        let Some(mut body) = self.processes[p].body.take() else {
            return Ok(());
        };
        self.active_process = Some(p);
        let outcome = body.resume(self, p);
        self.active_process = None;
        self.processes[p].body = Some(body);
        match outcome? {
            Suspend::WaitEvent => {}
            Suspend::WaitFor(delay_fs) => self.schedule_process(p, delay_fs),
            Suspend::Done => self.processes[p].state = ProcessState::Done,
        }
        Ok(())
    }

    fn run_watch(&mut self, w: WatchId) {
        self.watches[w].queued = false;
        let Some(mut cb) = self.watches[w].callback.take() else {
            return;
        };
        cb(&ReadCtx {
            signals: &self.signals,
            mem: &self.mem,
            now: self.now,
        });
        self.watches[w].callback = Some(cb);
    }

    /// Recomputes a nexus driving value. Returns whether it changed.
    fn update_driving(&mut self, id: NexusId) -> Result<bool, RtError> {
        let deposit = self.nexuses[id].deposit.take();
        let (sig_id, offset, width) = {
            let nx = &self.nexuses[id];
            (nx.signal, nx.offset, nx.width)
        };
        let byte_len = self.nexuses[id].byte_len();
        let driving_slice = {
            let s = &self.signals[sig_id];
            s.elem_range(s.driving_slot(), offset, width)
        };

        // force wins over deposit wins over sources
        let new = if let Some(f) = &self.nexuses[id].forced {
            Some(f.clone())
        } else if deposit.is_some() {
            deposit
        } else {
            self.compute_driving(id, sig_id, byte_len)
        };
        match new {
            None => Ok(false),
            Some(v) => {
                debug_assert_eq!(v.len(), byte_len);
                let changed = self.mem.bytes(driving_slice) != v.as_slice();
                if changed {
                    self.mem.bytes_mut(driving_slice).copy_from_slice(&v);
                }
                Ok(changed)
            }
        }
    }

    /// The source/resolution part of a driving-value recompute. `None`
    /// means "unchanged": no sources (the declared default stays), a null
    /// sole source, or all-null sources on a register signal.
    fn compute_driving(&self, id: NexusId, sig_id: SignalId, byte_len: usize) -> Option<Vec<u8>> {
        let nx = &self.nexuses[id];
        if nx.sources.is_empty() {
            return None;
        }
        let sig = &self.signals[sig_id];

        let mut inputs: Vec<Vec<u8>> = Vec::with_capacity(nx.sources.len());
        for src in &nx.sources {
            match src {
                Source::Driver(d) => {
                    if !d.null {
                        inputs.push(d.current.clone());
                    }
                }
                Source::Port {
                    upstream,
                    conversion,
                } => {
                    let up = &self.nexuses[*upstream];
                    let up_sig = &self.signals[up.signal];
                    let bytes = self
                        .mem
                        .bytes(up_sig.elem_range(up_sig.driving_slot(), up.offset, up.width));
                    match conversion {
                        Some(c) => {
                            let mut out = vec![0u8; byte_len];
                            c(bytes, &mut out);
                            inputs.push(out);
                        }
                        None => inputs.push(bytes.to_vec()),
                    }
                }
            }
        }

        if !sig.flags.contains(SignalFlags::RESOLVED) {
            // single-source invariant enforced at elaboration; a null sole
            // driver leaves the value unchanged
            return inputs.pop();
        }
        if inputs.is_empty() && sig.flags.contains(SignalFlags::REGISTER) {
            return None;
        }
        let Some(res) = &sig.resolution else {
            return inputs.pop();
        };
        let mut out = vec![0u8; byte_len];
        if sig.flags.contains(SignalFlags::COMPOSITE_RESOLUTION) {
            res.resolve_composite(&inputs, &mut out);
        } else {
            let mut scalars = Vec::with_capacity(inputs.len());
            for e in 0..nx.width {
                scalars.clear();
                for input in &inputs {
                    scalars.push(signal::read_scalar(input, nx.elem_size, e));
                }
                let r = res.resolve_scalar(&scalars);
                signal::write_scalar(&mut out, nx.elem_size, e, r);
            }
        }
        Some(out)
    }

    /// Publishes a recomputed driving value as the effective/current value:
    /// current shifts into last-value, the new value becomes current, and
    /// everyone pending on the nexus is notified. At most once per nexus
    /// per instant, guaranteed by the caller's dedup set.
    fn update_effective(&mut self, id: NexusId) {
        let (cur, last, drv) = {
            let nx = &self.nexuses[id];
            let s = &self.signals[nx.signal];
            (
                s.elem_range(s.current_slot(), nx.offset, nx.width),
                s.elem_range(s.last_value_slot(), nx.offset, nx.width),
                s.elem_range(s.driving_slot(), nx.offset, nx.width),
            )
        };
        let len = cur.len();
        let new = self.tlab.alloc(len);
        self.tlab
            .bytes_mut(new.clone())
            .copy_from_slice(self.mem.bytes(drv));
        if self.mem.bytes(cur) == self.tlab.bytes(new.clone()) {
            // activity without an event; last_active is already stamped
            return;
        }
        let old = self.tlab.alloc(len);
        self.tlab
            .bytes_mut(old.clone())
            .copy_from_slice(self.mem.bytes(cur));
        self.mem
            .bytes_mut(last)
            .copy_from_slice(self.tlab.bytes(old));
        self.mem
            .bytes_mut(cur)
            .copy_from_slice(self.tlab.bytes(new));
        self.notify(id);
    }

    fn update_implicit(&mut self, sig: SignalId) {
        let Some(mut f) = self.implicits.remove(&sig) else {
            return;
        };
        let new = f(&ReadCtx {
            signals: &self.signals,
            mem: &self.mem,
            now: self.now,
        });
        self.implicits.insert(sig, f);
        let (cur, last, drv) = {
            let s = &self.signals[sig];
            (s.current_slot(), s.last_value_slot(), s.driving_slot())
        };
        debug_assert_eq!(new.len(), cur.len());
        if self.mem.bytes(cur) == new.as_slice() {
            return;
        }
        let old = self.mem.bytes(cur).to_vec();
        self.mem.bytes_mut(last).copy_from_slice(&old);
        self.mem.bytes_mut(cur).copy_from_slice(&new);
        self.mem.bytes_mut(drv).copy_from_slice(&new);
        for nx in self.signals[sig].nexuses.clone() {
            self.notify(nx);
        }
    }

    /// Stamps the event/activity times and wakes everyone pending on the
    /// nexus, exactly once each.
    fn notify(&mut self, id: NexusId) {
        self.nexuses[id].last_event = Some(self.now);
        self.nexuses[id].last_active = Some(self.now);
        for w in self.nexuses[id].pending.snapshot() {
            self.wake(w);
        }
    }

    fn wake(&mut self, w: WakeableRef) {
        match w {
            WakeableRef::Process(p) => {
                if self.processes[p].state == ProcessState::Done || self.processes[p].queued {
                    return;
                }
                if let Some(t) = self.processes[p].trigger {
                    let ctx = ReadCtx {
                        signals: &self.signals,
                        mem: &self.mem,
                        now: self.now,
                    };
                    if !eval_trigger(&self.triggers, t, &ctx) {
                        return;
                    }
                }
                self.processes[p].queued = true;
                if self.processes[p].postponed {
                    self.postponed_processes.push(p);
                } else {
                    self.run_procs.push(p);
                }
            }
            WakeableRef::Watch(id) => {
                if self.watches[id].queued {
                    return;
                }
                if let Some(t) = self.watches[id].trigger {
                    let ctx = ReadCtx {
                        signals: &self.signals,
                        mem: &self.mem,
                        now: self.now,
                    };
                    if !eval_trigger(&self.triggers, t, &ctx) {
                        return;
                    }
                }
                self.watches[id].queued = true;
                if self.watches[id].postponed {
                    self.postponed_watches.push(id);
                } else {
                    self.run_watches.push(id);
                }
            }
            WakeableRef::Implicit(sig) => {
                if !self.run_implicit.contains(&sig) {
                    self.run_implicit.push(sig);
                }
            }
        }
    }

    // ---- internals -------------------------------------------------------

    fn resolve_range(
        &mut self,
        signal: SignalId,
        offset: u32,
        count: u32,
    ) -> Result<Vec<NexusId>, RtError> {
        let name = self.name_of(self.signals[signal].name);
        nexus::resolve_range(&mut self.nexuses, &mut self.signals, &name, signal, offset, count)
    }

    fn name_of(&self, name: Ident) -> String {
        self.interner.resolve(name).to_owned()
    }

    fn push_event(&mut self, when: SimTime, action: EventAction) {
        self.seq += 1;
        self.events.push(Reverse(TimedEvent {
            when,
            seq: self.seq,
            action,
        }));
    }

    fn queue_driver_update(&mut self, id: NexusId) {
        if !self.next_drivers.contains(&id) {
            self.next_drivers.push(id);
        }
    }

    /// Installs `process`'s driver on a nexus if it has none yet, checking
    /// the multiple-source rule.
    fn ensure_driver(
        &mut self,
        process: ProcessId,
        signal: SignalId,
        id: NexusId,
    ) -> Result<(), RtError> {
        if self.nexuses[id].driver_mut(process).is_some() {
            return Ok(());
        }
        self.check_new_source(signal, id)?;
        let init = {
            let nx = &self.nexuses[id];
            let s = &self.signals[signal];
            self.mem
                .bytes(s.elem_range(s.driving_slot(), nx.offset, nx.width))
                .to_vec()
        };
        self.nexuses[id]
            .sources
            .push(Source::Driver(Driver::new(process, init)));
        Ok(())
    }

    /// Rejects a second source on an unresolved signal with a structural
    /// diagnostic naming the existing sources.
    fn check_new_source(&mut self, signal: SignalId, id: NexusId) -> Result<(), RtError> {
        if self.nexuses[id].sources.is_empty()
            || self.signals[signal].flags.contains(SignalFlags::RESOLVED)
        {
            return Ok(());
        }
        let name = self.name_of(self.signals[signal].name);
        let mut diag = Diagnostic::error(format!(
            "signal {name} has multiple sources but no resolution function"
        ));
        for src in &self.nexuses[id].sources {
            diag = match src {
                Source::Driver(d) => diag.with_note(format!(
                    "existing driver owned by process {}",
                    self.interner.resolve(self.processes[d.process].name)
                )),
                Source::Port { .. } => diag.with_note("existing source is a connected port"),
            };
        }
        diag = diag.with_hint(
            "attach a resolution function with resolve_signal, or drive from a single process",
        );
        self.sink.emit(diag);
        Err(RtError::MultipleSources { signal: name })
    }

    /// Raises a nexus's dependency rank to at least `min_rank` and pushes
    /// the increase through its readers. The growth bound breaks port
    /// cycles.
    fn bump_rank(&mut self, id: NexusId, min_rank: u32) {
        if self.nexuses[id].rank >= min_rank || min_rank as usize > self.nexuses.len() {
            return;
        }
        self.nexuses[id].rank = min_rank;
        for out in self.nexuses[id].outputs.clone() {
            self.bump_rank(out, min_rank + 1);
        }
    }

    /// Pairs downstream and upstream covering sets 1:1, splitting whichever
    /// side is wider at each mismatched boundary.
    fn align_ranges(
        &mut self,
        mut down: Vec<NexusId>,
        mut up: Vec<NexusId>,
    ) -> Vec<(NexusId, NexusId)> {
        let mut pairs = Vec::new();
        let (mut di, mut ui) = (0, 0);
        while di < down.len() && ui < up.len() {
            let (d, u) = (down[di], up[ui]);
            let dw = self.nexuses[d].width;
            let uw = self.nexuses[u].width;
            if dw < uw {
                let tail = nexus::split_part(&mut self.nexuses, &mut self.signals, u, dw);
                up.insert(ui + 1, tail);
            } else if uw < dw {
                let tail = nexus::split_part(&mut self.nexuses, &mut self.signals, d, uw);
                down.insert(di + 1, tail);
            }
            pairs.push((down[di], up[ui]));
            di += 1;
            ui += 1;
        }
        pairs
    }

    fn drain_due(&mut self) {
        loop {
            let due = matches!(self.events.peek(), Some(Reverse(ev)) if ev.when.fs <= self.now.fs);
            if !due {
                break;
            }
            let Some(Reverse(ev)) = self.events.pop() else {
                break;
            };
            match ev.action {
                EventAction::DriverUpdate(nx) => self.queue_driver_update(nx),
                EventAction::Resume(p) => {
                    if self.processes[p].state != ProcessState::Done && !self.processes[p].queued {
                        self.processes[p].queued = true;
                        self.next_processes.push(p);
                    }
                }
            }
        }
    }

    fn delta_limit_error(&self) -> RtError {
        let mut active: Vec<String> = Vec::new();
        for &p in self.next_processes.iter().chain(&self.run_procs) {
            active.push(format!(
                "process {}",
                self.interner.resolve(self.processes[p].name)
            ));
        }
        for &nx in &self.next_drivers {
            let sig = self.interner.resolve(self.signals[self.nexuses[nx].signal].name);
            active.push(format!("driver of {sig}"));
            for src in &self.nexuses[nx].sources {
                if let Source::Driver(d) = src {
                    active.push(format!(
                        "process {}",
                        self.interner.resolve(self.processes[d.process].name)
                    ));
                }
            }
        }
        active.sort();
        active.dedup();
        RtError::DeltaCycleLimit {
            fs: self.now.fs,
            limit: self.config.max_delta,
            active,
        }
    }
}
