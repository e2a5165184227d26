//! Nexuses: the atomic units of value propagation.
//!
//! Every element of a nexus shares an identical source configuration, so a
//! driving value is computed once per nexus, never per element. When an
//! operation addresses a strict sub-range of an existing nexus the nexus is
//! split at the addressed offsets: the original is narrowed in place and the
//! remainder becomes a new nexus chained after it on the owning signal.
//! Splits never merge back, and they only happen at addressed offsets, so a
//! signal's chain fragments monotonically but stays bounded.
//!
//! Splitting must preserve source/output consistency: each source is cloned
//! and narrowed rather than shared, and the split propagates through port
//! links in both directions. A port link whose far side already has a
//! boundary at the split offset terminates the propagation, which is also
//! what breaks port cycles.

use crate::error::RtError;
use crate::signal::{Signal, SignalId};
use crate::source::Source;
use crate::time::SimTime;
use crate::wakeable::Pending;
use vrt_common::{define_arena_id, Arena};

define_arena_id! {
    /// Opaque ID of a nexus in the model's nexus arena.
    NexusId
}

/// One atomic propagation unit of a signal.
pub struct Nexus {
    /// Owning signal.
    pub signal: SignalId,
    /// Absolute element offset within the signal.
    pub offset: u32,
    /// Element count.
    pub width: u32,
    /// Element size in bytes, copied from the signal.
    pub elem_size: u32,
    /// Value sources. More than one requires a resolution function on the
    /// signal.
    pub sources: Vec<Source>,
    /// Nexuses with a port source reading this one.
    pub outputs: Vec<NexusId>,
    /// Dependency rank: 1 + max rank of port upstreams. Orders the
    /// recompute heaps so upstream values are final first.
    pub rank: u32,
    /// Wakeables sensitive to this nexus.
    pub pending: Pending,
    /// Force override, cleared by `release`.
    pub forced: Option<Vec<u8>>,
    /// One-shot deposit value, consumed by the next driving-value
    /// computation.
    pub deposit: Option<Vec<u8>>,
    /// Instant of the most recent event (value change).
    pub last_event: Option<SimTime>,
    /// Instant of the most recent activity (transaction fired, changed or
    /// not).
    pub last_active: Option<SimTime>,
}

impl Nexus {
    /// A fresh source-less nexus covering `[offset, offset + width)` of
    /// `signal`.
    pub fn new(signal: SignalId, offset: u32, width: u32, elem_size: u32) -> Self {
        Self {
            signal,
            offset,
            width,
            elem_size,
            sources: Vec::new(),
            outputs: Vec::new(),
            rank: 0,
            pending: Pending::None,
            forced: None,
            deposit: None,
            last_event: None,
            last_active: None,
        }
    }

    /// Width in bytes.
    pub fn byte_len(&self) -> usize {
        (self.width * self.elem_size) as usize
    }

    /// One past the last element covered.
    pub fn end(&self) -> u32 {
        self.offset + self.width
    }

    /// The driver source owned by `process`, if any.
    pub fn driver_mut(&mut self, process: crate::process::ProcessId) -> Option<&mut crate::source::Driver> {
        self.sources
            .iter_mut()
            .filter_map(Source::as_driver_mut)
            .find(|d| d.process == process)
    }

    /// Number of sources that are drivers or ports (force/deposit are
    /// overlays, not sources).
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}

/// Chain length past which a signal gets an offset-lookup index.
pub const INDEX_THRESHOLD: usize = 8;

/// Cached offset→nexus map for a fragmented signal.
///
/// The stride is the gcd of every nexus offset and width, so each table
/// slot is covered by exactly one nexus. A power-of-two stride is looked up
/// with a shift instead of a division. Splits mark the index stale; it is
/// rebuilt lazily on the next lookup.
pub struct NexusIndex {
    stride: u32,
    shift: Option<u32>,
    entries: Vec<NexusId>,
    stale: bool,
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

impl NexusIndex {
    /// Builds the index from a signal's current chain.
    pub fn build(signal: &Signal, nexuses: &Arena<NexusId, Nexus>) -> Self {
        let mut stride = 0;
        for &id in &signal.nexuses {
            let nx = &nexuses[id];
            stride = gcd(stride, nx.offset);
            stride = gcd(stride, nx.width);
        }
        debug_assert!(stride > 0);
        let slots = (signal.width() / stride) as usize;
        let mut entries = Vec::with_capacity(slots);
        for &id in &signal.nexuses {
            let nx = &nexuses[id];
            for _ in 0..nx.width / stride {
                entries.push(id);
            }
        }
        debug_assert_eq!(entries.len(), slots);
        let shift = stride.is_power_of_two().then(|| stride.trailing_zeros());
        Self {
            stride,
            shift,
            entries,
            stale: false,
        }
    }

    /// The nexus covering `offset`, or `None` if the index is stale.
    pub fn lookup(&self, offset: u32) -> Option<NexusId> {
        if self.stale {
            return None;
        }
        let slot = match self.shift {
            Some(shift) => offset >> shift,
            None => offset / self.stride,
        };
        self.entries.get(slot as usize).copied()
    }

    /// Invalidates the index; the next lookup misses and triggers a
    /// rebuild.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Returns `true` once [`mark_stale`](Self::mark_stale) has been
    /// called.
    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

/// Returns the nexus starting `at` elements into `id`, splitting `id` if
/// the offset falls strictly inside it.
///
/// `at == 0` and `at == width` hit existing boundaries and return without
/// modifying anything (for `at == width`, the chain successor). The split
/// propagates through port links: each port source of the new tail is
/// retargeted at the matching split of its upstream, and every output port
/// reading the split nexus is split at the same offset. Port widths match
/// across a link, so the relative offset is the same on both sides.
pub fn split_part(
    nexuses: &mut Arena<NexusId, Nexus>,
    signals: &mut Arena<SignalId, Signal>,
    id: NexusId,
    at: u32,
) -> NexusId {
    if at == 0 {
        return id;
    }
    let (sig_id, width, elem_size, offset) = {
        let nx = &nexuses[id];
        (nx.signal, nx.width, nx.elem_size, nx.offset)
    };
    if at == width {
        // Existing boundary; the part starting at `at` is the chain
        // successor. This is also the cycle breaker for port loops.
        let chain = &signals[sig_id].nexuses;
        let pos = chain.iter().position(|&n| n == id);
        return match pos.and_then(|p| chain.get(p + 1)) {
            Some(&next) => next,
            None => id,
        };
    }
    debug_assert!(at < width);

    let head_bytes = (at * elem_size) as usize;
    let tail_bytes = ((width - at) * elem_size) as usize;

    // Carve the tail out of the head. Sources are cloned and narrowed, not
    // shared; force/deposit overlays are split bytewise.
    let (tail_sources, head_sources, tail_forced, tail_deposit, pending, rank, le, la, old_outputs) = {
        let nx = &mut nexuses[id];
        let tail_sources: Vec<Source> = nx
            .sources
            .iter()
            .map(|s| s.clone_narrowed(head_bytes, tail_bytes))
            .collect();
        let head_sources: Vec<Source> = nx
            .sources
            .iter()
            .map(|s| s.clone_narrowed(0, head_bytes))
            .collect();
        let tail_forced = nx.forced.as_ref().map(|v| v[head_bytes..].to_vec());
        let tail_deposit = nx.deposit.as_ref().map(|v| v[head_bytes..].to_vec());
        if let Some(f) = &mut nx.forced {
            f.truncate(head_bytes);
        }
        if let Some(d) = &mut nx.deposit {
            d.truncate(head_bytes);
        }
        let outputs = std::mem::take(&mut nx.outputs);
        (
            tail_sources,
            head_sources,
            tail_forced,
            tail_deposit,
            nx.pending.clone(),
            nx.rank,
            nx.last_event,
            nx.last_active,
            outputs,
        )
    };

    let tail_id = nexuses.next_id();
    nexuses.alloc(Nexus {
        signal: sig_id,
        offset: offset + at,
        width: width - at,
        elem_size,
        sources: tail_sources,
        outputs: Vec::new(),
        rank,
        pending,
        forced: tail_forced,
        deposit: tail_deposit,
        last_event: le,
        last_active: la,
    });
    {
        let nx = &mut nexuses[id];
        nx.width = at;
        nx.sources = head_sources;
        nx.outputs = old_outputs.clone();
    }

    // Chain the tail right after the head and invalidate the index.
    {
        let sig = &mut signals[sig_id];
        let pos = sig
            .nexuses
            .iter()
            .position(|&n| n == id)
            .unwrap_or(sig.nexuses.len() - 1);
        sig.nexuses.insert(pos + 1, tail_id);
        if let Some(index) = &mut sig.index {
            index.mark_stale();
        }
    }

    // Retarget the tail's port sources at the matching upstream splits.
    for i in 0..nexuses[tail_id].sources.len() {
        let upstream = match &nexuses[tail_id].sources[i] {
            Source::Port { upstream, .. } => *upstream,
            Source::Driver(_) => continue,
        };
        let up_tail = split_part(nexuses, signals, upstream, at);
        if let Source::Port { upstream, .. } = &mut nexuses[tail_id].sources[i] {
            *upstream = up_tail;
        }
        nexuses[up_tail].outputs.push(tail_id);
    }

    // Split every reader at the same offset; each reader's own port
    // retargeting (above, in its recursive call) links it to our tail.
    for out in old_outputs {
        split_part(nexuses, signals, out, at);
    }

    tail_id
}

/// Returns the chain position and id of the nexus covering element
/// `offset` of `signal`, rebuilding the lookup index when the chain is
/// long and the index is missing or stale.
fn locate(
    nexuses: &Arena<NexusId, Nexus>,
    signals: &mut Arena<SignalId, Signal>,
    signal: SignalId,
    offset: u32,
) -> Option<(usize, NexusId)> {
    let sig = &mut signals[signal];
    if sig.nexuses.len() > INDEX_THRESHOLD {
        let rebuild = sig.index.as_ref().is_none_or(NexusIndex::is_stale);
        if rebuild {
            sig.index = Some(NexusIndex::build(sig, nexuses));
        }
        if let Some(id) = sig.index.as_ref().and_then(|ix| ix.lookup(offset)) {
            let pos = sig.nexuses.iter().position(|&n| n == id)?;
            return Some((pos, id));
        }
    }
    for (pos, &id) in sig.nexuses.iter().enumerate() {
        let nx = &nexuses[id];
        if offset >= nx.offset && offset < nx.end() {
            return Some((pos, id));
        }
    }
    None
}

/// Returns the nexuses covering `[offset, offset + count)` of `signal`,
/// splitting any nexus whose boundary falls strictly inside the range.
/// Idempotent when the boundaries already exist.
pub fn resolve_range(
    nexuses: &mut Arena<NexusId, Nexus>,
    signals: &mut Arena<SignalId, Signal>,
    name: &str,
    signal: SignalId,
    offset: u32,
    count: u32,
) -> Result<Vec<NexusId>, RtError> {
    let width = signals[signal].width();
    if count == 0 || offset + count > width {
        return Err(RtError::RangeOutOfBounds {
            signal: name.to_owned(),
            offset,
            count,
            width,
        });
    }

    let (mut pos, first) = locate(nexuses, signals, signal, offset)
        .ok_or_else(|| RtError::RangeOutOfBounds {
            signal: name.to_owned(),
            offset,
            count,
            width,
        })?;
    let first_off = nexuses[first].offset;
    if offset > first_off {
        split_part(nexuses, signals, first, offset - first_off);
        pos += 1;
    }

    let end = offset + count;
    let mut covered = Vec::new();
    loop {
        let id = signals[signal].nexuses[pos];
        let nx_end = nexuses[id].end();
        if nx_end > end {
            split_part(nexuses, signals, id, end - nexuses[id].offset);
        }
        covered.push(id);
        if nexuses[id].end() >= end {
            break;
        }
        pos += 1;
    }
    Ok(covered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::StaticArena;
    use crate::process::ProcessId;
    use crate::signal::SignalFlags;
    use crate::source::Driver;
    use vrt_common::{ArenaId, Ident};

    struct Fixture {
        mem: StaticArena,
        signals: Arena<SignalId, Signal>,
        nexuses: Arena<NexusId, Nexus>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                mem: StaticArena::with_limit(1 << 20),
                signals: Arena::new(),
                nexuses: Arena::new(),
            }
        }

        fn signal(&mut self, width: u32) -> SignalId {
            let slot = self.mem.alloc(Signal::alloc_size(width)).unwrap();
            let sid = self.signals.next_id();
            let nid = self.nexuses.alloc(Nexus::new(sid, 0, width, 1));
            self.signals.alloc(Signal {
                name: Ident::from_raw(0),
                scope: ArenaId::from_raw(0),
                size: width,
                elem_size: 1,
                flags: SignalFlags::empty(),
                slot,
                nexuses: vec![nid],
                resolution: None,
                index: None,
            });
            sid
        }
    }

    fn driver(bytes: &[u8]) -> Source {
        Source::Driver(Driver::new(ProcessId::from_raw(0), bytes.to_vec()))
    }

    #[test]
    fn split_narrows_head_and_chains_tail() {
        let mut fx = Fixture::new();
        let sid = fx.signal(8);
        let head = fx.signals[sid].nexuses[0];
        fx.nexuses[head].sources.push(driver(&[1, 2, 3, 4, 5, 6, 7, 8]));

        let tail = split_part(&mut fx.nexuses, &mut fx.signals, head, 3);
        assert_eq!(fx.signals[sid].nexuses, vec![head, tail]);
        assert_eq!(fx.nexuses[head].width, 3);
        assert_eq!(fx.nexuses[tail].offset, 3);
        assert_eq!(fx.nexuses[tail].width, 5);
        let head_d = fx.nexuses[head].sources[0].as_driver().unwrap();
        assert_eq!(head_d.current, vec![1, 2, 3]);
        let tail_d = fx.nexuses[tail].sources[0].as_driver().unwrap();
        assert_eq!(tail_d.current, vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn split_at_existing_boundary_is_noop() {
        let mut fx = Fixture::new();
        let sid = fx.signal(8);
        let head = fx.signals[sid].nexuses[0];
        let tail = split_part(&mut fx.nexuses, &mut fx.signals, head, 4);
        assert_eq!(fx.nexuses.len(), 2);

        assert_eq!(split_part(&mut fx.nexuses, &mut fx.signals, head, 0), head);
        assert_eq!(split_part(&mut fx.nexuses, &mut fx.signals, head, 4), tail);
        assert_eq!(fx.nexuses.len(), 2);
    }

    #[test]
    fn split_propagates_through_port_link() {
        let mut fx = Fixture::new();
        let up_sig = fx.signal(8);
        let down_sig = fx.signal(8);
        let up = fx.signals[up_sig].nexuses[0];
        let down = fx.signals[down_sig].nexuses[0];
        fx.nexuses[down].sources.push(Source::Port {
            upstream: up,
            conversion: None,
        });
        fx.nexuses[up].outputs.push(down);

        let down_tail = split_part(&mut fx.nexuses, &mut fx.signals, down, 2);

        // Upstream split at the same offset, tail port retargeted at it
        assert_eq!(fx.signals[up_sig].nexuses.len(), 2);
        let up_tail = fx.signals[up_sig].nexuses[1];
        assert_eq!(fx.nexuses[up_tail].offset, 2);
        match &fx.nexuses[down_tail].sources[0] {
            Source::Port { upstream, .. } => assert_eq!(*upstream, up_tail),
            Source::Driver(_) => panic!("expected port source"),
        }
        assert!(fx.nexuses[up_tail].outputs.contains(&down_tail));
        assert!(fx.nexuses[up].outputs.contains(&down));
        match &fx.nexuses[down].sources[0] {
            Source::Port { upstream, .. } => assert_eq!(*upstream, up),
            Source::Driver(_) => panic!("expected port source"),
        }
    }

    #[test]
    fn split_splits_readers_of_the_split_nexus() {
        let mut fx = Fixture::new();
        let up_sig = fx.signal(8);
        let down_sig = fx.signal(8);
        let up = fx.signals[up_sig].nexuses[0];
        let down = fx.signals[down_sig].nexuses[0];
        fx.nexuses[down].sources.push(Source::Port {
            upstream: up,
            conversion: None,
        });
        fx.nexuses[up].outputs.push(down);

        // Splitting the upstream drags every reader along
        split_part(&mut fx.nexuses, &mut fx.signals, up, 5);
        assert_eq!(fx.signals[down_sig].nexuses.len(), 2);
        let down_tail = fx.signals[down_sig].nexuses[1];
        let up_tail = fx.signals[up_sig].nexuses[1];
        match &fx.nexuses[down_tail].sources[0] {
            Source::Port { upstream, .. } => assert_eq!(*upstream, up_tail),
            Source::Driver(_) => panic!("expected port source"),
        }
        assert!(fx.nexuses[up_tail].outputs.contains(&down_tail));
    }

    #[test]
    fn port_cycle_terminates() {
        let mut fx = Fixture::new();
        let a_sig = fx.signal(4);
        let b_sig = fx.signal(4);
        let a = fx.signals[a_sig].nexuses[0];
        let b = fx.signals[b_sig].nexuses[0];
        // a reads b, b reads a
        fx.nexuses[a].sources.push(Source::Port {
            upstream: b,
            conversion: None,
        });
        fx.nexuses[b].outputs.push(a);
        fx.nexuses[b].sources.push(Source::Port {
            upstream: a,
            conversion: None,
        });
        fx.nexuses[a].outputs.push(b);

        let a_tail = split_part(&mut fx.nexuses, &mut fx.signals, a, 2);
        assert_eq!(fx.signals[a_sig].nexuses.len(), 2);
        assert_eq!(fx.signals[b_sig].nexuses.len(), 2);
        let b_tail = fx.signals[b_sig].nexuses[1];
        match &fx.nexuses[a_tail].sources[0] {
            Source::Port { upstream, .. } => assert_eq!(*upstream, b_tail),
            Source::Driver(_) => panic!("expected port source"),
        }
        match &fx.nexuses[b_tail].sources[0] {
            Source::Port { upstream, .. } => assert_eq!(*upstream, a_tail),
            Source::Driver(_) => panic!("expected port source"),
        }
    }

    #[test]
    fn split_splits_force_overlay() {
        let mut fx = Fixture::new();
        let sid = fx.signal(4);
        let head = fx.signals[sid].nexuses[0];
        fx.nexuses[head].forced = Some(vec![9, 8, 7, 6]);
        let tail = split_part(&mut fx.nexuses, &mut fx.signals, head, 1);
        assert_eq!(fx.nexuses[head].forced, Some(vec![9]));
        assert_eq!(fx.nexuses[tail].forced, Some(vec![8, 7, 6]));
    }

    #[test]
    fn resolve_range_splits_both_boundaries() {
        let mut fx = Fixture::new();
        let sid = fx.signal(8);
        let covered =
            resolve_range(&mut fx.nexuses, &mut fx.signals, "s", sid, 2, 3).unwrap();
        assert_eq!(covered.len(), 1);
        assert_eq!(fx.nexuses[covered[0]].offset, 2);
        assert_eq!(fx.nexuses[covered[0]].width, 3);
        assert_eq!(fx.signals[sid].nexuses.len(), 3);

        // Idempotent: same range again changes nothing
        let again =
            resolve_range(&mut fx.nexuses, &mut fx.signals, "s", sid, 2, 3).unwrap();
        assert_eq!(again, covered);
        assert_eq!(fx.signals[sid].nexuses.len(), 3);
    }

    #[test]
    fn resolve_range_spans_multiple_nexuses() {
        let mut fx = Fixture::new();
        let sid = fx.signal(8);
        resolve_range(&mut fx.nexuses, &mut fx.signals, "s", sid, 0, 2).unwrap();
        resolve_range(&mut fx.nexuses, &mut fx.signals, "s", sid, 2, 2).unwrap();
        let covered =
            resolve_range(&mut fx.nexuses, &mut fx.signals, "s", sid, 0, 6).unwrap();
        assert_eq!(covered.len(), 3);
        let total: u32 = covered.iter().map(|&id| fx.nexuses[id].width).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn resolve_range_rejects_out_of_bounds() {
        let mut fx = Fixture::new();
        let sid = fx.signal(8);
        let err =
            resolve_range(&mut fx.nexuses, &mut fx.signals, "s", sid, 6, 4).unwrap_err();
        assert!(matches!(err, RtError::RangeOutOfBounds { .. }));
    }

    #[test]
    fn index_builds_with_gcd_stride() {
        let mut fx = Fixture::new();
        let sid = fx.signal(16);
        // Fragment into 8 pieces of width 2
        for off in (2..16).step_by(2) {
            resolve_range(&mut fx.nexuses, &mut fx.signals, "s", sid, off, 2).unwrap();
        }
        assert_eq!(fx.signals[sid].nexuses.len(), 8);
        let ix = NexusIndex::build(&fx.signals[sid], &fx.nexuses);
        for off in 0..16 {
            let expected = fx.signals[sid]
                .nexuses
                .iter()
                .copied()
                .find(|&id| off >= fx.nexuses[id].offset && off < fx.nexuses[id].end())
                .unwrap();
            assert_eq!(ix.lookup(off), Some(expected));
        }
    }

    #[test]
    fn index_goes_stale_on_split() {
        let mut fx = Fixture::new();
        let sid = fx.signal(16);
        for off in (2..16).step_by(2) {
            resolve_range(&mut fx.nexuses, &mut fx.signals, "s", sid, off, 2).unwrap();
        }
        fx.signals[sid].index = Some(NexusIndex::build(&fx.signals[sid], &fx.nexuses));
        let first = fx.signals[sid].nexuses[0];
        split_part(&mut fx.nexuses, &mut fx.signals, first, 1);
        assert!(fx.signals[sid].index.as_ref().unwrap().is_stale());
        assert_eq!(fx.signals[sid].index.as_ref().unwrap().lookup(0), None);
    }

    #[test]
    fn locate_through_rebuilt_index() {
        let mut fx = Fixture::new();
        let sid = fx.signal(32);
        for off in (2..32).step_by(2) {
            resolve_range(&mut fx.nexuses, &mut fx.signals, "s", sid, off, 2).unwrap();
        }
        // Chain length 16 exceeds the threshold, so this goes through the
        // index path
        let covered =
            resolve_range(&mut fx.nexuses, &mut fx.signals, "s", sid, 10, 2).unwrap();
        assert_eq!(covered.len(), 1);
        assert_eq!(fx.nexuses[covered[0]].offset, 10);
        assert!(fx.signals[sid].index.is_some());
    }
}
