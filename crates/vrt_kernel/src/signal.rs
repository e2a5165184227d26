//! Signals and their shared-memory value layout.
//!
//! A signal is a named, possibly composite, declared object created once at
//! elaboration by [`Model::init_signal`](crate::model::Model::init_signal).
//! Its value memory is one contiguous [`ValueSlot`] holding the ABI header
//! followed by three equal regions — current/effective, last-value, and
//! driving/default — that compiled code addresses directly by byte offset.
//! The layout is part of the code-generator contract and must not change
//! per-field without a matching update on that side.

use crate::alloc::{StaticArena, ValueSlot};
use crate::nexus::NexusId;
use crate::resolution::Resolution;
use crate::scope::ScopeId;
use bitflags::bitflags;
use vrt_common::{define_arena_id, Ident};

define_arena_id! {
    /// Opaque ID of a signal in the model's signal arena.
    SignalId
}

bitflags! {
    /// Per-signal flag word.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct SignalFlags: u32 {
        /// The signal has a resolution function attached.
        const RESOLVED = 1 << 0;
        /// Declared with `register` kind: retains its value when every
        /// source is disconnected.
        const REGISTER = 1 << 1;
        /// The signal caches its event flag for `'event` queries.
        const CACHE_EVENT = 1 << 2;
        /// An implicit signal (e.g. `'delayed`, guard expressions) whose
        /// value is recomputed by the kernel, not driven.
        const IMPLICIT = 1 << 3;
        /// The resolution function resolves the whole composite in one
        /// call instead of per-element.
        const COMPOSITE_RESOLUTION = 1 << 4;
    }
}

/// Size of the ABI header preceding the value regions: `{ size: u32,
/// offset: u32 }`, little-endian.
pub const SIGNAL_HEADER_BYTES: usize = 8;

/// A declared signal and its storage.
pub struct Signal {
    /// Declaration name.
    pub name: Ident,
    /// Owning scope.
    pub scope: ScopeId,
    /// Total value size in bytes (one region's worth).
    pub size: u32,
    /// Size of one scalar element in bytes (1, 2, 4, or 8).
    pub elem_size: u32,
    /// Flag word.
    pub flags: SignalFlags,
    /// Header + three value regions, contiguous.
    pub slot: ValueSlot,
    /// Nexus chain in ascending element-offset order.
    pub nexuses: Vec<NexusId>,
    /// Resolution function and its memo, if attached.
    pub resolution: Option<Resolution>,
    /// Cached offset→nexus index; `None` until the chain grows past the
    /// build threshold, rebuilt lazily when stale.
    pub index: Option<crate::nexus::NexusIndex>,
}

impl Signal {
    /// Element count of this signal.
    pub fn width(&self) -> u32 {
        self.size / self.elem_size
    }

    /// Writes the ABI header for a signal placed at `global_offset`.
    pub fn write_header(mem: &mut StaticArena, slot: ValueSlot, size: u32) {
        let global = mem.global_offset(slot);
        let hdr = mem.bytes_mut(slot.narrow(0, SIGNAL_HEADER_BYTES));
        hdr[0..4].copy_from_slice(&size.to_le_bytes());
        hdr[4..8].copy_from_slice(&global.to_le_bytes());
    }

    /// The slot of the current/effective value region.
    pub fn current_slot(&self) -> ValueSlot {
        self.slot
            .narrow(SIGNAL_HEADER_BYTES, self.size as usize)
    }

    /// The slot of the last-value region.
    pub fn last_value_slot(&self) -> ValueSlot {
        self.slot
            .narrow(SIGNAL_HEADER_BYTES + self.size as usize, self.size as usize)
    }

    /// The slot of the driving/default value region.
    pub fn driving_slot(&self) -> ValueSlot {
        self.slot.narrow(
            SIGNAL_HEADER_BYTES + 2 * self.size as usize,
            self.size as usize,
        )
    }

    /// Narrows a region slot to an element range.
    pub fn elem_range(&self, region: ValueSlot, offset: u32, count: u32) -> ValueSlot {
        region.narrow(
            (offset * self.elem_size) as usize,
            (count * self.elem_size) as usize,
        )
    }

    /// Total allocation size for a signal of `size` value bytes.
    pub fn alloc_size(size: u32) -> usize {
        SIGNAL_HEADER_BYTES + 3 * size as usize
    }
}

/// Reads one scalar element (little-endian, at most 8 bytes) from a byte
/// region.
pub fn read_scalar(bytes: &[u8], elem_size: u32, index: u32) -> u64 {
    let start = (index * elem_size) as usize;
    let mut buf = [0u8; 8];
    buf[..elem_size as usize].copy_from_slice(&bytes[start..start + elem_size as usize]);
    u64::from_le_bytes(buf)
}

/// Writes one scalar element (little-endian) into a byte region.
pub fn write_scalar(bytes: &mut [u8], elem_size: u32, index: u32, value: u64) {
    let start = (index * elem_size) as usize;
    bytes[start..start + elem_size as usize]
        .copy_from_slice(&value.to_le_bytes()[..elem_size as usize]);
}
