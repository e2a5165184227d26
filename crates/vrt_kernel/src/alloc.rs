//! Bump allocation for signal memory and per-cycle scratch values.
//!
//! [`StaticArena`] hands out stable byte-range handles ([`ValueSlot`]) for
//! runtime structures with unbounded lifetime: signal value regions are
//! allocated here once at elaboration and never freed before teardown.
//! Chunks are fixed-capacity, so a slot's backing bytes never move.
//!
//! [`Tlab`] is the transient counterpart: a single-owner bump region reused
//! every cycle for intermediate values (resolution outputs, conversion
//! scratch). A process that suspends with live intermediate state may claim
//! the buffer outright, in which case the kernel installs a fresh one.

use crate::error::RtError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Default chunk size for the static arena (1 MiB).
const CHUNK_SIZE: usize = 1 << 20;

/// A stable handle to a byte range inside the [`StaticArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueSlot {
    chunk: u32,
    offset: u32,
    len: u32,
}

impl ValueSlot {
    /// Length of the slot in bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns `true` if the slot is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Narrows this slot to a byte sub-range.
    ///
    /// # Panics
    ///
    /// Panics if the sub-range exceeds the slot.
    pub fn narrow(&self, offset: usize, len: usize) -> ValueSlot {
        assert!(
            offset + len <= self.len as usize,
            "sub-range {offset}+{len} exceeds slot of {} bytes",
            self.len
        );
        ValueSlot {
            chunk: self.chunk,
            offset: self.offset + offset as u32,
            len: len as u32,
        }
    }
}

/// Bump allocator for runtime structures with whole-run lifetime.
///
/// Allocation happens only during elaboration and lazy source/value
/// creation, so it is deliberately simple: chunks are allocated at fixed
/// capacity and filled front to back. Nothing is ever freed individually.
pub struct StaticArena {
    chunks: Vec<Vec<u8>>,
    used_in_last: usize,
    total_used: usize,
    limit: usize,
}

impl StaticArena {
    /// Creates an arena with the given total byte limit.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            chunks: Vec::new(),
            used_in_last: 0,
            total_used: 0,
            limit,
        }
    }

    /// Allocates `len` zeroed bytes, returning a stable slot handle.
    pub fn alloc(&mut self, len: usize) -> Result<ValueSlot, RtError> {
        if self.total_used + len > self.limit {
            return Err(RtError::OutOfMemory {
                requested: len,
                limit: self.limit,
            });
        }
        let fits = self
            .chunks
            .last()
            .is_some_and(|c| self.used_in_last + len <= c.len());
        if !fits {
            self.chunks.push(vec![0u8; CHUNK_SIZE.max(len)]);
            self.used_in_last = 0;
        }
        let slot = ValueSlot {
            chunk: (self.chunks.len() - 1) as u32,
            offset: self.used_in_last as u32,
            len: len as u32,
        };
        self.used_in_last += len;
        self.total_used += len;
        Ok(slot)
    }

    /// Returns the bytes of a slot.
    pub fn bytes(&self, slot: ValueSlot) -> &[u8] {
        let start = slot.offset as usize;
        &self.chunks[slot.chunk as usize][start..start + slot.len as usize]
    }

    /// Returns the bytes of a slot, mutably.
    pub fn bytes_mut(&mut self, slot: ValueSlot) -> &mut [u8] {
        let start = slot.offset as usize;
        &mut self.chunks[slot.chunk as usize][start..start + slot.len as usize]
    }

    /// Returns the slot's byte offset in the arena's flat address space.
    ///
    /// Compiled code addresses signal memory by this offset; it is the
    /// `offset` field of the signal's ABI header.
    pub fn global_offset(&self, slot: ValueSlot) -> u32 {
        let before: usize = self.chunks[..slot.chunk as usize]
            .iter()
            .map(|c| c.len())
            .sum();
        before as u32 + slot.offset
    }

    /// Total bytes handed out so far.
    pub fn used(&self) -> usize {
        self.total_used
    }
}

/// A per-cycle bump region for transient intermediate values.
///
/// Reset at the end of every simulation cycle. Offsets returned by
/// [`alloc`](Self::alloc) stay valid until the next [`reset`](Self::reset)
/// or [`claim`](Self::claim).
pub struct Tlab {
    buf: Vec<u8>,
    used: usize,
}

/// Initial capacity of a fresh TLAB (64 KiB).
const TLAB_CAPACITY: usize = 64 * 1024;

impl Tlab {
    /// Creates a new, empty TLAB.
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; TLAB_CAPACITY],
            used: 0,
        }
    }

    /// Allocates `len` zeroed bytes, returning their range in the buffer.
    pub fn alloc(&mut self, len: usize) -> Range<usize> {
        if self.used + len > self.buf.len() {
            self.buf.resize((self.used + len).next_power_of_two(), 0);
        }
        let range = self.used..self.used + len;
        self.buf[range.clone()].fill(0);
        self.used += len;
        range
    }

    /// Returns the bytes of an allocated range.
    pub fn bytes(&self, range: Range<usize>) -> &[u8] {
        &self.buf[range]
    }

    /// Returns the bytes of an allocated range, mutably.
    pub fn bytes_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        &mut self.buf[range]
    }

    /// Discards all allocations, reusing the buffer for the next cycle.
    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// Takes ownership of the buffer (truncated to its live prefix) and
    /// installs a fresh one. A suspending process calls this to keep its
    /// intermediate state alive across the cycle boundary.
    pub fn claim(&mut self) -> Vec<u8> {
        let mut fresh = vec![0u8; TLAB_CAPACITY];
        std::mem::swap(&mut self.buf, &mut fresh);
        fresh.truncate(self.used);
        self.used = 0;
        fresh
    }

    /// Bytes currently allocated.
    pub fn used(&self) -> usize {
        self.used
    }
}

impl Default for Tlab {
    fn default() -> Self {
        Self::new()
    }
}
