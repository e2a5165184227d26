//! Shared foundational types for the VRT simulation runtime.
//!
//! This crate provides the building blocks the kernel crates agree on:
//! interned identifiers, the nine-value IEEE 1164 logic type with its LRM
//! resolution table, a generic ID-indexed arena, and source locations for
//! runtime fault attribution.

#![warn(missing_docs)]

pub mod arena;
pub mod ident;
pub mod logic;
pub mod source_loc;

pub use arena::{Arena, ArenaId};
pub use ident::{Ident, Interner};
pub use logic::Logic;
pub use source_loc::SourceLoc;
