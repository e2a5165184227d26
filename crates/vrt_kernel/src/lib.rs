//! The VRT discrete-event simulation kernel.
//!
//! This crate implements LRM signal semantics over a flat byte-addressed
//! value memory: signals carved into nexuses (the atomic propagation
//! units), per-process drivers with projected-waveform transaction queues,
//! resolution functions with exhaustive memoization for small domains, and
//! a delta-cycle scheduler that recomputes driving values before effective
//! values in dependency-rank order.
//!
//! Everything hangs off [`Model`]: elaborate the design against it (scopes,
//! signals, processes, port maps), then call [`Model::run`]. Process bodies
//! receive `&mut Model` on every resume and talk back through its
//! scheduling entry points.

#![warn(missing_docs)]

pub mod alloc;
pub mod error;
pub mod model;
pub mod nexus;
pub mod process;
pub mod resolution;
pub mod scope;
pub mod signal;
pub mod source;
pub mod time;
pub mod wakeable;

pub use alloc::{StaticArena, Tlab, ValueSlot};
pub use error::{FaultKind, RtError};
pub use model::{Hook, KernelConfig, Model};
pub use nexus::{Nexus, NexusId};
pub use process::{Process, ProcessBody, ProcessId, ProcessKind, ProcessState, Suspend};
pub use resolution::{ResMemo, Resolution};
pub use scope::{Alias, Scope, ScopeId, ScopeKind};
pub use signal::{Signal, SignalFlags, SignalId};
pub use source::{Conversion, Driver, Source, Waveform};
pub use time::SimTime;
pub use wakeable::{Pending, ReadCtx, Trigger, TriggerId, TriggerKind, WakeableRef, Watch, WatchId};

pub use vrt_diagnostics::Severity;
