//! The elaborated scope tree.
//!
//! Scopes mirror the design hierarchy: the root, one scope per entity
//! instance and package, and one per composite sub-signal of a resolved
//! record/array. Elaboration pushes and pops a current-scope stack; signals
//! and processes created while a scope is current are registered on it.

use crate::process::ProcessId;
use crate::signal::SignalId;
use std::any::Any;
use vrt_common::{define_arena_id, Ident};

define_arena_id! {
    /// Opaque ID of a scope in the model's scope arena.
    ScopeId
}

/// What a scope represents in the hierarchy.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScopeKind {
    /// The top of the hierarchy.
    Root,
    /// An entity/architecture instance.
    Instance,
    /// An elaborated package.
    Package,
    /// A sub-element scope of a composite resolved signal.
    SubSignal,
}

/// A secondary name for a sub-range of a signal, registered in the scope
/// where the alias declaration lives.
pub struct Alias {
    /// The alias name.
    pub name: Ident,
    /// The aliased signal.
    pub signal: SignalId,
    /// First covered element.
    pub offset: u32,
    /// Covered element count.
    pub count: u32,
}

/// One node of the scope tree.
pub struct Scope {
    /// Hierarchical name segment.
    pub name: Ident,
    /// Kind tag.
    pub kind: ScopeKind,
    /// Parent scope; `None` only for the root.
    pub parent: Option<ScopeId>,
    /// Child scopes in elaboration order.
    pub children: Vec<ScopeId>,
    /// Signals declared in this scope.
    pub signals: Vec<SignalId>,
    /// Processes elaborated in this scope.
    pub processes: Vec<ProcessId>,
    /// Signal aliases declared in this scope.
    pub aliases: Vec<Alias>,
    /// Opaque per-scope state produced by the scope's reset entry and
    /// consumed by its children's and processes' invocations.
    pub privdata: Option<Box<dyn Any + Send>>,
}

impl Scope {
    /// A fresh scope under `parent`.
    pub fn new(name: Ident, kind: ScopeKind, parent: Option<ScopeId>) -> Self {
        Self {
            name,
            kind,
            parent,
            children: Vec::new(),
            signals: Vec::new(),
            processes: Vec::new(),
            aliases: Vec::new(),
            privdata: None,
        }
    }
}
