//! Structured diagnostic messages with severity, notes, and hints.

use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;
use vrt_common::SourceLoc;

/// A structured runtime diagnostic.
///
/// Diagnostics are the primary mechanism for reporting simulation conditions
/// to the user: `assert`/`report` output, multi-source conflicts discovered
/// at elaboration, heuristic warnings (such as an always-`U` driving port),
/// and fault attribution for compiled code. Each diagnostic includes:
/// - A severity level and a primary message
/// - The simulation time (femtoseconds) at which it was raised
/// - Optional structural notes ("signal Q is driven from process P1")
/// - Optional actionable hints and a source location
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity level of this diagnostic.
    pub severity: Severity,
    /// The main diagnostic message.
    pub message: String,
    /// Simulation time in femtoseconds when this diagnostic was raised, if
    /// raised during a run (elaboration diagnostics carry `None`).
    pub time_fs: Option<u64>,
    /// Structural context footnotes (e.g., "note: ...").
    pub notes: Vec<String>,
    /// Actionable suggestions (e.g., "help: ...").
    pub hints: Vec<String>,
    /// The source position of the offending statement, if known.
    pub loc: Option<SourceLoc>,
}

impl Diagnostic {
    /// Creates a new diagnostic with the given severity and message.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            time_fs: None,
            notes: Vec::new(),
            hints: Vec::new(),
            loc: None,
        }
    }

    /// Creates a warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    /// Creates an error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Creates a failure diagnostic.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(Severity::Failure, message)
    }

    /// Stamps the simulation time this diagnostic was raised at.
    pub fn at_time(mut self, time_fs: u64) -> Self {
        self.time_fs = Some(time_fs);
        self
    }

    /// Adds a structural note to this diagnostic.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Adds an actionable hint to this diagnostic.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }

    /// Attaches the source location of the offending statement.
    pub fn with_loc(mut self, loc: SourceLoc) -> Self {
        self.loc = Some(loc);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)?;
        if let Some(loc) = &self.loc {
            write!(f, " ({loc})")?;
        }
        Ok(())
    }
}
