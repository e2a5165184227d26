//! VHDL report severity levels ordered from least to most severe.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The severity level of a runtime diagnostic.
///
/// These are the four LRM severity levels of `assert` and `report`
/// statements, ordered from least severe (`Note`) to most severe
/// (`Failure`), matching the derived `PartialOrd`/`Ord` implementation based
/// on declaration order. The run stops when a diagnostic at or above the
/// configured exit severity is emitted; by default only `Failure` is fatal.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Severity {
    /// Informational message from simulated code.
    Note,
    /// A suspicious condition that does not stop the run.
    Warning,
    /// A definite problem; fatal only if the exit severity is lowered.
    Error,
    /// An unrecoverable condition; always stops the run.
    Failure,
}

impl Severity {
    /// Returns `true` if this severity stops a run with the given exit
    /// severity configured.
    pub fn is_fatal(self, exit_severity: Severity) -> bool {
        self >= exit_severity
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Note => write!(f, "note"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Failure => write!(f, "failure"),
        }
    }
}
