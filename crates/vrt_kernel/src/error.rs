//! Kernel error types covering the full runtime taxonomy.
//!
//! Everything fatal routes through [`RtError`]; recoverable conditions go to
//! the diagnostic sink instead and never surface here.

use std::fmt;
use vrt_common::SourceLoc;
use vrt_diagnostics::Severity;

/// The kind of a runtime fault raised from compiled process code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Array index outside its bounds.
    IndexOutOfBounds,
    /// Scalar value outside its declared range.
    RangeError,
    /// Dereference of a null access value.
    NullAccess,
    /// Integer division by zero.
    DivisionByZero,
    /// Arithmetic overflow.
    Overflow,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::IndexOutOfBounds => write!(f, "index out of bounds"),
            FaultKind::RangeError => write!(f, "value out of range"),
            FaultKind::NullAccess => write!(f, "null access dereferenced"),
            FaultKind::DivisionByZero => write!(f, "division by zero"),
            FaultKind::Overflow => write!(f, "arithmetic overflow"),
        }
    }
}

/// Errors that abort a simulation run.
#[derive(Debug, thiserror::Error)]
pub enum RtError {
    /// Multiple sources were attached to a signal with no resolution
    /// function. The structural details (which drivers, which ports) are
    /// emitted to the diagnostic sink before this error is raised.
    #[error("signal {signal} has multiple sources but no resolution function")]
    MultipleSources {
        /// The hierarchical name of the offending signal.
        signal: String,
    },

    /// An `assert`/`report` at or above the configured exit severity.
    #[error("{severity} at {time_fs} fs: {message}")]
    SeverityAbort {
        /// The severity level the simulated code reported.
        severity: Severity,
        /// The time in femtoseconds the report fired.
        time_fs: u64,
        /// The report message.
        message: String,
    },

    /// A runtime fault originating in compiled code.
    #[error("{kind} at {loc}")]
    Fault {
        /// What went wrong.
        kind: FaultKind,
        /// Source position of the offending statement.
        loc: SourceLoc,
    },

    /// The static value arena is exhausted.
    #[error(
        "simulation heap exhausted ({requested} bytes requested, {limit} byte limit); \
         increase the configured heap limit"
    )]
    OutOfMemory {
        /// The allocation that failed, in bytes.
        requested: usize,
        /// The configured heap limit, in bytes.
        limit: usize,
    },

    /// Too many consecutive delta cycles at one time step, indicating an
    /// unstable feedback loop. `active` enumerates the processes and
    /// drivers still queued when the ceiling was hit.
    #[error("delta cycle limit exceeded at {fs} fs (max {limit} deltas); still active: {}", active.join(", "))]
    DeltaCycleLimit {
        /// The time in femtoseconds where the limit was hit.
        fs: u64,
        /// The configured ceiling.
        limit: u32,
        /// Names of processes and driven signals still producing work.
        active: Vec<String>,
    },

    /// The run was interrupted externally via the stop flag.
    #[error("interrupted{}", match active_process {
        Some(p) => format!(" while running process {p}"),
        None => String::new(),
    })]
    Interrupted {
        /// The process that was active when the interrupt was observed.
        active_process: Option<String>,
    },

    /// A kernel entry point was called with an element range outside the
    /// target signal.
    #[error("range {offset}+{count} out of bounds for signal {signal} ({width} elements)")]
    RangeOutOfBounds {
        /// The hierarchical name of the signal.
        signal: String,
        /// First element of the requested range.
        offset: u32,
        /// Number of elements requested.
        count: u32,
        /// The signal's element count.
        width: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_sources_display() {
        let e = RtError::MultipleSources {
            signal: "top.u1.d".into(),
        };
        assert_eq!(
            e.to_string(),
            "signal top.u1.d has multiple sources but no resolution function"
        );
    }

    #[test]
    fn severity_abort_display() {
        let e = RtError::SeverityAbort {
            severity: Severity::Failure,
            time_fs: 5_000_000,
            message: "checksum mismatch".into(),
        };
        assert_eq!(e.to_string(), "failure at 5000000 fs: checksum mismatch");
    }

    #[test]
    fn fault_display() {
        let e = RtError::Fault {
            kind: FaultKind::DivisionByZero,
            loc: SourceLoc::new("alu.vhd", 88),
        };
        assert_eq!(e.to_string(), "division by zero at alu.vhd:88");
    }

    #[test]
    fn out_of_memory_mentions_limit() {
        let e = RtError::OutOfMemory {
            requested: 4096,
            limit: 1024,
        };
        let msg = e.to_string();
        assert!(msg.contains("4096"));
        assert!(msg.contains("increase the configured heap limit"));
    }

    #[test]
    fn delta_limit_enumerates_active() {
        let e = RtError::DeltaCycleLimit {
            fs: 100,
            limit: 1000,
            active: vec!["process p1".into(), "driver of top.q".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("max 1000 deltas"));
        assert!(msg.contains("process p1"));
        assert!(msg.contains("driver of top.q"));
    }

    #[test]
    fn interrupted_with_and_without_process() {
        let e = RtError::Interrupted {
            active_process: Some("tb.stim".into()),
        };
        assert_eq!(e.to_string(), "interrupted while running process tb.stim");
        let e = RtError::Interrupted {
            active_process: None,
        };
        assert_eq!(e.to_string(), "interrupted");
    }

    #[test]
    fn fault_kind_display() {
        assert_eq!(FaultKind::IndexOutOfBounds.to_string(), "index out of bounds");
        assert_eq!(FaultKind::NullAccess.to_string(), "null access dereferenced");
        assert_eq!(FaultKind::RangeError.to_string(), "value out of range");
        assert_eq!(FaultKind::Overflow.to_string(), "arithmetic overflow");
    }
}
