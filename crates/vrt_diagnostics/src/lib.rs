//! Runtime diagnostic model for the VRT simulation runtime.
//!
//! Every recoverable and fatal condition the kernel raises flows through one
//! structured [`Diagnostic`] type collected by a thread-safe
//! [`DiagnosticSink`]. Severities follow the VHDL report severity levels
//! rather than compiler severities: `assert`/`report` statements in simulated
//! code carry one of the four LRM levels, and the sink decides which level is
//! fatal for the run.

#![warn(missing_docs)]

pub mod diagnostic;
pub mod severity;
pub mod sink;

pub use diagnostic::Diagnostic;
pub use severity::Severity;
pub use sink::DiagnosticSink;
