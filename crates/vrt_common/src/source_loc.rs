//! Source locations for runtime fault attribution.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A file/line position attached to faults raised from compiled code.
///
/// The runtime never sees source text; compiled process bodies pass their
/// static location when reporting bounds, range, or null-access faults so the
/// fatal diagnostic can point back at the offending statement.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct SourceLoc {
    /// Source file name as recorded by the code generator.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
}

impl SourceLoc {
    /// Creates a new location.
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }

    /// A placeholder for faults with no recorded position.
    pub fn unknown() -> Self {
        Self {
            file: "<unknown>".to_string(),
            line: 0,
        }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let loc = SourceLoc::new("adder.vhd", 42);
        assert_eq!(loc.to_string(), "adder.vhd:42");
    }

    #[test]
    fn unknown_display() {
        assert_eq!(SourceLoc::unknown().to_string(), "<unknown>:0");
    }
}
