//! Diagnostics accumulated during a compile invocation.
//!
//! Every graph element carries a [`SourceLocation`] so tooling can point back
//! into the flow source. Diagnostics are append-only within one compile:
//! analysis never throws for user-code problems, it records them here and
//! keeps going on siblings.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Position of a graph element or diagnostic in flow source.
///
/// Line and column are 1-based, matching editor conventions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Diagnostic severity. Only `Error` fails a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// A single diagnostic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub location: SourceLocation,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn error(location: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            location,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(location: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            location,
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn info(location: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            location,
            severity: Severity::Info,
            message: message.into(),
        }
    }

    /// Render in the driver's `<path>:<line>:<col> - <message>` form,
    /// with the path made relative to `base` when possible.
    pub fn display_relative_to(&self, base: &Path) -> String {
        let path = Path::new(&self.location.file)
            .strip_prefix(base)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| self.location.file.clone());
        format!(
            "{}:{}:{} - {}",
            path, self.location.line, self.location.column, self.message
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.location, self.message)
    }
}

/// Ordered, append-only diagnostic sink for one compile invocation.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    records: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.records.push(diagnostic);
    }

    pub fn error(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.push(Diagnostic::error(location, message));
    }

    pub fn warning(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.push(Diagnostic::warning(location, message));
    }

    pub fn info(&mut self, location: SourceLocation, message: impl Into<String>) {
        self.push(Diagnostic::info(location, message));
    }

    /// Move all records out of `other`, preserving order.
    pub fn extend(&mut self, other: Diagnostics) {
        self.records.extend(other.records);
    }

    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Diagnostic> {
        self.records
    }

    pub fn has_errors(&self) -> bool {
        self.records
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.records
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.records
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: u32, col: u32) -> SourceLocation {
        SourceLocation::new("src/index.ts", line, col)
    }

    #[test]
    fn display_uses_one_based_positions() {
        let d = Diagnostic::error(loc(3, 7), "unsupported syntax");
        assert_eq!(d.to_string(), "src/index.ts:3:7 - unsupported syntax");
    }

    #[test]
    fn display_relative_strips_base() {
        let d = Diagnostic::warning(
            SourceLocation::new("/proj/src/index.ts", 1, 1),
            "unused flow",
        );
        assert_eq!(
            d.display_relative_to(Path::new("/proj")),
            "src/index.ts:1:1 - unused flow"
        );
    }

    #[test]
    fn display_relative_keeps_foreign_paths() {
        let d = Diagnostic::info(SourceLocation::new("/elsewhere/a.ts", 2, 2), "note");
        assert_eq!(
            d.display_relative_to(Path::new("/proj")),
            "/elsewhere/a.ts:2:2 - note"
        );
    }

    #[test]
    fn sink_counts_by_severity() {
        let mut sink = Diagnostics::new();
        sink.error(loc(1, 1), "bad");
        sink.warning(loc(2, 1), "meh");
        sink.warning(loc(3, 1), "meh again");
        sink.info(loc(4, 1), "fyi");

        assert!(sink.has_errors());
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.warning_count(), 2);
        assert_eq!(sink.len(), 4);
    }

    #[test]
    fn sink_preserves_order_across_extend() {
        let mut a = Diagnostics::new();
        a.error(loc(1, 1), "first");
        let mut b = Diagnostics::new();
        b.warning(loc(2, 1), "second");
        a.extend(b);

        let messages: Vec<&str> = a.records().iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[test]
    fn severity_serializes_lowercase() {
        let json = serde_json::to_value(Severity::Warning).unwrap();
        assert_eq!(json, serde_json::json!("warning"));
    }
}
