//! Test units and per-unit execution results.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One test input plus the attribute tags of the run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestUnit {
    path: PathBuf,
    attributes: Arc<[String]>,
}

impl TestUnit {
    /// Create a unit with its own attribute list.
    pub fn new(path: impl Into<PathBuf>, attributes: &[String]) -> Self {
        Self::with_shared(path, normalize_attributes(attributes))
    }

    /// Create a unit sharing an already-normalized attribute list.
    pub fn with_shared(path: impl Into<PathBuf>, attributes: Arc<[String]>) -> Self {
        Self {
            path: path.into(),
            attributes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name used for manifest matching.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }
}

/// De-duplicate tags keeping first-seen order; empty tags are dropped.
pub fn normalize_attributes(attributes: &[String]) -> Arc<[String]> {
    let mut out: Vec<String> = Vec::with_capacity(attributes.len());
    for attr in attributes {
        let attr = attr.trim();
        if !attr.is_empty() && !out.iter().any(|a| a == attr) {
            out.push(attr.to_string());
        }
    }
    out.into()
}

/// How a unit's command ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum UnitStatus {
    Passed,

    /// Exited non-zero, was killed by a signal, or could not be launched.
    Failed { exit_code: Option<i32> },

    /// Exceeded the per-unit time limit and was killed.
    TimedOut { limit_ms: u64 },

    /// The per-unit task itself panicked.
    Crashed { reason: String },
}

impl UnitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitStatus::Passed)
    }
}

/// Result of running one unit.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub unit: TestUnit,
    pub status: UnitStatus,

    /// Captured stdout followed by stderr.
    pub output: String,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    /// Rendered command line, empty when no command was launched.
    pub command_line: String,
}

impl ExecutionResult {
    pub fn passed(&self) -> bool {
        self.status.is_success()
    }

    /// Result for a unit whose task panicked before producing anything.
    pub fn crashed(unit: TestUnit, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            unit,
            output: reason.clone(),
            status: UnitStatus::Crashed { reason },
            duration_ms: 0,
            command_line: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_name_is_file_name() {
        let unit = TestUnit::new("suite/execute/20000112-1.c", &[]);
        assert_eq!(unit.name(), "20000112-1.c");
    }

    #[test]
    fn test_attributes_deduplicated_in_order() {
        let attrs = normalize_attributes(&[
            "O2".to_string(),
            "bare".to_string(),
            "O2".to_string(),
            " ".to_string(),
        ]);
        assert_eq!(&*attrs, &["O2".to_string(), "bare".to_string()]);
    }

    #[test]
    fn test_crashed_result_is_failure() {
        let unit = TestUnit::new("x.c", &[]);
        let result = ExecutionResult::crashed(unit, "worker panicked");
        assert!(!result.passed());
        assert_eq!(
            result.status,
            UnitStatus::Crashed {
                reason: "worker panicked".to_string()
            }
        );
    }
}
