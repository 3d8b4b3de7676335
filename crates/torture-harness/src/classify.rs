//! Outcome classification against the known-failure manifest.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::unit::{ExecutionResult, UnitStatus};

/// Final verdict for one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    ExpectedPass,
    ExpectedFail,
    /// Listed as failing but passed: the manifest is stale.
    UnexpectedPass,
    UnexpectedFail,
    /// Never run.
    Excluded,
}

impl Classification {
    pub const ALL: [Classification; 5] = [
        Classification::ExpectedPass,
        Classification::ExpectedFail,
        Classification::UnexpectedPass,
        Classification::UnexpectedFail,
        Classification::Excluded,
    ];

    pub fn is_unexpected(&self) -> bool {
        matches!(
            self,
            Classification::UnexpectedPass | Classification::UnexpectedFail
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Classification::ExpectedPass => "expected pass",
            Classification::ExpectedFail => "expected fail",
            Classification::UnexpectedPass => "unexpected pass",
            Classification::UnexpectedFail => "unexpected fail",
            Classification::Excluded => "excluded",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a result given whether the manifest lists the unit as failing.
///
/// A timeout is always an unexpected failure, whatever the manifest says.
pub fn classify(result: &ExecutionResult, known_failing: bool) -> Classification {
    match (&result.status, known_failing) {
        (UnitStatus::TimedOut { .. }, _) => Classification::UnexpectedFail,
        (UnitStatus::Passed, false) => Classification::ExpectedPass,
        (UnitStatus::Passed, true) => Classification::UnexpectedPass,
        (_, true) => Classification::ExpectedFail,
        (_, false) => Classification::UnexpectedFail,
    }
}

/// Short human-readable reason for an unexpected classification.
pub fn reason(result: &ExecutionResult, classification: Classification) -> String {
    match (&result.status, classification) {
        (_, Classification::UnexpectedPass) => {
            "passed but is listed in a known-failure manifest".to_string()
        }
        (UnitStatus::Failed { exit_code: Some(code) }, _) => format!("exited with code {}", code),
        (UnitStatus::Failed { exit_code: None }, _) => {
            "did not exit normally (signal or launch failure)".to_string()
        }
        (UnitStatus::TimedOut { limit_ms }, _) => format!("timed out after {} ms", limit_ms),
        (UnitStatus::Crashed { reason }, _) => format!("crashed: {}", reason),
        (UnitStatus::Passed, _) => "passed".to_string(),
    }
}
