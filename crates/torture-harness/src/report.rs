//! Aggregated classification report for one run.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::{self, Classification};
use crate::unit::{ExecutionResult, TestUnit};

/// A unit whose outcome disagreed with the manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnexpectedUnit {
    pub name: String,
    pub path: PathBuf,
    pub classification: Classification,
    pub reason: String,
    pub command_line: String,
    pub output: String,
}

/// Classification counts plus diagnostics for unexpected units.
///
/// Folding is commutative and associative: the same set of results yields
/// the same counts regardless of arrival order, and
/// [`finalize`](Self::finalize) sorts the unexpected list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    pub run_id: Uuid,
    pub stage: String,
    pub attributes: Vec<String>,
    pub manifest_digest: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_inputs: usize,
    pub counts: BTreeMap<Classification, usize>,
    /// Units abandoned because the run was cancelled.
    pub cancelled: usize,
    pub unexpected: Vec<UnexpectedUnit>,
    /// Names of units the exclusion lists kept from running.
    #[serde(default)]
    pub excluded: Vec<String>,
}

impl AggregateReport {
    pub fn new(stage: impl Into<String>, attributes: &[String], total_inputs: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            stage: stage.into(),
            attributes: attributes.to_vec(),
            manifest_digest: String::new(),
            started_at: Utc::now(),
            finished_at: None,
            total_inputs,
            counts: Classification::ALL.iter().map(|c| (*c, 0)).collect(),
            cancelled: 0,
            unexpected: Vec::new(),
            excluded: Vec::new(),
        }
    }

    /// Fold one execution result in and return its classification.
    pub fn record(&mut self, result: &ExecutionResult, known_failing: bool) -> Classification {
        let classification = classify::classify(result, known_failing);
        *self.counts.entry(classification).or_insert(0) += 1;
        if classification.is_unexpected() {
            self.unexpected.push(UnexpectedUnit {
                name: result.unit.name(),
                path: result.unit.path().to_path_buf(),
                classification,
                reason: classify::reason(result, classification),
                command_line: result.command_line.clone(),
                output: result.output.clone(),
            });
        }
        classification
    }

    pub fn record_excluded(&mut self, unit: &TestUnit) {
        *self.counts.entry(Classification::Excluded).or_insert(0) += 1;
        self.excluded.push(unit.name());
    }

    pub fn record_cancelled(&mut self, units: usize) {
        self.cancelled += units;
    }

    /// Combine two partial reports over disjoint units.
    pub fn merge(&mut self, other: AggregateReport) {
        self.total_inputs += other.total_inputs;
        for (classification, count) in other.counts {
            *self.counts.entry(classification).or_insert(0) += count;
        }
        self.cancelled += other.cancelled;
        self.unexpected.extend(other.unexpected);
        self.excluded.extend(other.excluded);
        self.started_at = self.started_at.min(other.started_at);
        self.finished_at = match (self.finished_at, other.finished_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    /// Stamp the finish time and order diagnostics deterministically.
    pub fn finalize(&mut self) {
        self.finished_at = Some(Utc::now());
        self.unexpected.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.classification.cmp(&b.classification))
        });
        self.excluded.sort();
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.counts.get(&classification).copied().unwrap_or(0)
    }

    /// Unexpected passes plus unexpected failures; zero means green.
    pub fn unexpected_count(&self) -> usize {
        self.count(Classification::UnexpectedPass) + self.count(Classification::UnexpectedFail)
    }

    pub fn is_green(&self) -> bool {
        self.unexpected_count() == 0
    }

    /// Units with any classification, plus cancelled ones.
    pub fn accounted(&self) -> usize {
        self.counts.values().sum::<usize>() + self.cancelled
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "{}: {} expected pass, {} expected fail, {} unexpected pass, {} unexpected fail, {} excluded",
            self.stage,
            self.count(Classification::ExpectedPass),
            self.count(Classification::ExpectedFail),
            self.count(Classification::UnexpectedPass),
            self.count(Classification::UnexpectedFail),
            self.count(Classification::Excluded),
        );
        if self.cancelled > 0 {
            let _ = write!(line, ", {} cancelled", self.cancelled);
        }
        let _ = write!(line, " ({} total)", self.total_inputs);
        line
    }

    /// Human-readable log of every unexpected unit followed by the summary.
    pub fn render_diagnostics(&self) -> String {
        let mut out = String::new();
        for unit in &self.unexpected {
            match unit.classification {
                Classification::UnexpectedPass => {
                    let _ = writeln!(
                        out,
                        "UNEXPECTED PASS: {} ({}; update the manifest)",
                        unit.name, unit.reason
                    );
                }
                _ => {
                    let _ = writeln!(out, "UNEXPECTED FAIL: {} ({})", unit.name, unit.reason);
                    if !unit.command_line.is_empty() {
                        let _ = writeln!(out, "    command: {}", unit.command_line);
                    }
                    for line in unit.output.lines() {
                        let _ = writeln!(out, "    {}", line);
                    }
                }
            }
        }
        out.push_str(&self.summary_line());
        out.push('\n');
        out
    }
}
