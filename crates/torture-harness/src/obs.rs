//! Structured observability hooks for harness runs.
//!
//! Events are emitted at `info!` level (warnings for unexpected results).
//! Filter with `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

use crate::report::{AggregateReport, UnexpectedUnit};

/// Run-scoped span tagged with the run id and stage.
///
/// ```ignore
/// let span = RunSpan::new("3f1c…", "compile");
/// pool.map(job, units).instrument(span.span()).await;
/// ```
pub struct RunSpan {
    span: tracing::Span,
}

impl RunSpan {
    pub fn new(run_id: &str, stage: &str) -> Self {
        Self {
            span: tracing::info_span!("torture.run", run_id = %run_id, stage = %stage),
        }
    }

    /// Handle for `Instrument::instrument` on async work.
    pub fn span(&self) -> tracing::Span {
        self.span.clone()
    }

    /// Enter the span on the current thread until the guard drops.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Emit event: run started.
pub fn emit_run_started(stage: &str, units: usize, excluded: usize, workers: usize) {
    info!(
        event = "run.started",
        stage = %stage,
        units = units,
        excluded = excluded,
        workers = workers,
    );
}

/// Emit event: one unit disagreed with the manifests.
pub fn emit_unit_unexpected(unit: &UnexpectedUnit) {
    warn!(
        event = "unit.unexpected",
        unit = %unit.name,
        classification = %unit.classification,
        reason = %unit.reason,
    );
}

/// Emit event: run finished with its final tally.
pub fn emit_run_finished(report: &AggregateReport) {
    info!(
        event = "run.finished",
        stage = %report.stage,
        total = report.total_inputs,
        unexpected = report.unexpected_count(),
        cancelled = report.cancelled,
        duration_ms = report.duration_ms(),
    );
}

/// Emit event: a pipeline step completed.
pub fn emit_step_finished(step: &str, unexpected: usize, flaky: bool, failed: bool) {
    if failed {
        warn!(event = "pipeline.step_finished", step = %step, unexpected = unexpected, failed = true);
    } else {
        info!(
            event = "pipeline.step_finished",
            step = %step,
            unexpected = unexpected,
            flaky = flaky,
            failed = false,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = RunSpan::new("run-id", "compile");
        let _guard = span.enter();
    }

    #[test]
    fn test_emitters_without_subscriber() {
        let mut report = AggregateReport::new("compile", &[], 0);
        report.finalize();
        emit_run_started("compile", 0, 0, 1);
        emit_run_finished(&report);
        emit_step_finished("compile", 0, false, false);
    }
}
