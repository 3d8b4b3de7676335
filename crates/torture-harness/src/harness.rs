//! The harness call: run every unit of one stage and tally the outcomes.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn, Instrument};

use crate::cancel::CancelSignal;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::inputs::{self, InputSet};
use crate::manifest::{ExclusionList, Manifest};
use crate::obs::{self, RunSpan};
use crate::pool::{UnitJob, WorkerPool};
use crate::report::AggregateReport;
use crate::runner;
use crate::stage::{self, Stage};
use crate::unit::{normalize_attributes, ExecutionResult, TestUnit};

/// A stage adapter plus where and how to run it.
#[derive(Clone)]
pub struct Tester {
    pub stage: Arc<dyn Stage>,
    pub outdir: Option<PathBuf>,
    pub config: HarnessConfig,
    pub cancel: CancelSignal,
    /// Print the diagnostic log to stdout when the run finishes.
    pub print_diagnostics: bool,
}

impl Tester {
    pub fn new(stage: Arc<dyn Stage>) -> Self {
        Self {
            stage,
            outdir: None,
            config: HarnessConfig::default(),
            cancel: CancelSignal::new(),
            print_diagnostics: true,
        }
    }

    pub fn with_outdir(mut self, outdir: impl Into<PathBuf>) -> Self {
        self.outdir = Some(outdir.into());
        self
    }

    pub fn with_config(mut self, config: HarnessConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.print_diagnostics = false;
        self
    }
}

/// Inputs, manifests and attributes for one run.
#[derive(Debug, Clone)]
pub struct HarnessRequest {
    pub inputs: InputSet,
    /// Known-failure manifests.
    pub fails: Vec<PathBuf>,
    /// Exclusion lists; matching units are never run.
    pub exclusions: Vec<PathBuf>,
    pub attributes: Vec<String>,
    /// Restrict inputs to file names matching this wildcard.
    pub filter: Option<String>,
}

impl HarnessRequest {
    pub fn new(inputs: InputSet) -> Self {
        Self {
            inputs,
            fails: Vec::new(),
            exclusions: Vec::new(),
            attributes: Vec::new(),
            filter: None,
        }
    }

    pub fn fails(mut self, path: impl Into<PathBuf>) -> Self {
        self.fails.push(path.into());
        self
    }

    pub fn exclude(mut self, path: impl Into<PathBuf>) -> Self {
        self.exclusions.push(path.into());
        self
    }

    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.extend(attributes.into_iter().map(Into::into));
        self
    }
}

/// Synthesizes and runs one unit's command inside a worker.
struct StageJob {
    stage: Arc<dyn Stage>,
    outdir: Option<PathBuf>,
    timeout: Option<Duration>,
}

#[async_trait]
impl UnitJob for StageJob {
    async fn run(&self, unit: TestUnit) -> ExecutionResult {
        let output = self
            .outdir
            .as_deref()
            .map(|dir| self.stage.output_path(dir, &unit));
        let command = self.stage.command(&unit, output.as_deref());
        runner::run_command(unit, &command, self.timeout).await
    }
}

/// Run every input through `tester` and return the full report.
///
/// Setup problems (missing tools, unreadable manifests, output collisions)
/// are returned as errors before any unit runs. Per-unit failures only
/// show up in the report.
pub async fn execute(tester: &Tester, request: &HarnessRequest) -> HarnessResult<AggregateReport> {
    tester.config.validate()?;
    let stage = tester.stage.as_ref();
    stage::check_tools(stage)?;
    match &tester.outdir {
        Some(dir) if !dir.is_dir() => return Err(HarnessError::MissingOutputDir(dir.clone())),
        None if stage.requires_output() => {
            return Err(HarnessError::InvalidConfig(format!(
                "stage '{}' needs an output directory",
                stage.name()
            )))
        }
        _ => {}
    }

    let paths = inputs::apply_filter(request.inputs.expand()?, request.filter.as_deref())?;
    if paths.is_empty() {
        return Err(HarnessError::NoInputs(request.inputs.describe()));
    }

    let known = Manifest::load(&request.fails)?;
    let exclusions: ExclusionList = Manifest::load(&request.exclusions)?;
    let attributes = normalize_attributes(&request.attributes);

    let mut report = AggregateReport::new(stage.name(), &attributes, paths.len());
    report.manifest_digest = known.digest();

    let (excluded, units): (Vec<TestUnit>, Vec<TestUnit>) = paths
        .into_iter()
        .map(|p| TestUnit::with_shared(p, attributes.clone()))
        .partition(|u| exclusions.matches(&u.name(), u.attributes()));
    for unit in &excluded {
        debug!(unit = %unit.name(), "Excluded");
        report.record_excluded(unit);
    }

    if let Some(dir) = &tester.outdir {
        stage::plan_outputs(stage, dir, &units)?;
    }

    let span = RunSpan::new(&report.run_id.to_string(), stage.name());
    let pool = WorkerPool::from_config(&tester.config, tester.cancel.clone());
    obs::emit_run_started(stage.name(), units.len(), excluded.len(), pool.workers());

    let job = Arc::new(StageJob {
        stage: tester.stage.clone(),
        outdir: tester.outdir.clone(),
        timeout: tester.config.unit_timeout(),
    });
    let output = pool.map(job, units).instrument(span.span()).await;

    for result in &output.results {
        let known_failing = known.matches(&result.unit.name(), result.unit.attributes());
        report.record(result, known_failing);
    }
    report.record_cancelled(output.cancelled.len());
    report.finalize();
    debug_assert_eq!(report.accounted(), report.total_inputs);

    for unit in &report.unexpected {
        obs::emit_unit_unexpected(unit);
    }
    if tester.print_diagnostics {
        write_diagnostics(&mut std::io::stdout().lock(), &report);
    }
    obs::emit_run_finished(&report);

    Ok(report)
}

/// Write the diagnostic log. A closed or failing stdout is logged and
/// otherwise ignored; the report is still returned.
fn write_diagnostics(out: &mut dyn Write, report: &AggregateReport) -> bool {
    let written = out
        .write_all(report.render_diagnostics().as_bytes())
        .and_then(|()| out.flush());
    match written {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Could not write diagnostics to stdout");
            false
        }
    }
}

/// Like [`execute`] but returns only the unexpected-result count.
pub async fn run(tester: &Tester, request: &HarnessRequest) -> HarnessResult<usize> {
    Ok(execute(tester, request).await?.unexpected_count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{ExecuteConfig, ExecuteStage, RunnerKind, RunnerRegistry};

    fn sh_stage() -> Arc<dyn Stage> {
        Arc::new(
            ExecuteStage::new(
                "execute",
                ExecuteConfig::new("/bin/sh", RunnerKind::Direct),
                &RunnerRegistry::with_builtins(),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_missing_tool_fails_before_running() {
        let stage = Arc::new(
            ExecuteStage::new(
                "execute",
                ExecuteConfig::new("/nonexistent/d8", RunnerKind::ScriptEngine),
                &RunnerRegistry::with_builtins(),
            )
            .unwrap(),
        );
        let tester = Tester::new(stage).quiet();
        let request = HarnessRequest::new(InputSet::Files(vec![PathBuf::from("a.wasm")]));
        let err = execute(&tester, &request).await.unwrap_err();
        assert!(matches!(err, HarnessError::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_no_inputs_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let tester = Tester::new(sh_stage()).quiet();
        let request = HarnessRequest::new(InputSet::Glob(format!(
            "{}/*.sh",
            dir.path().display()
        )));
        let err = execute(&tester, &request).await.unwrap_err();
        assert!(matches!(err, HarnessError::NoInputs(_)));
    }

    #[tokio::test]
    async fn test_missing_outdir_is_error() {
        let tester = Tester::new(sh_stage())
            .with_outdir("/nonexistent/out")
            .quiet();
        let request = HarnessRequest::new(InputSet::Files(vec![PathBuf::from("a.sh")]));
        let err = execute(&tester, &request).await.unwrap_err();
        assert!(matches!(err, HarnessError::MissingOutputDir(_)));
    }

    #[tokio::test]
    async fn test_all_pass_is_green() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            std::fs::write(dir.path().join(format!("t{i}.sh")), "exit 0\n").unwrap();
        }
        let tester = Tester::new(sh_stage()).quiet();
        let request = HarnessRequest::new(InputSet::Glob(format!(
            "{}/*.sh",
            dir.path().display()
        )));
        assert_eq!(run(&tester, &request).await.unwrap(), 0);
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_diagnostics_write_failure_is_not_fatal() {
        let mut report = AggregateReport::new("execute", &[], 1);
        report.record(
            &ExecutionResult::crashed(TestUnit::new("a.sh", &[]), "boom"),
            false,
        );
        report.finalize();

        assert!(!write_diagnostics(&mut ClosedPipe, &report));

        let mut buf = Vec::new();
        assert!(write_diagnostics(&mut buf, &report));
        assert_eq!(String::from_utf8(buf).unwrap(), report.render_diagnostics());
    }
}
