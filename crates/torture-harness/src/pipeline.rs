//! Multi-step torture pipelines: compile, then assemble, then link, then
//! execute, each step feeding the next through its output directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::harness::{self, HarnessRequest, Tester};
use crate::inputs::InputSet;
use crate::obs;
use crate::report::AggregateReport;
use crate::stage::{RunnerRegistry, StageSpec};

/// One harness run inside a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub name: String,
    pub stage: StageSpec,
    pub inputs: InputSet,
    #[serde(default)]
    pub fails: Vec<PathBuf>,
    #[serde(default)]
    pub exclusions: Vec<PathBuf>,
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub filter: Option<String>,
    /// Recreated empty before the step runs.
    #[serde(default)]
    pub out: Option<PathBuf>,
    /// Unexpected results are reported but do not fail the pipeline.
    #[serde(default)]
    pub flaky: bool,
}

/// An ordered list of steps, usually loaded from TOML.
///
/// ```toml
/// [harness]
/// workers = 8
///
/// [[step]]
/// name = "compile"
/// out = "out/torture-o"
/// inputs = { glob = "gcc/testsuite/gcc.c-torture/execute/*.c" }
/// fails = ["known_gcc_test_failures.txt"]
/// [step.stage]
/// type = "torture_compile"
/// flavor = "clang"
/// cc = "/usr/bin/clang"
/// cxx = "/usr/bin/clang++"
/// sysroot = "/opt/sysroot"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelinePlan {
    #[serde(default)]
    pub harness: HarnessConfig,
    #[serde(default, rename = "step")]
    pub steps: Vec<PipelineStep>,
}

impl PipelinePlan {
    pub fn from_toml_str(text: &str) -> HarnessResult<Self> {
        let plan: PipelinePlan = toml::from_str(text)
            .map_err(|e| HarnessError::InvalidConfig(format!("pipeline plan: {}", e)))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Step names must be non-empty and unique.
    pub fn validate(&self) -> HarnessResult<()> {
        self.harness.validate()?;
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(HarnessError::InvalidConfig(
                    "pipeline step with empty name".to_string(),
                ));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(HarnessError::InvalidConfig(format!(
                    "duplicate pipeline step '{}'",
                    step.name
                )));
            }
        }
        Ok(())
    }
}

/// What happened to one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub name: String,
    pub flaky: bool,
    /// Present when the step ran.
    pub report: Option<AggregateReport>,
    /// Setup error that kept the step from running.
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn unexpected(&self) -> usize {
        self.report
            .as_ref()
            .map(AggregateReport::unexpected_count)
            .unwrap_or(0)
    }

    /// Setup errors always fail a step; unexpected results only fail a
    /// step that is not flaky.
    pub fn failed(&self) -> bool {
        self.error.is_some() || (!self.flaky && self.unexpected() > 0)
    }
}

/// Result of a complete pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub steps: Vec<StepOutcome>,
    pub failed_steps: usize,
    /// Set when cancellation stopped the pipeline early.
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn success(&self) -> bool {
        self.failed_steps == 0 && !self.cancelled
    }

    pub fn unexpected_total(&self) -> usize {
        self.steps.iter().map(StepOutcome::unexpected).sum()
    }
}

/// Pipeline orchestrator.
pub struct TorturePipeline {
    registry: RunnerRegistry,
}

impl Default for TorturePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl TorturePipeline {
    pub fn new() -> Self {
        Self {
            registry: RunnerRegistry::with_builtins(),
        }
    }

    /// Use a registry that knows additional runner kinds.
    pub fn with_registry(registry: RunnerRegistry) -> Self {
        Self { registry }
    }

    /// Run every step in order. A step that cannot start is counted as
    /// failed and the pipeline moves on to the next one.
    pub async fn run(
        &self,
        plan: &PipelinePlan,
        config: &HarnessConfig,
        cancel: CancelSignal,
    ) -> PipelineResult {
        let start = Instant::now();
        let run_id = Uuid::new_v4();
        info!(run_id = %run_id, steps = plan.steps.len(), "Starting torture pipeline");

        let mut steps = Vec::with_capacity(plan.steps.len());
        let mut cancelled = false;
        for step in &plan.steps {
            if cancel.is_cancelled() {
                cancelled = true;
                info!(step = %step.name, "Pipeline cancelled; skipping remaining steps");
                break;
            }

            info!(step = %step.name, "Running step");
            let outcome = match self.run_step(step, config, &cancel).await {
                Ok(report) => StepOutcome {
                    name: step.name.clone(),
                    flaky: step.flaky,
                    report: Some(report),
                    error: None,
                },
                Err(e) => {
                    warn!(step = %step.name, error = %e, "Step could not run");
                    StepOutcome {
                        name: step.name.clone(),
                        flaky: step.flaky,
                        report: None,
                        error: Some(e.to_string()),
                    }
                }
            };

            if step.flaky && outcome.error.is_none() && outcome.unexpected() > 0 {
                warn!(
                    step = %step.name,
                    unexpected = outcome.unexpected(),
                    "Flaky step had unexpected results; not counted as a failure"
                );
            }
            obs::emit_step_finished(&step.name, outcome.unexpected(), step.flaky, outcome.failed());
            if outcome.report.as_ref().is_some_and(|r| r.cancelled > 0) {
                cancelled = true;
            }
            steps.push(outcome);
        }

        let failed_steps = steps.iter().filter(|s| s.failed()).count();
        let duration_ms = start.elapsed().as_millis() as u64;
        if failed_steps == 0 && !cancelled {
            info!(run_id = %run_id, "Torture pipeline completed successfully");
        } else {
            info!(run_id = %run_id, failed_steps, cancelled, "Torture pipeline failed");
        }

        PipelineResult {
            run_id,
            steps,
            failed_steps,
            cancelled,
            duration_ms,
        }
    }

    async fn run_step(
        &self,
        step: &PipelineStep,
        config: &HarnessConfig,
        cancel: &CancelSignal,
    ) -> HarnessResult<AggregateReport> {
        let stage = step.stage.build(&step.name, &self.registry)?;
        if let Some(out) = &step.out {
            recreate_dir(out)?;
        }

        let mut tester = Tester::new(stage)
            .with_config(config.clone())
            .with_cancel(cancel.clone());
        tester.outdir = step.out.clone();

        let mut request = HarnessRequest::new(step.inputs.clone())
            .attributes(step.attributes.iter().cloned())
            .attributes(step.stage.implied_attributes());
        request.fails = step.fails.clone();
        request.exclusions = step.exclusions.clone();
        request.filter = step.filter.clone();

        harness::execute(&tester, &request).await
    }
}

fn recreate_dir(dir: &Path) -> HarnessResult<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}
