//! Torture-test execution harness.
//!
//! Runs large suites of independent test inputs through compile, assemble,
//! link and execute stages in parallel, then compares every outcome with
//! known-failure manifests. The number that matters is the count of
//! unexpected results: zero means the suite is green.

pub mod cancel;
pub mod classify;
pub mod config;
pub mod error;
pub mod harness;
pub mod inputs;
pub mod manifest;
pub mod obs;
pub mod pattern;
pub mod pipeline;
pub mod pool;
pub mod report;
pub mod runner;
pub mod stage;
pub mod telemetry;
pub mod unit;

pub use cancel::CancelSignal;
pub use classify::{classify, Classification};
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult};
pub use harness::{execute, run, HarnessRequest, Tester};
pub use inputs::{apply_filter, expand_glob, find_runnable_tests, InputSet};
pub use manifest::{ExclusionList, Manifest, ManifestEntry};
pub use pipeline::{PipelinePlan, PipelineResult, PipelineStep, StepOutcome, TorturePipeline};
pub use pool::{FnJob, PoolOutput, UnitJob, WorkerPool};
pub use report::{AggregateReport, UnexpectedUnit};
pub use stage::{
    AssembleConfig, AssembleStage, Command, CompileConfig, CompileFlavor, CompileStage,
    ExecuteConfig, ExecuteStage, LinkConfig, LinkStage, RunnerKind, RunnerRegistry,
    RunnerStrategy, Stage, StageSpec, Tool, TortureCompileConfig,
};
pub use telemetry::init_tracing;
pub use unit::{ExecutionResult, TestUnit, UnitStatus};
