//! Torture-test harness CLI
//!
//! The `torture` command runs one stage of a torture suite (or a whole
//! pipeline) and exits with the number of unexpected results.
//!
//! ## Commands
//!
//! - `compile`: Compile torture sources for a clang or emscripten target
//! - `assemble`: Assemble textual IR into binary modules
//! - `link`: Link or convert modules
//! - `execute`: Run artifacts under a runner
//! - `pipeline`: Run the steps of a TOML pipeline plan in order

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Level};

use torture_harness::{
    AggregateReport, AssembleConfig, CancelSignal, CompileFlavor, ExecuteConfig, HarnessConfig,
    HarnessRequest, InputSet, LinkConfig, PipelinePlan, PipelineResult, RunnerKind,
    RunnerRegistry, StageSpec, Tester, TortureCompileConfig, TorturePipeline,
};

/// Exit status when the run was interrupted.
const EXIT_INTERRUPTED: u8 = 130;
/// Highest exit status used for an unexpected-result count.
const EXIT_MAX_COUNT: usize = 125;

#[derive(Parser)]
#[command(name = "torture")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Differential torture-test harness", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML file with a [harness] table
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Worker count (default: one per logical core)
    #[arg(short, long, global = true, env = "TORTURE_JOBS")]
    jobs: Option<usize>,

    /// Per-unit time limit in seconds (0 = unlimited)
    #[arg(long, global = true, env = "TORTURE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile torture sources
    Compile {
        #[arg(long, value_parser = parse_flavor, default_value = "clang")]
        flavor: CompileFlavor,

        /// C compiler
        #[arg(long)]
        cc: PathBuf,

        /// C++ compiler
        #[arg(long)]
        cxx: PathBuf,

        /// Sysroot for the clang flavor
        #[arg(long)]
        sysroot: Option<PathBuf>,

        /// Pre-js shim for the emscripten flavor
        #[arg(long)]
        pre_js: Option<PathBuf>,

        /// Optimization level without the dash
        #[arg(long, default_value = "O2")]
        opt: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Assemble textual IR into binary modules
    Assemble {
        #[arg(long)]
        assembler: PathBuf,

        /// Extra flag passed to the assembler (repeatable)
        #[arg(long = "flag", allow_hyphen_values = true)]
        flags: Vec<String>,

        /// Output file extension
        #[arg(long, default_value = ".wasm")]
        extension: String,

        /// The assembler ignores -o and writes into its working directory
        #[arg(long)]
        writes_in_place: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Link or convert modules
    Link {
        #[arg(long)]
        linker: PathBuf,

        /// Extra flag passed to the linker (repeatable)
        #[arg(long = "flag", allow_hyphen_values = true)]
        flags: Vec<String>,

        /// Output file extension
        #[arg(long, default_value = ".wast")]
        extension: String,

        /// The linker ignores -o and writes into its working directory
        #[arg(long)]
        writes_in_place: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Run artifacts under a runner
    Execute {
        #[arg(long)]
        runner: PathBuf,

        /// interpreter, script_engine, direct, or a registered custom kind
        #[arg(long, default_value = "direct")]
        kind: RunnerKind,

        /// Flag placed right after the runner (repeatable)
        #[arg(long = "runner-flag", allow_hyphen_values = true)]
        runner_flags: Vec<String>,

        /// Support file loaded before the artifact (repeatable)
        #[arg(long = "support")]
        support_files: Vec<PathBuf>,

        /// Data file passed after the artifact (repeatable)
        #[arg(long = "data")]
        data_files: Vec<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Run a multi-step pipeline plan
    Pipeline {
        /// TOML plan with [[step]] tables
        #[arg(long)]
        plan: PathBuf,

        /// Write the pipeline result as JSON to this file
        #[arg(long)]
        report_json: Option<PathBuf>,
    },
}

/// Inputs and manifests shared by the single-stage commands.
#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Input glob; wildcards allowed in the file name only
    #[arg(short, long)]
    input: String,

    /// Treat the input glob as a dg testsuite root and keep only runnable tests
    #[arg(long)]
    runnable: bool,

    /// Known-failure manifest (repeatable)
    #[arg(long)]
    fails: Vec<PathBuf>,

    /// Exclusion list; matching units are never run (repeatable)
    #[arg(long)]
    exclude: Vec<PathBuf>,

    /// Run attribute used to match manifest qualifiers (repeatable)
    #[arg(long = "attr")]
    attributes: Vec<String>,

    /// Only run inputs whose file name matches this wildcard
    #[arg(long)]
    filter: Option<String>,

    /// Output directory (must exist)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Write the aggregate report as JSON to this file
    #[arg(long)]
    report_json: Option<PathBuf>,
}

impl RunArgs {
    fn input_set(&self) -> InputSet {
        if !self.runnable {
            return InputSet::Glob(self.input.clone());
        }
        let path = Path::new(&self.input);
        match (path.parent(), path.file_name()) {
            (Some(dir), Some(pattern)) if !dir.as_os_str().is_empty() => InputSet::Runnable {
                dir: dir.to_path_buf(),
                pattern: pattern.to_string_lossy().into_owned(),
            },
            _ => InputSet::Runnable {
                dir: PathBuf::from("."),
                pattern: self.input.clone(),
            },
        }
    }

    fn request(&self, implied: Vec<String>) -> HarnessRequest {
        let mut request = HarnessRequest::new(self.input_set())
            .attributes(self.attributes.iter().cloned())
            .attributes(implied);
        request.fails = self.fails.clone();
        request.exclusions = self.exclude.clone();
        request.filter = self.filter.clone();
        request
    }
}

/// Layout of the `--config` file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    harness: HarnessConfig,
}

fn parse_flavor(s: &str) -> std::result::Result<CompileFlavor, String> {
    match s {
        "clang" => Ok(CompileFlavor::Clang),
        "emscripten" => Ok(CompileFlavor::Emscripten),
        other => Err(format!("unknown flavor '{}' (expected clang or emscripten)", other)),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    torture_harness::init_tracing(cli.json, level);

    let cancel = CancelSignal::new();
    spawn_interrupt_handler(cancel.clone());

    match cli.command {
        Commands::Pipeline {
            ref plan,
            ref report_json,
        } => cmd_pipeline(&cli, plan, report_json.as_deref(), cancel).await,
        ref command => {
            let (spec, run) = stage_spec(command)?;
            let config = load_config(&cli, None)?;
            cmd_stage(spec, run, config, cancel).await
        }
    }
}

fn spawn_interrupt_handler(cancel: CancelSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling outstanding units");
            cancel.cancel();
        }
    });
}

/// Base config from `--config` (or `fallback`), then flag overrides.
fn load_config(cli: &Cli, fallback: Option<&HarnessConfig>) -> Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let file: ConfigFile = toml::from_str(&text)
                .with_context(|| format!("Failed to parse config {}", path.display()))?;
            file.harness
        }
        None => fallback.cloned().unwrap_or_default(),
    };
    if let Some(jobs) = cli.jobs {
        config.workers = Some(jobs);
    }
    if let Some(secs) = cli.timeout_secs {
        config.unit_timeout_secs = secs;
    }
    config.validate().context("Invalid harness configuration")?;
    Ok(config)
}

/// Map a single-stage subcommand onto a stage description.
fn stage_spec(command: &Commands) -> Result<(StageSpec, &RunArgs)> {
    Ok(match command {
        Commands::Compile {
            flavor,
            cc,
            cxx,
            sysroot,
            pre_js,
            opt,
            run,
        } => (
            StageSpec::TortureCompile(TortureCompileConfig {
                flavor: *flavor,
                cc: cc.clone(),
                cxx: cxx.clone(),
                sysroot: sysroot.clone(),
                pre_js: pre_js.clone(),
                opt: opt.clone(),
            }),
            run,
        ),
        Commands::Assemble {
            assembler,
            flags,
            extension,
            writes_in_place,
            run,
        } => (
            StageSpec::Assemble(AssembleConfig {
                assembler: assembler.clone(),
                flags: flags.clone(),
                extension: extension.clone(),
                writes_in_place: *writes_in_place,
            }),
            run,
        ),
        Commands::Link {
            linker,
            flags,
            extension,
            writes_in_place,
            run,
        } => (
            StageSpec::Link(LinkConfig {
                linker: linker.clone(),
                flags: flags.clone(),
                extension: extension.clone(),
                writes_in_place: *writes_in_place,
            }),
            run,
        ),
        Commands::Execute {
            runner,
            kind,
            runner_flags,
            support_files,
            data_files,
            run,
        } => {
            let mut config = ExecuteConfig::new(runner.clone(), kind.clone());
            config.runner_flags = runner_flags.clone();
            config.support_files = support_files.clone();
            config.data_files = data_files.clone();
            (StageSpec::Execute(config), run)
        }
        Commands::Pipeline { .. } => anyhow::bail!("pipeline is not a single stage"),
    })
}

fn stage_name(spec: &StageSpec) -> &'static str {
    match spec {
        StageSpec::Compile(_) | StageSpec::TortureCompile(_) => "compile",
        StageSpec::Assemble(_) => "assemble",
        StageSpec::Link(_) => "link",
        StageSpec::Execute(_) => "execute",
    }
}

async fn cmd_stage(
    spec: StageSpec,
    run: &RunArgs,
    config: HarnessConfig,
    cancel: CancelSignal,
) -> Result<ExitCode> {
    let stage = spec
        .build(stage_name(&spec), &RunnerRegistry::with_builtins())
        .context("Failed to configure stage")?;
    let mut tester = Tester::new(stage)
        .with_config(config)
        .with_cancel(cancel.clone());
    tester.outdir = run.out.clone();

    let request = run.request(spec.implied_attributes());
    let report = torture_harness::execute(&tester, &request)
        .await
        .context("Harness setup failed")?;

    if let Some(path) = &run.report_json {
        write_json(path, &report)?;
    }
    Ok(exit_code(report.unexpected_count(), was_cancelled(&report, &cancel)))
}

async fn cmd_pipeline(
    cli: &Cli,
    plan_path: &Path,
    report_json: Option<&Path>,
    cancel: CancelSignal,
) -> Result<ExitCode> {
    let plan = PipelinePlan::from_file(plan_path)
        .with_context(|| format!("Failed to load pipeline plan {}", plan_path.display()))?;
    let config = load_config(cli, Some(&plan.harness))?;

    info!(plan = %plan_path.display(), steps = plan.steps.len(), "Running pipeline");
    let result = TorturePipeline::new().run(&plan, &config, cancel).await;
    print_pipeline(&result);

    if let Some(path) = report_json {
        write_json(path, &result)?;
    }
    if result.cancelled {
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    Ok(exit_code(result.failed_steps, false))
}

fn print_pipeline(result: &PipelineResult) {
    println!();
    println!("Pipeline {}", result.run_id);
    for step in &result.steps {
        let status = if step.failed() { "✗" } else { "✓" };
        match (&step.report, &step.error) {
            (_, Some(error)) => println!("  {} {}: {}", status, step.name, error),
            (Some(report), None) => {
                let flaky = if step.flaky { " [flaky]" } else { "" };
                println!("  {} {}{}: {}", status, step.name, flaky, report.summary_line());
            }
            (None, None) => println!("  {} {}", status, step.name),
        }
    }
    println!(
        "Status: {} ({} failed step(s), {}ms)",
        if result.success() { "✓ PASSED" } else { "✗ FAILED" },
        result.failed_steps,
        result.duration_ms
    );
}

fn was_cancelled(report: &AggregateReport, cancel: &CancelSignal) -> bool {
    report.cancelled > 0 || cancel.is_cancelled()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn exit_code(count: usize, cancelled: bool) -> ExitCode {
    ExitCode::from(exit_status(count, cancelled))
}

/// Zero when green, otherwise the count clamped into the usable range.
fn exit_status(count: usize, cancelled: bool) -> u8 {
    if cancelled {
        return EXIT_INTERRUPTED;
    }
    count.min(EXIT_MAX_COUNT) as u8
}
