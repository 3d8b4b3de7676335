//! Pipeline stage adapters.
//!
//! A [`Stage`] turns one [`TestUnit`] into a concrete subprocess
//! [`Command`] and names the artifact that command produces. Stages compose
//! by pointing one stage's input glob at the previous stage's output
//! directory.

pub mod assemble;
pub mod compile;
pub mod execute;
pub mod link;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::unit::TestUnit;

pub use assemble::{AssembleConfig, AssembleStage};
pub use compile::{CompileConfig, CompileFlavor, CompileStage, TortureCompileConfig};
pub use execute::{
    ExecuteConfig, ExecuteStage, RunnerKind, RunnerRegistry, RunnerStrategy,
};
pub use link::{LinkConfig, LinkStage};

/// Rename performed after the command exits successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUp {
    pub from: PathBuf,
    pub to: PathBuf,
}

/// A subprocess invocation derived from a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub follow_up: Option<FollowUp>,
}

impl Command {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            follow_up: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn then_rename(mut self, from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        self.follow_up = Some(FollowUp {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Space-separated command line for logs.
    pub fn render(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A tool a stage depends on, checked before any work is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    pub role: String,
    pub path: PathBuf,
    /// Must carry an execute bit, not just exist.
    pub executable: bool,
}

impl Tool {
    /// A program the stage launches.
    pub fn new(role: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            role: role.into(),
            path: path.into(),
            executable: true,
        }
    }

    /// A file the stage passes to a program.
    pub fn file(role: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            executable: false,
            ..Self::new(role, path)
        }
    }
}

/// Command synthesizer and output namer for one pipeline stage.
pub trait Stage: Send + Sync {
    /// Stage name for logs and reports.
    fn name(&self) -> &str;

    /// Executables and support files that must exist before the run.
    fn tools(&self) -> Vec<Tool>;

    /// Whether the stage cannot run without an output directory.
    fn requires_output(&self) -> bool {
        true
    }

    /// Deterministic artifact path for `unit` inside `outdir`.
    fn output_path(&self, outdir: &Path, unit: &TestUnit) -> PathBuf;

    /// Intermediate file the tool writes inside `outdir` before the
    /// artifact is moved to its output path.
    fn scratch_path(&self, _outdir: &Path, _unit: &TestUnit) -> Option<PathBuf> {
        None
    }

    /// Command that processes `unit`, writing to `output` when given.
    fn command(&self, unit: &TestUnit, output: Option<&Path>) -> Command;
}

/// Fail when any tool is missing, or when a program cannot be executed.
pub fn check_tools(stage: &dyn Stage) -> HarnessResult<()> {
    for tool in stage.tools() {
        if !tool.path.is_file() {
            return Err(HarnessError::ToolNotFound {
                role: tool.role,
                path: tool.path,
            });
        }
        if tool.executable && !is_executable(&tool.path)? {
            return Err(HarnessError::ToolNotExecutable {
                role: tool.role,
                path: tool.path,
            });
        }
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> HarnessResult<bool> {
    use std::os::unix::fs::PermissionsExt;

    Ok(std::fs::metadata(path)?.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> HarnessResult<bool> {
    Ok(true)
}

/// Compute every unit's output path and reject collisions, counting the
/// scratch files of tools that write in place.
pub fn plan_outputs(
    stage: &dyn Stage,
    outdir: &Path,
    units: &[TestUnit],
) -> HarnessResult<Vec<PathBuf>> {
    let mut claimed: HashMap<PathBuf, &Path> = HashMap::with_capacity(units.len());
    let mut outputs = Vec::with_capacity(units.len());
    for unit in units {
        let output = stage.output_path(outdir, unit);
        claim(&mut claimed, output.clone(), unit.path())?;
        if let Some(scratch) = stage.scratch_path(outdir, unit) {
            claim(&mut claimed, scratch, unit.path())?;
        }
        outputs.push(output);
    }
    Ok(outputs)
}

fn claim<'a>(
    claimed: &mut HashMap<PathBuf, &'a Path>,
    path: PathBuf,
    input: &'a Path,
) -> HarnessResult<()> {
    match claimed.entry(path) {
        Entry::Occupied(entry) if *entry.get() != input => Err(HarnessError::OutputCollision {
            first: entry.get().to_path_buf(),
            second: input.to_path_buf(),
            output: entry.key().clone(),
        }),
        Entry::Occupied(_) => Ok(()),
        Entry::Vacant(entry) => {
            entry.insert(input);
            Ok(())
        }
    }
}

/// File name of `path` with `suffix` appended.
pub(crate) fn suffixed_name(path: &Path, suffix: &str) -> OsString {
    let mut name = path
        .file_name()
        .map(OsStr::to_os_string)
        .unwrap_or_else(|| path.as_os_str().to_os_string());
    name.push(suffix);
    name
}

/// `<stem><ext>`: what an in-place tool names its output.
pub(crate) fn in_place_name(input: &Path, ext: &str) -> OsString {
    let mut name = input
        .file_stem()
        .map(OsStr::to_os_string)
        .unwrap_or_default();
    name.push(ext);
    name
}

/// `tool [flags] input -o output`, or for tools that always write
/// `<stem><ext>` into their working directory, run in the output directory
/// and rename the produced file afterwards.
pub(crate) fn single_tool_command(
    tool: &Path,
    flags: &[String],
    input: &Path,
    output: Option<&Path>,
    writes_in_place: Option<&str>,
) -> Command {
    let cmd = Command::new(tool).args(flags);
    let Some(output) = output else {
        return cmd.arg(input);
    };
    match (writes_in_place, output.parent()) {
        (Some(ext), Some(dir)) => {
            let produced = dir.join(in_place_name(input, ext));
            // The tool runs inside `dir`, so the input must not be relative.
            let input = std::path::absolute(input).unwrap_or_else(|_| input.to_path_buf());
            cmd.arg(input).current_dir(dir).then_rename(produced, output)
        }
        _ => cmd.arg(input).arg("-o").arg(output),
    }
}

/// Serializable stage description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageSpec {
    Compile(CompileConfig),
    TortureCompile(TortureCompileConfig),
    Assemble(AssembleConfig),
    Link(LinkConfig),
    Execute(ExecuteConfig),
}

impl StageSpec {
    /// Build the stage, resolving runner kinds against `registry`.
    pub fn build(&self, name: &str, registry: &RunnerRegistry) -> HarnessResult<Arc<dyn Stage>> {
        Ok(match self {
            StageSpec::Compile(cfg) => Arc::new(CompileStage::new(name, cfg.clone())),
            StageSpec::TortureCompile(cfg) => {
                Arc::new(CompileStage::new(name, CompileConfig::torture(cfg)?))
            }
            StageSpec::Assemble(cfg) => Arc::new(AssembleStage::new(name, cfg.clone())),
            StageSpec::Link(cfg) => Arc::new(LinkStage::new(name, cfg.clone())),
            StageSpec::Execute(cfg) => Arc::new(ExecuteStage::new(name, cfg.clone(), registry)?),
        })
    }

    /// Attributes implied by the stage configuration.
    pub fn implied_attributes(&self) -> Vec<String> {
        match self {
            StageSpec::TortureCompile(cfg) => cfg.attributes(),
            _ => Vec::new(),
        }
    }
}
