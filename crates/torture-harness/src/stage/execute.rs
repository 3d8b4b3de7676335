//! Execute built artifacts through a runner.
//!
//! The command shape depends on what kind of runner hosts the artifact. The
//! kind is named explicitly in configuration and resolved once against a
//! [`RunnerRegistry`] when the stage is built.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{suffixed_name, Command, Stage, Tool};
use crate::error::{HarnessError, HarnessResult};
use crate::unit::TestUnit;

/// Runner families with distinct command shapes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RunnerKind {
    /// Sandboxed interpreter: `runner --entry=main <file> [-o <out>]`.
    Interpreter,
    /// Script host: `runner [flags] <support…> -- <file> [data…]`.
    ScriptEngine,
    /// Plain wrapper: `runner [flags] <file>`.
    Direct,
    /// Registered by the embedding application.
    Custom(String),
}

impl RunnerKind {
    pub fn as_str(&self) -> &str {
        match self {
            RunnerKind::Interpreter => "interpreter",
            RunnerKind::ScriptEngine => "script_engine",
            RunnerKind::Direct => "direct",
            RunnerKind::Custom(name) => name,
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunnerKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(HarnessError::InvalidConfig("empty runner kind".to_string()));
        }
        Ok(match s {
            "interpreter" => RunnerKind::Interpreter,
            "script_engine" => RunnerKind::ScriptEngine,
            "direct" => RunnerKind::Direct,
            other => RunnerKind::Custom(other.to_string()),
        })
    }
}

impl TryFrom<String> for RunnerKind {
    type Error = HarnessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RunnerKind> for String {
    fn from(kind: RunnerKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Execution stage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteConfig {
    pub runner: PathBuf,
    pub kind: RunnerKind,
    /// Flags placed right after the runner executable.
    #[serde(default)]
    pub runner_flags: Vec<String>,
    /// Polyfills or harness scripts loaded before the artifact.
    #[serde(default)]
    pub support_files: Vec<PathBuf>,
    /// Auxiliary data passed after the artifact.
    #[serde(default)]
    pub data_files: Vec<PathBuf>,
    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,
}

fn default_output_suffix() -> String {
    ".out".to_string()
}

impl ExecuteConfig {
    pub fn new(runner: impl Into<PathBuf>, kind: RunnerKind) -> Self {
        Self {
            runner: runner.into(),
            kind,
            runner_flags: Vec::new(),
            support_files: Vec::new(),
            data_files: Vec::new(),
            output_suffix: default_output_suffix(),
        }
    }
}

/// Builds the command for one runner kind.
pub trait RunnerStrategy: Send + Sync {
    fn command(&self, config: &ExecuteConfig, input: &Path, output: Option<&Path>) -> Command;
}

struct InterpreterStrategy;

impl RunnerStrategy for InterpreterStrategy {
    fn command(&self, config: &ExecuteConfig, input: &Path, output: Option<&Path>) -> Command {
        let mut cmd = Command::new(&config.runner)
            .args(&config.runner_flags)
            .arg("--entry=main")
            .arg(input);
        if let Some(output) = output {
            cmd = cmd.arg("-o").arg(output);
        }
        cmd
    }
}

struct ScriptEngineStrategy;

impl RunnerStrategy for ScriptEngineStrategy {
    fn command(&self, config: &ExecuteConfig, input: &Path, _output: Option<&Path>) -> Command {
        Command::new(&config.runner)
            .args(&config.runner_flags)
            .args(&config.support_files)
            .arg("--")
            .arg(input)
            .args(&config.data_files)
    }
}

struct DirectStrategy;

impl RunnerStrategy for DirectStrategy {
    fn command(&self, config: &ExecuteConfig, input: &Path, _output: Option<&Path>) -> Command {
        Command::new(&config.runner)
            .args(&config.runner_flags)
            .arg(input)
    }
}

/// Explicit runner kind → command strategy map.
#[derive(Clone, Default)]
pub struct RunnerRegistry {
    strategies: HashMap<RunnerKind, Arc<dyn RunnerStrategy>>,
}

impl fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.strategies.keys().map(RunnerKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("RunnerRegistry").field("kinds", &kinds).finish()
    }
}

impl RunnerRegistry {
    /// Registry holding the interpreter, script-engine and direct shapes.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register(RunnerKind::Interpreter, Arc::new(InterpreterStrategy));
        registry.register(RunnerKind::ScriptEngine, Arc::new(ScriptEngineStrategy));
        registry.register(RunnerKind::Direct, Arc::new(DirectStrategy));
        registry
    }

    /// Add or replace the strategy for `kind`.
    pub fn register(&mut self, kind: RunnerKind, strategy: Arc<dyn RunnerStrategy>) {
        self.strategies.insert(kind, strategy);
    }

    pub fn resolve(&self, kind: &RunnerKind) -> HarnessResult<Arc<dyn RunnerStrategy>> {
        self.strategies
            .get(kind)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownRunner(kind.to_string()))
    }
}

/// Execute stage adapter.
pub struct ExecuteStage {
    name: String,
    config: ExecuteConfig,
    strategy: Arc<dyn RunnerStrategy>,
}

impl fmt::Debug for ExecuteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteStage")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

impl ExecuteStage {
    pub fn new(
        name: impl Into<String>,
        config: ExecuteConfig,
        registry: &RunnerRegistry,
    ) -> HarnessResult<Self> {
        let strategy = registry.resolve(&config.kind)?;
        Ok(Self {
            name: name.into(),
            config,
            strategy,
        })
    }

    pub fn config(&self) -> &ExecuteConfig {
        &self.config
    }
}

impl Stage for ExecuteStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<Tool> {
        let mut tools = vec![Tool::new("runner", &self.config.runner)];
        tools.extend(
            self.config
                .support_files
                .iter()
                .chain(&self.config.data_files)
                .map(|p| Tool::file("runner support file", p)),
        );
        tools
    }

    fn requires_output(&self) -> bool {
        false
    }

    fn output_path(&self, outdir: &Path, unit: &TestUnit) -> PathBuf {
        outdir.join(suffixed_name(unit.path(), &self.config.output_suffix))
    }

    fn command(&self, unit: &TestUnit, output: Option<&Path>) -> Command {
        self.strategy.command(&self.config, unit.path(), output)
    }
}
