//! Assemble textual IR into binary modules.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{in_place_name, single_tool_command, suffixed_name, Command, Stage, Tool};
use crate::unit::TestUnit;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembleConfig {
    pub assembler: PathBuf,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Set when the assembler ignores `-o` and writes `<stem><extension>`
    /// into its working directory.
    #[serde(default)]
    pub writes_in_place: bool,
}

fn default_extension() -> String {
    ".wasm".to_string()
}

impl AssembleConfig {
    pub fn new(assembler: impl Into<PathBuf>) -> Self {
        Self {
            assembler: assembler.into(),
            flags: Vec::new(),
            extension: default_extension(),
            writes_in_place: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssembleStage {
    name: String,
    config: AssembleConfig,
}

impl AssembleStage {
    pub fn new(name: impl Into<String>, config: AssembleConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

impl Stage for AssembleStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<Tool> {
        vec![Tool::new("assembler", &self.config.assembler)]
    }

    fn output_path(&self, outdir: &Path, unit: &TestUnit) -> PathBuf {
        outdir.join(suffixed_name(unit.path(), &self.config.extension))
    }

    fn scratch_path(&self, outdir: &Path, unit: &TestUnit) -> Option<PathBuf> {
        self.config
            .writes_in_place
            .then(|| outdir.join(in_place_name(unit.path(), &self.config.extension)))
    }

    fn command(&self, unit: &TestUnit, output: Option<&Path>) -> Command {
        single_tool_command(
            &self.config.assembler,
            &self.config.flags,
            unit.path(),
            output,
            self.config
                .writes_in_place
                .then_some(self.config.extension.as_str()),
        )
    }
}
