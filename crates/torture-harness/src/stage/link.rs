//! Link assembled units into loadable modules.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{in_place_name, single_tool_command, suffixed_name, Command, Stage, Tool};
use crate::unit::TestUnit;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub linker: PathBuf,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default)]
    pub writes_in_place: bool,
}

fn default_extension() -> String {
    ".wast".to_string()
}

impl LinkConfig {
    pub fn new(linker: impl Into<PathBuf>) -> Self {
        Self {
            linker: linker.into(),
            flags: Vec::new(),
            extension: default_extension(),
            writes_in_place: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkStage {
    name: String,
    config: LinkConfig,
}

impl LinkStage {
    pub fn new(name: impl Into<String>, config: LinkConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

impl Stage for LinkStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<Tool> {
        vec![Tool::new("linker", &self.config.linker)]
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
            &self.config.linker,
            &self.config.flags,
            unit.path(),
            output,
            self.config
                .writes_in_place
                .then_some(self.config.extension.as_str()),
        )
    }
}
