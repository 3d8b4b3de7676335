//! Compile C/C++ sources to objects, assembly, or IR.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{suffixed_name, Command, Stage, Tool};
use crate::error::{HarnessError, HarnessResult};
use crate::unit::TestUnit;

/// Compiler invocation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileConfig {
    pub cc: PathBuf,
    pub cxx: PathBuf,
    #[serde(default)]
    pub cflags: Vec<String>,
    #[serde(default)]
    pub cxxflags: Vec<String>,
    /// Appended to the output file name, e.g. `.o` or `.s`.
    pub suffix: String,
}

/// Target flavor of a torture compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileFlavor {
    /// Object files against a sysroot.
    Clang,
    /// JavaScript output with a pre-js shim.
    Emscripten,
}

impl CompileFlavor {
    pub fn name(&self) -> &'static str {
        match self {
            CompileFlavor::Clang => "clang",
            CompileFlavor::Emscripten => "emscripten",
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            CompileFlavor::Clang => ".o",
            CompileFlavor::Emscripten => ".js",
        }
    }
}

/// Settings for compiling the gcc torture suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TortureCompileConfig {
    pub flavor: CompileFlavor,
    pub cc: PathBuf,
    pub cxx: PathBuf,
    /// Required for [`CompileFlavor::Clang`].
    #[serde(default)]
    pub sysroot: Option<PathBuf>,
    /// Required for [`CompileFlavor::Emscripten`].
    #[serde(default)]
    pub pre_js: Option<PathBuf>,
    /// Optimization level without the dash, e.g. `O2`.
    #[serde(default = "default_opt")]
    pub opt: String,
}

fn default_opt() -> String {
    "O2".to_string()
}

impl TortureCompileConfig {
    /// Attribute tags for manifest matching: flavor and opt level.
    pub fn attributes(&self) -> Vec<String> {
        vec![self.flavor.name().to_string(), self.opt.clone()]
    }
}

impl CompileConfig {
    /// Torture-suite flag set for a flavor and optimization level.
    pub fn torture(cfg: &TortureCompileConfig) -> HarnessResult<Self> {
        let common = vec![
            "-DSTACK_SIZE=524288".to_string(),
            "-w".to_string(),
            "-Wno-implicit-function-declaration".to_string(),
            format!("-{}", cfg.opt),
        ];
        let extra = match cfg.flavor {
            CompileFlavor::Clang => {
                let sysroot = cfg.sysroot.as_ref().ok_or_else(|| {
                    HarnessError::InvalidConfig("clang flavor requires a sysroot".to_string())
                })?;
                vec!["-c".to_string(), format!("--sysroot={}", sysroot.display())]
            }
            CompileFlavor::Emscripten => {
                let pre_js = cfg.pre_js.as_ref().ok_or_else(|| {
                    HarnessError::InvalidConfig("emscripten flavor requires a pre-js file".to_string())
                })?;
                vec!["--pre-js".to_string(), pre_js.display().to_string()]
            }
        };

        let mut cflags = common.clone();
        cflags.push("--std=gnu89".to_string());
        cflags.extend(extra.iter().cloned());
        let mut cxxflags = common;
        cxxflags.extend(extra);

        Ok(Self {
            cc: cfg.cc.clone(),
            cxx: cfg.cxx.clone(),
            cflags,
            cxxflags,
            suffix: cfg.flavor.suffix().to_string(),
        })
    }
}

/// Whether a source should go through the C++ driver.
pub fn is_cxx_source(path: &Path) -> bool {
    let by_ext = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("C" | "cc" | "cpp" | "cxx")
    );
    by_ext
        || path
            .components()
            .any(|c| matches!(c, Component::Normal(n) if n == "g++.dg"))
}

/// Compile stage adapter.
#[derive(Debug, Clone)]
pub struct CompileStage {
    name: String,
    config: CompileConfig,
}

impl CompileStage {
    pub fn new(name: impl Into<String>, config: CompileConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn config(&self) -> &CompileConfig {
        &self.config
    }
}

impl Stage for CompileStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> Vec<Tool> {
        vec![
            Tool::new("C compiler", &self.config.cc),
            Tool::new("C++ compiler", &self.config.cxx),
        ]
    }

    /// C++ tests inside a testsuite tree reuse basenames across
    /// directories, so their path below `testsuite/<suite>/` is flattened
    /// with `__` separators.
    fn output_path(&self, outdir: &Path, unit: &TestUnit) -> PathBuf {
        let path = unit.path();
        let flattened = if is_cxx_source(path) {
            flatten_below_testsuite(path)
        } else {
            None
        };
        let name = match flattened {
            Some(mut base) => {
                base.push(&self.config.suffix);
                base
            }
            None => suffixed_name(path, &self.config.suffix),
        };
        outdir.join(name)
    }

    fn command(&self, unit: &TestUnit, output: Option<&Path>) -> Command {
        let (compiler, flags) = if is_cxx_source(unit.path()) {
            (&self.config.cxx, &self.config.cxxflags)
        } else {
            (&self.config.cc, &self.config.cflags)
        };
        let mut cmd = Command::new(compiler).arg(unit.path());
        if let Some(output) = output {
            cmd = cmd.arg("-o").arg(output);
        }
        cmd.args(flags)
    }
}

fn flatten_below_testsuite(path: &Path) -> Option<OsString> {
    let parts: Vec<_> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(n) => Some(n),
            _ => None,
        })
        .collect();
    let idx = parts.iter().rposition(|p| *p == "testsuite")?;
    let rest = parts.get(idx + 2..).filter(|r| !r.is_empty())?;
    let mut joined = OsString::new();
    for (i, part) in rest.iter().enumerate() {
        if i > 0 {
            joined.push("__");
        }
        joined.push(part);
    }
    Some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CompileConfig {
        CompileConfig {
            cc: PathBuf::from("/llvm/bin/clang"),
            cxx: PathBuf::from("/llvm/bin/clang++"),
            cflags: vec!["-O2".to_string(), "--std=gnu89".to_string()],
            cxxflags: vec!["-O2".to_string()],
            suffix: ".o".to_string(),
        }
    }

    #[test]
    fn test_c_source_uses_cc() {
        let stage = CompileStage::new("compile", config());
        let unit = TestUnit::new("gcc/testsuite/gcc.c-torture/execute/pr1.c", &[]);
        let cmd = stage.command(&unit, Some(Path::new("out/pr1.c.o")));
        assert_eq!(cmd.program, PathBuf::from("/llvm/bin/clang"));
        assert_eq!(
            cmd.render(),
            "/llvm/bin/clang gcc/testsuite/gcc.c-torture/execute/pr1.c -o out/pr1.c.o -O2 --std=gnu89"
        );
    }

    #[test]
    fn test_cxx_source_uses_cxx() {
        let stage = CompileStage::new("compile", config());
        let unit = TestUnit::new("gcc/testsuite/g++.dg/opt/pr5.C", &[]);
        let cmd = stage.command(&unit, None);
        assert_eq!(cmd.program, PathBuf::from("/llvm/bin/clang++"));
        assert!(!cmd.args.iter().any(|a| a == "--std=gnu89"));
        assert!(!cmd.args.iter().any(|a| a == "-o"));
    }

    #[test]
    fn test_lowercase_c_under_gxx_dir_is_cxx() {
        assert!(is_cxx_source(Path::new("testsuite/g++.dg/init/x.c")));
        assert!(!is_cxx_source(Path::new("testsuite/gcc.c-torture/execute/x.c")));
    }

    #[test]
    fn test_c_output_name() {
        let stage = CompileStage::new("compile", config());
        let unit = TestUnit::new("gcc/testsuite/gcc.c-torture/execute/pr1.c", &[]);
        assert_eq!(
            stage.output_path(Path::new("out"), &unit),
            PathBuf::from("out/pr1.c.o")
        );
    }

    #[test]
    fn test_cxx_output_name_flattened() {
        let stage = CompileStage::new("compile", config());
        let a = TestUnit::new("gcc/testsuite/g++.dg/opt/pr5.C", &[]);
        let b = TestUnit::new("gcc/testsuite/g++.dg/init/pr5.C", &[]);
        assert_eq!(
            stage.output_path(Path::new("out"), &a),
            PathBuf::from("out/opt__pr5.C.o")
        );
        assert_ne!(
            stage.output_path(Path::new("out"), &a),
            stage.output_path(Path::new("out"), &b)
        );
    }

    #[test]
    fn test_torture_clang_flags() {
        let cfg = CompileConfig::torture(&TortureCompileConfig {
            flavor: CompileFlavor::Clang,
            cc: PathBuf::from("cc"),
            cxx: PathBuf::from("c++"),
            sysroot: Some(PathBuf::from("/sysroot")),
            pre_js: None,
            opt: "O0".to_string(),
        })
        .unwrap();
        assert_eq!(cfg.suffix, ".o");
        assert!(cfg.cflags.contains(&"-O0".to_string()));
        assert!(cfg.cflags.contains(&"--std=gnu89".to_string()));
        assert!(cfg.cflags.contains(&"--sysroot=/sysroot".to_string()));
        assert!(cfg.cxxflags.contains(&"-c".to_string()));
        assert!(!cfg.cxxflags.contains(&"--std=gnu89".to_string()));
    }

    #[test]
    fn test_torture_emscripten_requires_pre_js() {
        let err = CompileConfig::torture(&TortureCompileConfig {
            flavor: CompileFlavor::Emscripten,
            cc: PathBuf::from("emcc"),
            cxx: PathBuf::from("em++"),
            sysroot: None,
            pre_js: None,
            opt: "O2".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfig(_)));
    }

    #[test]
    fn test_torture_attributes() {
        let cfg = TortureCompileConfig {
            flavor: CompileFlavor::Emscripten,
            cc: PathBuf::from("emcc"),
            cxx: PathBuf::from("em++"),
            sysroot: None,
            pre_js: Some(PathBuf::from("pre.js")),
            opt: "O3".to_string(),
        };
        assert_eq!(cfg.attributes(), vec!["emscripten".to_string(), "O3".to_string()]);
    }
}
