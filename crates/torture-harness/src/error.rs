//! Error types for harness setup.
//!
//! Only setup-time problems are errors. Anything that goes wrong while a
//! single unit runs is folded into that unit's [`crate::UnitStatus`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced before any parallel work starts.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A tool the stage needs (compiler, linker, runner) is missing.
    #[error("cannot find {role} at {}", path.display())]
    ToolNotFound { role: String, path: PathBuf },

    /// A program the stage launches exists but lacks the execute bit.
    #[error("{role} at {} is not executable", path.display())]
    ToolNotExecutable { role: String, path: PathBuf },

    /// The configured output directory does not exist.
    #[error("cannot find output directory {}", .0.display())]
    MissingOutputDir(PathBuf),

    /// The input pattern matched nothing.
    #[error("no files found by {0}")]
    NoInputs(String),

    /// A wildcard pattern could not be compiled.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A manifest or exclusion list could not be read.
    #[error("cannot read manifest {}: {source}", path.display())]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two distinct inputs would write the same output file.
    #[error(
        "output collision: {} and {} both map to {}",
        first.display(),
        second.display(),
        output.display()
    )]
    OutputCollision {
        first: PathBuf,
        second: PathBuf,
        output: PathBuf,
    },

    /// No strategy is registered for the requested runner kind.
    #[error("no runner strategy registered for kind '{0}'")]
    UnknownRunner(String),

    /// Configuration values are out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias.
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;
