//! Test input enumeration.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::pattern::{self, Wildcard};

/// Header bytes inspected by [`find_runnable_tests`].
const HEADER_BYTES: u64 = 1024;

/// Where a run's inputs come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSet {
    /// Wildcards in the final path component, e.g. `out/torture-s/*.s`.
    Glob(String),
    Files(Vec<PathBuf>),
    /// Executable dg tests below `dir`, see [`find_runnable_tests`].
    Runnable { dir: PathBuf, pattern: String },
}

impl InputSet {
    /// Resolve to a sorted list of paths.
    pub fn expand(&self) -> HarnessResult<Vec<PathBuf>> {
        match self {
            InputSet::Glob(pattern) => expand_glob(pattern),
            InputSet::Files(files) => Ok(files.clone()),
            InputSet::Runnable { dir, pattern } => find_runnable_tests(dir, pattern),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            InputSet::Glob(pattern) => pattern.clone(),
            InputSet::Files(files) => format!("{} explicit file(s)", files.len()),
            InputSet::Runnable { dir, pattern } => {
                format!("runnable {} tests under {}", pattern, dir.display())
            }
        }
    }
}

/// Expand a glob whose wildcards are confined to the file name.
pub fn expand_glob(pattern: &str) -> HarnessResult<Vec<PathBuf>> {
    let path = Path::new(pattern);
    let file_pattern = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| HarnessError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "pattern has no file name component".to_string(),
        })?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if pattern::is_wildcard(&dir.to_string_lossy()) {
        return Err(HarnessError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "wildcards are only supported in the file name".to_string(),
        });
    }

    if !pattern::is_wildcard(&file_pattern) {
        return Ok(if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            Vec::new()
        });
    }

    let matcher = Wildcard::new(&file_pattern)?;
    let mut out = Vec::new();
    let read = match fs::read_dir(&dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    for entry in read {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if matcher.matches(&entry.file_name().to_string_lossy()) {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

/// Recursively collect executable dg tests under `dir`.
///
/// Directories named `ext` are skipped. A file is kept when its name
/// matches `pattern` and its header declares `{ dg-do run }` without
/// needing `dg-additional-sources`.
pub fn find_runnable_tests(dir: &Path, pattern: &str) -> HarnessResult<Vec<PathBuf>> {
    let matcher = Wildcard::new(pattern)?;
    let mut out = Vec::new();
    walk(dir, &matcher, &mut out)?;
    out.sort();
    Ok(out)
}

fn walk(dir: &Path, matcher: &Wildcard, out: &mut Vec<PathBuf>) -> HarnessResult<()> {
    if dir.file_name().is_some_and(|n| n == "ext") {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(&path, matcher, out)?;
        } else if file_type.is_file()
            && matcher.matches(&entry.file_name().to_string_lossy())
            && is_runnable(&path)?
        {
            out.push(path);
        }
    }
    Ok(())
}

fn is_runnable(path: &Path) -> HarnessResult<bool> {
    let mut header = Vec::with_capacity(HEADER_BYTES as usize);
    fs::File::open(path)?
        .take(HEADER_BYTES)
        .read_to_end(&mut header)?;
    let header = String::from_utf8_lossy(&header);
    Ok(header.contains("{ dg-do run }") && !header.contains("dg-additional-sources"))
}

/// Keep only inputs whose file name matches `filter`.
pub fn apply_filter(inputs: Vec<PathBuf>, filter: Option<&str>) -> HarnessResult<Vec<PathBuf>> {
    let Some(filter) = filter else {
        return Ok(inputs);
    };
    let matcher = Wildcard::new(filter)?;
    Ok(inputs
        .into_iter()
        .filter(|p| {
            p.file_name()
                .is_some_and(|n| matcher.matches(&n.to_string_lossy()))
        })
        .collect())
}
