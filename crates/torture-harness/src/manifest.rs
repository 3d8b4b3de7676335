//! Known-failure manifests and exclusion lists.
//!
//! Both use the same line format:
//!
//! ```text
//! # comment
//! 20000112-1.c
//! pr43220.c        O0 clang   # only fails at -O0 with clang
//! va-arg-*.c       emscripten
//! ```
//!
//! The first token is a test name (wildcards allowed), the remaining tokens
//! are attribute qualifiers. An entry applies to a unit when every one of
//! its qualifiers is among the unit's attributes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::RegexSet;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::pattern;

/// One parsed manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub qualifiers: Vec<String>,
    pub source: PathBuf,
    pub line: usize,
}

impl ManifestEntry {
    /// Whether all qualifiers are present in `attributes`.
    pub fn applies_to(&self, attributes: &[String]) -> bool {
        self.qualifiers.iter().all(|q| attributes.contains(q))
    }
}

/// Parse manifest text into entries.
pub fn parse_entries(text: &str, source: &Path) -> Vec<ManifestEntry> {
    let mut entries = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let mut tokens = line.split_whitespace();
        let Some(name) = tokens.next() else {
            continue;
        };
        entries.push(ManifestEntry {
            name: name.to_string(),
            qualifiers: tokens.map(str::to_string).collect(),
            source: source.to_path_buf(),
            line: idx + 1,
        });
    }
    entries
}

/// Indexed set of manifest entries from any number of files.
///
/// Exact names are looked up in a hash map; wildcard names are matched in a
/// single pass through a compiled [`RegexSet`].
#[derive(Debug, Clone)]
pub struct Manifest {
    exact: HashMap<String, Vec<ManifestEntry>>,
    wildcard_entries: Vec<ManifestEntry>,
    wildcards: RegexSet,
}

/// Exclusion lists share the manifest format and index.
pub type ExclusionList = Manifest;

impl Default for Manifest {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            wildcard_entries: Vec::new(),
            wildcards: RegexSet::empty(),
        }
    }
}

impl Manifest {
    /// Load and merge manifest files. File order does not affect matching.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> HarnessResult<Self> {
        let mut entries = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path).map_err(|source| {
                HarnessError::ManifestRead {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
            let parsed = parse_entries(&text, path);
            debug!(manifest = %path.display(), entries = parsed.len(), "Loaded manifest");
            entries.extend(parsed);
        }
        Self::from_entries(entries)
    }

    /// Build from in-memory text.
    pub fn parse(text: &str, source: impl AsRef<Path>) -> HarnessResult<Self> {
        Self::from_entries(parse_entries(text, source.as_ref()))
    }

    pub fn from_entries(entries: Vec<ManifestEntry>) -> HarnessResult<Self> {
        let mut exact: HashMap<String, Vec<ManifestEntry>> = HashMap::new();
        let mut wildcard_entries = Vec::new();
        for entry in entries {
            if pattern::is_wildcard(&entry.name) {
                wildcard_entries.push(entry);
            } else {
                exact.entry(entry.name.clone()).or_default().push(entry);
            }
        }

        let wildcards = RegexSet::new(
            wildcard_entries
                .iter()
                .map(|e| pattern::regex_source(&e.name)),
        )
        .map_err(|e| HarnessError::InvalidPattern {
            pattern: wildcard_entries
                .iter()
                .map(|e| e.name.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            reason: e.to_string(),
        })?;

        Ok(Self {
            exact,
            wildcard_entries,
            wildcards,
        })
    }

    /// Whether any entry for `name` applies under `attributes`.
    pub fn matches(&self, name: &str, attributes: &[String]) -> bool {
        self.matching_entry(name, attributes).is_some()
    }

    /// First applicable entry for `name`, exact names before wildcards.
    pub fn matching_entry(&self, name: &str, attributes: &[String]) -> Option<&ManifestEntry> {
        if let Some(found) = self
            .exact
            .get(name)
            .and_then(|list| list.iter().find(|e| e.applies_to(attributes)))
        {
            return Some(found);
        }
        if self.wildcard_entries.is_empty() {
            return None;
        }
        self.wildcards
            .matches(name)
            .into_iter()
            .map(|idx| &self.wildcard_entries[idx])
            .find(|e| e.applies_to(attributes))
    }

    pub fn len(&self) -> usize {
        self.exact.values().map(Vec::len).sum::<usize>() + self.wildcard_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// SHA-256 over the normalized entries, independent of file order.
    pub fn digest(&self) -> String {
        let mut lines: Vec<String> = self
            .exact
            .values()
            .flatten()
            .chain(self.wildcard_entries.iter())
            .map(|e| {
                let mut q = e.qualifiers.clone();
                q.sort();
                format!("{} {}", e.name, q.join(" "))
            })
            .collect();
        lines.sort();

        let mut hasher = Sha256::new();
        for line in &lines {
            hasher.update(line.as_bytes());
            hasher.update(b"\0");
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn attrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_skips_blank_and_comment_lines() {
        let text = "# header\n\n20000112-1.c\n   \n  # indented comment\npr123.c O2 # trailing\n";
        let entries = parse_entries(text, Path::new("known.txt"));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "20000112-1.c");
        assert!(entries[0].qualifiers.is_empty());
        assert_eq!(entries[0].line, 3);
        assert_eq!(entries[1].name, "pr123.c");
        assert_eq!(entries[1].qualifiers, vec!["O2".to_string()]);
    }

    #[test]
    fn test_unqualified_entry_matches_any_attributes() {
        let m = Manifest::parse("a.c\n", "m").unwrap();
        assert!(m.matches("a.c", &[]));
        assert!(m.matches("a.c", &attrs(&["O2", "clang"])));
        assert!(!m.matches("b.c", &[]));
    }

    #[test]
    fn test_qualified_entry_requires_all_qualifiers() {
        let m = Manifest::parse("a.c O0 clang\n", "m").unwrap();
        assert!(m.matches("a.c", &attrs(&["clang", "O0"])));
        assert!(m.matches("a.c", &attrs(&["O0", "clang", "bare"])));
        assert!(!m.matches("a.c", &attrs(&["O0"])));
        assert!(!m.matches("a.c", &attrs(&["O2", "clang"])));
    }

    #[test]
    fn test_qualifier_mismatch_does_not_suppress() {
        let m = Manifest::parse("a.c O0\n", "m").unwrap();
        assert!(!m.matches("a.c", &attrs(&["O2"])));
    }

    #[test]
    fn test_any_of_several_entries_for_same_name() {
        let m = Manifest::parse("a.c O0\na.c O3\n", "m").unwrap();
        assert!(m.matches("a.c", &attrs(&["O3"])));
        assert!(m.matches("a.c", &attrs(&["O0"])));
        assert!(!m.matches("a.c", &attrs(&["O2"])));
    }

    #[test]
    fn test_wildcard_entries() {
        let m = Manifest::parse("va-arg-*.c emscripten\n*.C\n", "m").unwrap();
        assert!(m.matches("va-arg-13.c", &attrs(&["emscripten"])));
        assert!(!m.matches("va-arg-13.c", &attrs(&["clang"])));
        assert!(m.matches("template1.C", &[]));
        assert!(!m.matches("template1.c", &[]));
    }

    #[test]
    fn test_matching_entry_reports_source_line() {
        let m = Manifest::parse("\nx.c\n", "known.txt").unwrap();
        let entry = m.matching_entry("x.c", &[]).unwrap();
        assert_eq!(entry.line, 2);
        assert_eq!(entry.source, PathBuf::from("known.txt"));
    }

    #[test]
    fn test_load_merges_files_order_independent() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::File::create(&a)
            .unwrap()
            .write_all(b"one.c\ntwo.c O2\n")
            .unwrap();
        std::fs::File::create(&b)
            .unwrap()
            .write_all(b"three.c\n")
            .unwrap();

        let ab = Manifest::load(&[&a, &b]).unwrap();
        let ba = Manifest::load(&[&b, &a]).unwrap();
        for name in ["one.c", "two.c", "three.c", "four.c"] {
            let o2 = attrs(&["O2"]);
            assert_eq!(ab.matches(name, &o2), ba.matches(name, &o2), "{name}");
        }
        assert_eq!(ab.len(), 3);
        assert_eq!(ab.digest(), ba.digest());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let err = Manifest::load(&["/nonexistent/known.txt"]).unwrap_err();
        assert!(matches!(err, HarnessError::ManifestRead { .. }));
    }

    #[test]
    fn test_digest_ignores_qualifier_order() {
        let a = Manifest::parse("x.c O2 clang\n", "a").unwrap();
        let b = Manifest::parse("x.c clang O2\n", "b").unwrap();
        let c = Manifest::parse("x.c O2\n", "c").unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_empty_manifest() {
        let m = Manifest::default();
        assert!(m.is_empty());
        assert!(!m.matches("a.c", &[]));
    }
}
