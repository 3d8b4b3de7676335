//! `*` / `?` wildcard patterns over file names.

use regex::Regex;

use crate::error::{HarnessError, HarnessResult};

/// Whether `pattern` contains any wildcard character.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// Anchored regex source equivalent to a wildcard pattern.
pub fn regex_source(pattern: &str) -> String {
    let mut src = String::with_capacity(pattern.len() + 8);
    src.push('^');
    let mut literal = String::new();
    for ch in pattern.chars() {
        match ch {
            '*' | '?' => {
                src.push_str(&regex::escape(&literal));
                literal.clear();
                src.push_str(if ch == '*' { "[^/]*" } else { "[^/]" });
            }
            _ => literal.push(ch),
        }
    }
    src.push_str(&regex::escape(&literal));
    src.push('$');
    src
}

/// A compiled wildcard pattern.
#[derive(Debug, Clone)]
pub struct Wildcard {
    pattern: String,
    regex: Regex,
}

impl Wildcard {
    pub fn new(pattern: &str) -> HarnessResult<Self> {
        let regex = Regex::new(&regex_source(pattern)).map_err(|e| HarnessError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}
