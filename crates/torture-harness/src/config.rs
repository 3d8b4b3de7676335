//! Harness configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// Tunables shared by every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Worker count; `None` means one per logical core.
    pub workers: Option<usize>,

    /// Per-unit wall-clock limit in seconds (0 = unlimited).
    pub unit_timeout_secs: u64,

    /// How long the driver waits on the result channel per poll.
    pub poll_interval_ms: u64,

    /// Log progress every N results (0 = never).
    pub progress_every: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workers: None,
            unit_timeout_secs: 300,
            poll_interval_ms: 100,
            progress_every: 10,
        }
    }
}

impl HarnessConfig {
    /// Parse a TOML document holding this table's fields.
    pub fn from_toml_str(text: &str) -> HarnessResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| HarnessError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.workers == Some(0) {
            return Err(HarnessError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(HarnessError::InvalidConfig(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_workers)
    }

    pub fn unit_timeout(&self) -> Option<Duration> {
        (self.unit_timeout_secs > 0).then(|| Duration::from_secs(self.unit_timeout_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Logical core count, falling back to 1.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
