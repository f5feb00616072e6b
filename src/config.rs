//! Engine configuration - every capacity and time budget as an explicit knob
//!
//! All limits default to the values the engine was tuned with; a YAML file
//! (`shellkit.yml` in the working directory, or
//! `~/.config/shellkit/config.yml`) can override any subset of them.

use crate::error::{Result, ShellError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Engine limits and time budgets
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShellConfig {
    /// Command history capacity, FIFO-evicted when full
    pub history_capacity: usize,
    /// Maximum pipeline stages; exceeding this is a parse error
    pub max_stages: usize,
    /// Maximum argv entries per stage; exceeding this is a parse error
    pub max_args: usize,
    /// Captured-output ceiling in bytes; overflow truncates with a warning
    pub capture_limit: usize,
    /// Time budget for a single command, in milliseconds
    pub single_timeout_ms: u64,
    /// Time budget for a multi-stage pipeline, in milliseconds
    pub pipeline_timeout_ms: u64,
    /// Sleep between drain-loop iterations, in milliseconds
    pub drain_poll_ms: u64,
    /// Background job table capacity; overflow is surfaced as an error
    pub max_jobs: usize,
    /// `poll()` wait used by the multiWatch monitor, in milliseconds
    pub watch_poll_ms: u64,
    /// multiWatch gives up after this much inactivity, in milliseconds
    pub watch_idle_timeout_ms: u64,
    /// Grace period between SIGTERM and SIGKILL at multiWatch shutdown
    pub term_grace_ms: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            history_capacity: 10_000,
            max_stages: 16,
            max_args: 64,
            capture_limit: 4096,
            single_timeout_ms: 3000,
            pipeline_timeout_ms: 5000,
            drain_poll_ms: 10,
            max_jobs: 16,
            watch_poll_ms: 100,
            watch_idle_timeout_ms: 5000,
            term_grace_ms: 500,
        }
    }
}

impl ShellConfig {
    /// Load configuration from an explicit file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ShellError::Config(format!("{}: {}", path.display(), e)))?;
        let config: ShellConfig = serde_yaml::from_str(&content)
            .map_err(|e| ShellError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Resolve configuration the way the CLI does.
    ///
    /// Priority:
    /// 1. explicit `--config` path (missing file is an error)
    /// 2. `shellkit.yml` in the current directory
    /// 3. `~/.config/shellkit/config.yml`
    /// 4. built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let local = Path::new("shellkit.yml");
        if local.exists() {
            return Self::from_file(local);
        }

        if let Some(dir) = dirs::config_dir() {
            let user = dir.join("shellkit/config.yml");
            if user.exists() {
                return Self::from_file(&user);
            }
        }

        Ok(Self::default())
    }

    /// Time budget for the given stage count
    pub fn timeout_for(&self, stages: usize) -> Duration {
        if stages > 1 {
            Duration::from_millis(self.pipeline_timeout_ms)
        } else {
            Duration::from_millis(self.single_timeout_ms)
        }
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms)
    }

    pub fn watch_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.watch_idle_timeout_ms)
    }

    pub fn term_grace(&self) -> Duration {
        Duration::from_millis(self.term_grace_ms)
    }
}
