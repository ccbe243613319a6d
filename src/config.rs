//! TOML configuration, defaults, and boot validation.
//!
//! A config file tunes deployment knobs only; everything structural
//! (stack count, stack capacity, checkpoint layout) is compile-time.
//! Misconfiguration is a boot error, never a runtime one.

use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::MAX_WORKERS;

/// Deployment-time scheduler tuning.
///
/// Maps directly to a flat TOML file; every field has a default so a partial
/// file (or none at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of stacks wired to producing subsystems. Stacks beyond this
    /// exist but never run. Deployments ship with 5, 7 or 8.
    pub active_stacks: u32,
    /// Worker thread count; 0 selects the hardware parallelism, capped at
    /// the scheduler maximum.
    pub workers: u32,
    /// Executed-task count after which the scheduler requests quit.
    pub shutdown_after: u64,
    /// Seconds between progress reporter lines; 0 disables the reporter.
    pub report_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            active_stacks: 5,
            workers: 0,
            shutdown_after: 100_000,
            report_interval_secs: 5,
        }
    }
}

impl Config {
    /// Parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=8).contains(&self.active_stacks),
            "active_stacks must be in 1..=8, got {}",
            self.active_stacks
        );
        ensure!(
            self.workers as usize <= MAX_WORKERS,
            "workers must be at most {MAX_WORKERS}, got {}",
            self.workers
        );
        ensure!(self.shutdown_after > 0, "shutdown_after must be nonzero");
        Ok(())
    }

    /// Resolve the worker count: explicit value, or hardware parallelism
    /// capped at the scheduler maximum.
    pub fn effective_workers(&self) -> u32 {
        if self.workers > 0 {
            return self.workers;
        }
        let hardware = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        hardware.min(MAX_WORKERS) as u32
    }
}
