// SPDX-License-Identifier: GPL-2.0-or-later
//
// tracebench - Estimate the per-event overhead of tracing backends

//! Benchmark configuration. [`Settings`] layers embedded defaults, an
//! optional system config file, and environment variables; [`BenchmarkConfig`]
//! carries the per-run values taken from the command line.

use std::path::PathBuf;

use anyhow::{ensure, Context as _, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

/// Options forwarded to the lttng control tool.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Lttng {
    /// Sub-buffer size passed to enable-channel, e.g. "8M".
    pub subbufsize: String,
    /// Number of sub-buffers per channel.
    pub subbufcount: u32,
    /// Maximum key count for counting maps.
    pub mapkeys: u32,
}

/// Location of the prebuilt in-kernel counting program.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ebpf {
    pub object: String,
}

/// Bounds on session-daemon lifecycle waits, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Daemon {
    #[serde(alias = "start_wait")]
    pub startwait: u64,
    #[serde(alias = "stop_wait")]
    pub stopwait: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub lttng: Lttng,
    pub ebpf: Ebpf,
    pub daemon: Daemon,
    #[serde(alias = "lock_file")]
    pub lockfile: String,
}

impl Settings {
    pub fn new(path: Option<&str>) -> Result<Self> {
        let mut s = Config::new();

        // Set defaults
        s.merge(File::from_str(
            include_str!("../config/default.yml"),
            FileFormat::Yaml,
        ))
        .context("Failed to apply default settings")?;

        // Merge in config files
        match path {
            // User-supplied config file
            Some(path) => s.merge(File::with_name(path).required(true)),
            // Global config file
            None => s.merge(File::with_name("/etc/tracebench.yml").required(false)),
        }
        .context("Error reading config file")?;

        // Read in from environment variables starting with prefix
        s.merge(Environment::with_prefix("TRACEBENCH").separator("_"))
            .context("Error reading settings from environment")?;

        Ok(s.try_into()?)
    }
}

/// Per-run parameters, immutable for the lifetime of an orchestrator run.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// The workload executable that generates events and reports a figure.
    pub workload: PathBuf,
    /// Worker threads inside the workload.
    pub thread_count: u32,
    /// Seconds each iteration runs the workload for.
    pub duration_s: u32,
    /// Number of acquire/run/teardown cycles.
    pub iterations: u32,
    /// Directory holding the lttng binaries; None means PATH lookup.
    pub lttng_bin_dir: Option<PathBuf>,
}

impl BenchmarkConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.thread_count > 0, "thread count must be positive");
        ensure!(self.duration_s > 0, "duration must be positive");
        ensure!(self.iterations > 0, "iteration count must be positive");
        Ok(())
    }
}
