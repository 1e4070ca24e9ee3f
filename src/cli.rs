// SPDX-License-Identifier: GPL-2.0-or-later
//
// tracebench - Estimate the per-event overhead of tracing backends

//! The tracebench CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

use crate::config::{BenchmarkConfig, Settings};
use crate::orchestrator::Orchestrator;
use crate::session::Backend;

/// Estimate the per-event overhead of kernel and userspace tracing backends
/// by running a fixed workload under each and collecting the
/// nanoseconds-per-event figure it reports.
#[derive(Parser, Debug)]
#[clap(author, version, arg_required_else_help(true))]
pub struct Cli {
    /// Path to the workload executable used to generate events
    #[clap(long)]
    workload: PathBuf,
    /// Directory containing the lttng binaries (default: PATH lookup)
    #[clap(long)]
    lttng_binary_path: Option<PathBuf>,
    /// Duration (in seconds) during which the workload must run per iteration
    #[clap(long, default_value = "10")]
    duration: u32,
    /// Number of iterations of the benchmark to run
    #[clap(long, default_value = "10")]
    iteration_count: u32,
    /// Number of workload threads (default: host CPU count)
    #[clap(long)]
    thread_count: Option<u32>,
    /// Set logging level to DEBUG
    #[clap(long, short)]
    debug: bool,
    /// Config file to read from. If omitted, /etc/tracebench.yml is used
    /// when present
    #[clap(long, short)]
    config: Option<String>,
    /// The benchmark to run
    #[clap(subcommand)]
    subcommand: Cmd,
}

impl Cli {
    pub fn run(&self) -> Result<()> {
        let level = if self.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        crate::log::configure(level)?;

        let settings = Settings::new(self.config.as_deref())?;
        log::debug!("running with settings: {:#?}", settings);

        let thread_count = match self.thread_count {
            Some(count) => count,
            None => libbpf_rs::num_possible_cpus()
                .context("Failed to count host CPUs")? as u32,
        };

        let config = BenchmarkConfig {
            workload: self.workload.clone(),
            thread_count,
            duration_s: self.duration,
            iterations: self.iteration_count,
            lttng_bin_dir: self.lttng_binary_path.clone(),
        };
        config.validate()?;

        let backend = self.subcommand.backend();
        let measurements = Orchestrator::new(backend, config, settings).run()?;

        println!("samples (ns per event):");
        for (i, sample) in measurements.samples().iter().enumerate() {
            println!("  {:>3}  {:.3}", i + 1, sample);
        }
        if let Some(summary) = measurements.summary() {
            println!("{}", summary);
        }

        Ok(())
    }
}

/// Benchmark selection.
#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Trace to an eBPF per-CPU array and estimate the per-event overhead
    EbpfMap,
    /// Trace to an LTTng-modules counting map and estimate the per-event
    /// overhead
    LttngKernelMap,
    /// Trace to an LTTng-modules per-CPU ring-buffer and estimate the
    /// per-event overhead
    LttngKernelRingbuffer,
    /// Trace to an LTTng-UST counting map and estimate the per-event
    /// overhead
    LttngUstMap,
    /// Trace to an LTTng-UST per-CPU ring-buffer and estimate the per-event
    /// overhead
    LttngUstRingbuffer,
}

impl Cmd {
    fn backend(&self) -> Backend {
        match self {
            Cmd::EbpfMap => Backend::EbpfMap,
            Cmd::LttngKernelMap => Backend::LttngKernelMap,
            Cmd::LttngKernelRingbuffer => Backend::LttngKernelRingbuffer,
            Cmd::LttngUstMap => Backend::LttngUstMap,
            Cmd::LttngUstRingbuffer => Backend::LttngUstRingbuffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommands_select_backends() {
        let cli = Cli::try_parse_from(&[
            "tracebench",
            "--workload",
            "/usr/bin/workload",
            "lttng-ust-ringbuffer",
        ])
        .expect("parse must succeed");
        assert_eq!(cli.subcommand.backend(), Backend::LttngUstRingbuffer);
        assert_eq!(cli.duration, 10);
        assert_eq!(cli.iteration_count, 10);
    }

    #[test]
    fn workload_is_required() {
        assert!(Cli::try_parse_from(&["tracebench", "ebpf-map"]).is_err());
    }
}
