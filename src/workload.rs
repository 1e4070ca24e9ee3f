// SPDX-License-Identifier: GPL-2.0-or-later
//
// tracebench - Estimate the per-event overhead of tracing backends

//! Runs the workload executable and parses its result. The workload protocol
//! is positional: `workload THREAD_COUNT DURATION_SECONDS DOMAIN`, with the
//! first whitespace-delimited token of stdout being the nanoseconds-per-event
//! figure.

use std::path::Path;
use std::rc::Rc;

use anyhow::Result;

use crate::errors::BenchError;
use crate::process::CommandRunner;

/// Which side of the workload generates events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadDomain {
    /// Threads write event batches to the benchmark module's proc file.
    Kernel,
    /// Threads fire the userspace tracepoint directly.
    Ust,
}

impl WorkloadDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadDomain::Kernel => "kernel",
            WorkloadDomain::Ust => "ust",
        }
    }
}

pub struct WorkloadRunner {
    runner: Rc<dyn CommandRunner>,
}

impl WorkloadRunner {
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        WorkloadRunner { runner }
    }

    /// Run one workload pass and return its nanoseconds-per-event figure.
    pub fn run(
        &self,
        workload: &Path,
        thread_count: u32,
        duration_s: u32,
        domain: WorkloadDomain,
    ) -> Result<f64> {
        let args = vec![
            thread_count.to_string(),
            duration_s.to_string(),
            domain.as_str().to_string(),
        ];

        let output = self.runner.run(workload, &args).map_err(|e| {
            // A non-zero exit is a workload failure no matter what it printed.
            match e.downcast_ref::<BenchError>() {
                Some(BenchError::CommandFailed { status, stderr, .. }) => {
                    anyhow::Error::from(BenchError::WorkloadExecution {
                        status: *status,
                        stderr: stderr.clone(),
                    })
                }
                _ => e,
            }
        })?;

        parse_result(&output.stdout)
    }
}

/// Parse the first whitespace-delimited token of the workload's stdout as a
/// floating-point value.
fn parse_result(stdout: &str) -> Result<f64> {
    let token = stdout
        .split_whitespace()
        .next()
        .ok_or_else(|| BenchError::WorkloadOutputFormat(stdout.to_string()))?;

    token
        .parse::<f64>()
        .map_err(|_| BenchError::WorkloadOutputFormat(stdout.to_string()).into())
}
