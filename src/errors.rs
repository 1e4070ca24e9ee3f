// SPDX-License-Identifier: GPL-2.0-or-later
//
// tracebench - Estimate the per-event overhead of tracing backends

//! Error taxonomy for the benchmark harness. Functions propagate
//! [`anyhow::Error`] chains; the variants below travel inside those chains so
//! callers (and tests) can tell failure classes apart with `downcast_ref`.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    /// The process lacks the privileges needed to touch kernel and tracing
    /// resources. Raised before any resource is acquired.
    #[error("this benchmark must be executed as root")]
    Permission,

    /// Another orchestrator instance holds the machine-wide lock.
    #[error("another benchmark run holds the lock at {0}")]
    AlreadyRunning(PathBuf),

    /// An external tool exited with a non-zero status.
    #[error("`{program}` exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    /// A setup step failed. The session unwinds everything it already
    /// acquired before this error is surfaced.
    #[error("failed to acquire {0}")]
    ResourceAcquisition(String),

    /// A required teardown step failed. Tolerated steps (module unload, the
    /// module sweep) log instead of raising this.
    #[error("failed to release {0}")]
    ResourceRelease(String),

    /// The workload subprocess exited with a non-zero status.
    #[error("workload exited with {status}")]
    WorkloadExecution { status: ExitStatus, stderr: String },

    /// The workload exited cleanly but did not print a parsable result.
    #[error("workload output {0:?} does not start with a floating-point value")]
    WorkloadOutputFormat(String),

    /// The tracing session daemon outlived the bounded shutdown wait.
    #[error("{name} still running after {timeout:?}")]
    DaemonShutdownTimeout { name: String, timeout: Duration },
}
