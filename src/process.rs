// SPDX-License-Identifier: GPL-2.0-or-later
//
// tracebench - Estimate the per-event overhead of tracing backends

//! Synchronous external-command execution. Every subprocess the benchmark
//! spawns (the lttng CLI, modprobe/rmmod, the workload itself) goes through
//! the [`CommandRunner`] trait so the session lifecycle can be exercised
//! against a recording double in tests.

use std::path::Path;
use std::process::Command;

use anyhow::{Context as _, Result};

use crate::errors::BenchError;

/// Captured output of a completed command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Blocking execution of one external command.
pub trait CommandRunner {
    /// Run `program` with `args`, blocking until it exits. A non-zero exit
    /// status is an error carrying [`BenchError::CommandFailed`].
    fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput>;
}

/// The real runner. Spawns commands with inherited environment and captures
/// both output streams.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput> {
        log::debug!("exec: {} {}", program.display(), args.join(" "));

        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("Failed to execute {}", program.display()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(BenchError::CommandFailed {
                program: program.display().to_string(),
                status: output.status,
                stderr: stderr.trim_end().to_string(),
            }
            .into());
        }

        Ok(CommandOutput { stdout, stderr })
    }
}


#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn captures_stdout() -> Result<()> {
        let output = SystemRunner.run(
            &PathBuf::from("/bin/echo"),
            &["hello".to_string(), "world".to_string()],
        )?;
        assert_eq!(output.stdout, "hello world\n");
        Ok(())
    }

    #[test]
    fn nonzero_exit_is_an_error() {
        let err = SystemRunner
            .run(&PathBuf::from("/bin/false"), &[])
            .expect_err("false(1) should fail");
        match err.downcast_ref::<BenchError>() {
            Some(BenchError::CommandFailed { status, .. }) => assert!(!status.success()),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn missing_binary_is_an_error() {
        let err = SystemRunner
            .run(&PathBuf::from("/nonexistent/tool"), &[])
            .expect_err("missing binary should fail");
        assert!(err.to_string().contains("Failed to execute"));
    }
}
