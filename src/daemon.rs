// SPDX-License-Identifier: GPL-2.0-or-later
//
// tracebench - Estimate the per-event overhead of tracing backends

//! Lifecycle supervision of the long-lived tracing session daemon. The
//! daemon is global to the machine, so each benchmark session confirms it is
//! up before issuing control commands and confirms it is gone before the
//! session counts as destroyed.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{bail, Context as _, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::errors::BenchError;
use crate::process::CommandRunner;

/// Process name of the tracing session daemon.
pub const SESSIOND: &str = "lttng-sessiond";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Start/stop control over the session daemon. The trait exists so session
/// lifecycle tests can substitute a recording double for the real daemon.
pub trait DaemonControl {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// Supervises the real lttng-sessiond through its binary and the process
/// table.
pub struct SessiondSupervisor {
    runner: Rc<dyn CommandRunner>,
    binary: PathBuf,
    start_timeout: Duration,
    stop_timeout: Duration,
}

impl SessiondSupervisor {
    pub fn new(
        runner: Rc<dyn CommandRunner>,
        bin_dir: Option<&Path>,
        start_timeout: Duration,
        stop_timeout: Duration,
    ) -> Self {
        let binary = match bin_dir {
            Some(dir) => dir.join(SESSIOND),
            None => PathBuf::from(SESSIOND),
        };
        SessiondSupervisor {
            runner,
            binary,
            start_timeout,
            stop_timeout,
        }
    }

    pub fn is_running() -> Result<bool> {
        Ok(!sessiond_pids()?.is_empty())
    }
}

impl DaemonControl for SessiondSupervisor {
    /// Launch the daemon in detached mode unless one is already up, then
    /// wait until it shows in the process table.
    fn start(&mut self) -> Result<()> {
        if Self::is_running()? {
            log::debug!("{} is already running", SESSIOND);
            return Ok(());
        }

        self.runner
            .run(&self.binary, &["--daemonize".to_string()])
            .context("Failed to launch the session daemon")?;

        let deadline = Instant::now() + self.start_timeout;
        while !Self::is_running()? {
            if Instant::now() >= deadline {
                bail!(
                    "{} did not appear within {:?} of launching it",
                    SESSIOND,
                    self.start_timeout
                );
            }
            sleep(POLL_INTERVAL);
        }

        log::debug!("{} is up", SESSIOND);
        Ok(())
    }

    /// Terminate every daemon process by name, then wait (bounded) until the
    /// process table no longer lists any.
    fn stop(&mut self) -> Result<()> {
        let pids = sessiond_pids()?;
        if pids.is_empty() {
            log::debug!("{} is not running, nothing to stop", SESSIOND);
            return Ok(());
        }

        for pid in pids {
            log::debug!("sending SIGTERM to {} (pid {})", SESSIOND, pid);
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                // The process may have exited between listing and signaling.
                log::warn!("failed to signal pid {}: {}", pid, e);
            }
        }

        let deadline = Instant::now() + self.stop_timeout;
        loop {
            if sessiond_pids()?.is_empty() {
                log::debug!("{} has exited", SESSIOND);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BenchError::DaemonShutdownTimeout {
                    name: SESSIOND.to_string(),
                    timeout: self.stop_timeout,
                }
                .into());
            }
            sleep(POLL_INTERVAL);
        }
    }
}

/// Pids of every process whose comm or argv[0] basename matches the daemon
/// name.
fn sessiond_pids() -> Result<Vec<i32>> {
    let processes =
        procfs::process::all_processes().context("Failed to read the process table")?;

    let mut pids = Vec::new();
    for process in processes {
        if process.stat.comm == SESSIOND || argv0_basename(&process) == Some(SESSIOND.to_string()) {
            pids.push(process.pid);
        }
    }
    Ok(pids)
}

fn argv0_basename(process: &procfs::process::Process) -> Option<String> {
    let cmdline = process.cmdline().ok()?;
    let argv0 = cmdline.first()?;
    Path::new(argv0)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessiond_pid_scan_does_not_error() -> Result<()> {
        // The scan must work on any process table, whether or not a session
        // daemon is present.
        sessiond_pids()?;
        Ok(())
    }

    #[test]
    fn own_process_is_visible_by_pid() -> Result<()> {
        let me = std::process::id() as i32;
        let processes = procfs::process::all_processes()?;
        assert!(processes.iter().any(|p| p.pid == me));
        Ok(())
    }
}
