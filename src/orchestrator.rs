// SPDX-License-Identifier: GPL-2.0-or-later
//
// tracebench - Estimate the per-event overhead of tracing backends

//! Drives the iteration loop: one fully torn-down benchmark session per
//! iteration, strictly sequential. Kernel modules, the session daemon, and
//! the benchmark tracepoint are machine-global, so two live sessions would
//! corrupt each other's measurements.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use fs2::FileExt as _;
use nix::unistd::Uid;

use crate::config::{BenchmarkConfig, Settings};
use crate::daemon::SessiondSupervisor;
use crate::errors::BenchError;
use crate::process::{CommandRunner, SystemRunner};
use crate::results::MeasurementSet;
use crate::session::{Backend, BenchmarkSession};

pub struct Orchestrator {
    backend: Backend,
    config: BenchmarkConfig,
    settings: Settings,
}

impl Orchestrator {
    pub fn new(backend: Backend, config: BenchmarkConfig, settings: Settings) -> Self {
        Orchestrator {
            backend,
            config,
            settings,
        }
    }

    /// Run all iterations and return the collected samples. Any acquisition
    /// or workload failure aborts the whole run; a masked iteration would
    /// corrupt the statistics.
    pub fn run(&self) -> Result<MeasurementSet> {
        if !Uid::effective().is_root() {
            return Err(BenchError::Permission.into());
        }

        // Held for the duration of the run. Concurrent orchestrators on one
        // machine would fight over the same global resources.
        let _lock = instance_lock(Path::new(&self.settings.lockfile))?;

        let runner: Rc<dyn CommandRunner> = Rc::new(SystemRunner);
        let mut measurements = MeasurementSet::new();

        for iteration in 1..=self.config.iterations {
            log::info!(
                "iteration {}/{} ({})",
                iteration,
                self.config.iterations,
                self.backend
            );

            let daemon = Box::new(SessiondSupervisor::new(
                Rc::clone(&runner),
                self.config.lttng_bin_dir.as_deref(),
                Duration::from_secs(self.settings.daemon.startwait),
                Duration::from_secs(self.settings.daemon.stopwait),
            ));
            let mut session = BenchmarkSession::new(
                self.backend,
                self.config.clone(),
                self.settings.clone(),
                Rc::clone(&runner),
                daemon,
            );

            // Acquisition failures have already unwound their own steps.
            session.acquire()?;

            // Teardown runs whether or not the workload succeeded; the run
            // error, if any, surfaces once resources are released.
            let run_result = session.run();
            let teardown_result = session.teardown();
            let sample = run_result?;
            teardown_result?;

            log::info!("iteration {}: {} ns per event", iteration, sample);
            measurements.push(sample);
        }

        Ok(measurements)
    }
}

/// Take the machine-wide benchmark lock, failing fast if another run holds
/// it.
fn instance_lock(path: &Path) -> Result<std::fs::File> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open lock file {}", path.display()))?;

    file.try_lock_exclusive()
        .map_err(|_| BenchError::AlreadyRunning(PathBuf::from(path)))?;

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_attempt_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tracebench.lock");

        let _held = instance_lock(&path)?;
        let err = instance_lock(&path).expect_err("lock must be exclusive");
        match err.downcast_ref::<BenchError>() {
            Some(BenchError::AlreadyRunning(_)) => {}
            other => panic!("unexpected error: {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn lock_is_released_with_the_guard() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tracebench.lock");

        drop(instance_lock(&path)?);
        instance_lock(&path)?;
        Ok(())
    }
}
