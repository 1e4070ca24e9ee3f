// SPDX-License-Identifier: GPL-2.0-or-later
//
// tracebench - Estimate the per-event overhead of tracing backends

//! Kernel-side resources: the benchmark modules loaded through
//! modprobe/rmmod, the tolerant sweep of lingering tracing modules, and the
//! in-kernel per-CPU counting program attached with libbpf.

use std::convert::TryInto;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{anyhow, bail, Context as _, Result};
use lazy_static::lazy_static;
use libbpf_rs::{Link, MapCore as _, MapFlags, Object, ObjectBuilder};
use regex::Regex;

use crate::process::CommandRunner;

/// Module providing /proc/lttng-bench-event and the benchmark tracepoint.
pub const COUNTER_MODULE: &str = "lttng-bench";
/// LTTng probe module for the benchmark tracepoint.
pub const PROBE_MODULE: &str = "lttng-probe-lttng-bench";

/// The kernel tracepoint fired once per benchmark event.
pub const TRACEPOINT_CATEGORY: &str = "lttng_bench";
pub const TRACEPOINT_NAME: &str = "lttng_bench_event";

const COUNTER_PROG: &str = "count_event";
const COUNTER_MAP: &str = "event_count";
/// Slot of the per-CPU array the program increments.
const COUNTER_SLOT: u32 = 511;

lazy_static! {
    /// Tracing modules left behind by the control daemon, as they appear in
    /// /proc/modules (underscores, not dashes).
    static ref MODULE_FAMILY: Regex = Regex::new(r"^lttng").unwrap();
}

/// Loads and unloads kernel modules and owns the attachment of the counting
/// program.
pub struct KernelResourceManager {
    runner: Rc<dyn CommandRunner>,
}

impl KernelResourceManager {
    pub fn new(runner: Rc<dyn CommandRunner>) -> Self {
        KernelResourceManager { runner }
    }

    pub fn load_module(&self, name: &str) -> Result<()> {
        self.runner
            .run(&PathBuf::from("modprobe"), &[name.to_string()])
            .with_context(|| format!("Failed to load module {}", name))?;
        Ok(())
    }

    pub fn unload_module(&self, name: &str) -> Result<()> {
        self.runner
            .run(&PathBuf::from("rmmod"), &[name.to_string()])
            .with_context(|| format!("Failed to unload module {}", name))?;
        Ok(())
    }

    /// Remove every lingering module of the tracing family. The control
    /// daemon loads a pile of support modules on first use and leaves them
    /// behind; individual removal failures are tolerated so one stubborn
    /// module does not abort teardown.
    pub fn sweep_modules(&self) {
        let modules = match procfs::modules() {
            Ok(modules) => modules,
            Err(e) => {
                log::warn!("failed to read the module table, skipping sweep: {}", e);
                return;
            }
        };

        for name in modules.keys() {
            if !MODULE_FAMILY.is_match(name) {
                continue;
            }
            match self.unload_module(name) {
                Ok(()) => log::debug!("swept module {}", name),
                Err(e) => log::debug!("leaving module {} behind: {:#}", name, e),
            }
        }
    }

    /// Load the prebuilt counting program and attach it to the benchmark
    /// tracepoint. The returned handle keeps the attachment alive.
    pub fn attach_counter_program(&self, object_path: &Path) -> Result<CounterProgram> {
        bump_memlock_rlimit().context("Failed bumping memlock limit")?;
        CounterProgram::load_and_attach(object_path)
    }
}

/// A loaded and attached instance of the in-kernel counting program. The
/// per-CPU counters stay readable for as long as this handle lives.
pub struct CounterProgram {
    object: Object,
    link: Option<Link>,
}

impl CounterProgram {
    fn load_and_attach(object_path: &Path) -> Result<Self> {
        log::debug!("loading counting program from {}", object_path.display());

        let open = ObjectBuilder::default()
            .open_file(object_path)
            .with_context(|| format!("Failed to open {}", object_path.display()))?;
        let mut object = open
            .load()
            .context("Failed to load the counting program into the kernel")?;

        let mut prog = object
            .progs_mut()
            .find(|p| p.name().to_str() == Some(COUNTER_PROG))
            .ok_or_else(|| anyhow!("program {} not found in object", COUNTER_PROG))?;

        let link = prog
            .attach_tracepoint(TRACEPOINT_CATEGORY, TRACEPOINT_NAME)
            .with_context(|| {
                format!(
                    "Failed to attach to tracepoint {}:{}",
                    TRACEPOINT_CATEGORY, TRACEPOINT_NAME
                )
            })?;

        Ok(CounterProgram {
            object,
            link: Some(link),
        })
    }

    /// Read the counter slot, one value per CPU. Interactive inspection
    /// only; the benchmark result comes from the workload.
    pub fn read_counters(&self) -> Result<Vec<u64>> {
        let map = self
            .object
            .maps()
            .find(|m| m.name().to_str() == Some(COUNTER_MAP))
            .ok_or_else(|| anyhow!("map {} not found in object", COUNTER_MAP))?;

        let key = COUNTER_SLOT.to_ne_bytes();
        let per_cpu = map
            .lookup_percpu(&key, MapFlags::ANY)
            .context("Failed to read the counter map")?
            .ok_or_else(|| anyhow!("counter slot {} is empty", COUNTER_SLOT))?;

        per_cpu
            .iter()
            .map(|value| {
                let bytes: [u8; 8] = value
                    .get(..8)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| anyhow!("unexpected counter value size {}", value.len()))?;
                Ok(u64::from_ne_bytes(bytes))
            })
            .collect()
    }

    /// Detach from the tracepoint. Must happen before the counter module is
    /// unloaded; the kernel refuses to unload a module with a live
    /// attachment.
    pub fn detach(mut self) {
        self.link.take();
    }
}

/// Bump the rlimit for memlock up to full capacity.
/// This is required to load even reasonably sized eBPF maps.
fn bump_memlock_rlimit() -> Result<()> {
    let rlimit = libc::rlimit {
        rlim_cur: 128 << 20,
        rlim_max: 128 << 20,
    };

    if unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlimit) } != 0 {
        bail!("Failed to increase rlimit");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::process::testing::Recorder;

    #[test]
    fn module_family_matches_proc_modules_names() {
        assert!(MODULE_FAMILY.is_match("lttng_tracer"));
        assert!(MODULE_FAMILY.is_match("lttng_ring_buffer_client_discard"));
        assert!(MODULE_FAMILY.is_match("lttng_bench"));
        assert!(!MODULE_FAMILY.is_match("ext4"));
        assert!(!MODULE_FAMILY.is_match("bench_lttng"));
    }

    #[test]
    fn load_and_unload_use_the_module_tools() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let manager = KernelResourceManager::new(Rc::new(Recorder::new(Rc::clone(&calls))));

        manager.load_module(COUNTER_MODULE).unwrap();
        manager.unload_module(COUNTER_MODULE).unwrap();

        let calls = calls.borrow();
        assert_eq!(calls[0], vec!["modprobe", "lttng-bench"]);
        assert_eq!(calls[1], vec!["rmmod", "lttng-bench"]);
    }

    #[test]
    fn missing_object_file_is_an_error() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let manager = KernelResourceManager::new(Rc::new(Recorder::new(calls)));
        assert!(manager
            .attach_counter_program(Path::new("/nonexistent/counter.bpf.o"))
            .is_err());
    }
}
