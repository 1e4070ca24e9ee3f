// SPDX-License-Identifier: GPL-2.0-or-later
//
// tracebench - Estimate the per-event overhead of tracing backends

//! The per-iteration benchmark session: a state machine that acquires one
//! backend's stack of kernel and tracing resources in a fixed order, runs the
//! workload while they are live, and releases everything in the required
//! teardown order on every exit path.

use std::path::Path;
use std::rc::Rc;

use anyhow::{bail, Context as _, Result};

use crate::config::{BenchmarkConfig, Settings};
use crate::daemon::DaemonControl;
use crate::errors::BenchError;
use crate::kernel::{
    CounterProgram, KernelResourceManager, COUNTER_MODULE, PROBE_MODULE, TRACEPOINT_NAME,
};
use crate::lttng::{
    ChannelSpec, MapSpec, TracingControlClient, TracingDomain, TracingIdentity, UST_EVENT,
};
use crate::process::CommandRunner;
use crate::workload::{WorkloadDomain, WorkloadRunner};

/// The tracing mechanism under measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Raw eBPF per-CPU counter map attached to the kernel tracepoint.
    EbpfMap,
    /// LTTng-modules counting map driven by a trigger.
    LttngKernelMap,
    /// LTTng-modules per-CPU ring-buffer channel.
    LttngKernelRingbuffer,
    /// LTTng-UST counting map driven by a trigger.
    LttngUstMap,
    /// LTTng-UST per-CPU ring-buffer channel.
    LttngUstRingbuffer,
}

/// Where an LTTng backend records events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    Ringbuffer,
    CountingMap,
}

impl Backend {
    /// Kernel modules this backend needs, in load order.
    fn modules(self) -> &'static [&'static str] {
        match self {
            Backend::EbpfMap => &[COUNTER_MODULE],
            Backend::LttngKernelMap | Backend::LttngKernelRingbuffer => {
                &[COUNTER_MODULE, PROBE_MODULE]
            }
            Backend::LttngUstMap | Backend::LttngUstRingbuffer => &[],
        }
    }

    /// The LTTng domain, None for the raw eBPF backend.
    fn tracing_domain(self) -> Option<TracingDomain> {
        match self {
            Backend::EbpfMap => None,
            Backend::LttngKernelMap | Backend::LttngKernelRingbuffer => {
                Some(TracingDomain::Kernel)
            }
            Backend::LttngUstMap | Backend::LttngUstRingbuffer => Some(TracingDomain::Ust),
        }
    }

    fn sink(self) -> Option<Sink> {
        match self {
            Backend::EbpfMap => None,
            Backend::LttngKernelRingbuffer | Backend::LttngUstRingbuffer => Some(Sink::Ringbuffer),
            Backend::LttngKernelMap | Backend::LttngUstMap => Some(Sink::CountingMap),
        }
    }

    /// Which side of the workload generates events.
    pub fn workload_domain(self) -> WorkloadDomain {
        match self {
            Backend::EbpfMap | Backend::LttngKernelMap | Backend::LttngKernelRingbuffer => {
                WorkloadDomain::Kernel
            }
            Backend::LttngUstMap | Backend::LttngUstRingbuffer => WorkloadDomain::Ust,
        }
    }

    /// Event name the LTTng domain matches on.
    fn event_name(self) -> &'static str {
        match self.workload_domain() {
            WorkloadDomain::Kernel => TRACEPOINT_NAME,
            WorkloadDomain::Ust => UST_EVENT,
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Backend::EbpfMap => "ebpf-map",
            Backend::LttngKernelMap => "lttng-kernel-map",
            Backend::LttngKernelRingbuffer => "lttng-kernel-ringbuffer",
            Backend::LttngUstMap => "lttng-ust-map",
            Backend::LttngUstRingbuffer => "lttng-ust-ringbuffer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Acquiring,
    Acquired,
    Running,
    Completed,
    TornDown,
    Failed,
}

/// One acquire/run/teardown cycle for one backend. Construct, `acquire`,
/// `run`, then `teardown`; teardown is an explicit step the orchestrator
/// drives on every exit path, not a side effect of dropping the session.
pub struct BenchmarkSession {
    backend: Backend,
    config: BenchmarkConfig,
    settings: Settings,
    state: State,

    client: TracingControlClient,
    daemon: Box<dyn DaemonControl>,
    kernel: KernelResourceManager,
    workload: WorkloadRunner,

    // Kernel resource facet.
    loaded_modules: Vec<&'static str>,
    probe: Option<CounterProgram>,

    // LTTng session facet.
    identity: Option<TracingIdentity>,
    daemon_started: bool,
    session_created: bool,
    trigger_added: bool,

    sample: Option<f64>,
}

impl BenchmarkSession {
    pub fn new(
        backend: Backend,
        config: BenchmarkConfig,
        settings: Settings,
        runner: Rc<dyn CommandRunner>,
        daemon: Box<dyn DaemonControl>,
    ) -> Self {
        let client =
            TracingControlClient::new(Rc::clone(&runner), config.lttng_bin_dir.as_deref());
        let kernel = KernelResourceManager::new(Rc::clone(&runner));
        let workload = WorkloadRunner::new(runner);
        let identity = backend
            .tracing_domain()
            .map(|_| TracingIdentity::generate());

        BenchmarkSession {
            backend,
            config,
            settings,
            state: State::Created,
            client,
            daemon,
            kernel,
            workload,
            loaded_modules: Vec::new(),
            probe: None,
            identity,
            daemon_started: false,
            session_created: false,
            trigger_added: false,
            sample: None,
        }
    }

    /// Acquire the backend's resource stack in order. If any step fails, the
    /// steps already completed are reversed before the error surfaces; a
    /// partially-acquired session is never left alive.
    pub fn acquire(&mut self) -> Result<()> {
        if self.state != State::Created {
            bail!("session cannot acquire from state {:?}", self.state);
        }
        self.state = State::Acquiring;

        match self.acquire_steps() {
            Ok(()) => {
                self.state = State::Acquired;
                Ok(())
            }
            Err(e) => {
                self.state = State::Failed;
                log::error!("acquisition failed, releasing partially acquired resources");
                if let Err(release) = self.release_all() {
                    log::error!("release during unwind also failed: {:#}", release);
                }
                Err(e)
            }
        }
    }

    fn acquire_steps(&mut self) -> Result<()> {
        for &module in self.backend.modules() {
            self.kernel
                .load_module(module)
                .context(BenchError::ResourceAcquisition(format!("module {}", module)))?;
            self.loaded_modules.push(module);
        }

        if self.backend == Backend::EbpfMap {
            let probe = self
                .kernel
                .attach_counter_program(Path::new(&self.settings.ebpf.object))
                .context(BenchError::ResourceAcquisition(
                    "in-kernel counting program".to_string(),
                ))?;
            self.probe = Some(probe);
        }

        if let Some(domain) = self.backend.tracing_domain() {
            self.acquire_lttng(domain)?;
        }

        Ok(())
    }

    fn acquire_lttng(&mut self, domain: TracingDomain) -> Result<()> {
        let identity = match &self.identity {
            Some(identity) => identity.clone(),
            None => bail!("LTTng backend without a tracing identity"),
        };

        self.daemon
            .start()
            .context(BenchError::ResourceAcquisition(
                "tracing session daemon".to_string(),
            ))?;
        self.daemon_started = true;

        self.client
            .create_session(&identity.session)
            .context(BenchError::ResourceAcquisition(format!(
                "session {}",
                identity.session
            )))?;
        self.session_created = true;

        let event = self.backend.event_name();
        match self.backend.sink() {
            Some(Sink::Ringbuffer) => {
                let spec = ChannelSpec {
                    subbuf_size: self.settings.lttng.subbufsize.clone(),
                    subbuf_count: self.settings.lttng.subbufcount,
                };
                self.client
                    .enable_channel(domain, &identity.session, &identity.channel, &spec)
                    .context(BenchError::ResourceAcquisition(format!(
                        "channel {}",
                        identity.channel
                    )))?;
                self.client
                    .enable_event(domain, &identity.session, &identity.channel, event)
                    .context(BenchError::ResourceAcquisition(format!("event {}", event)))?;
            }
            Some(Sink::CountingMap) => {
                let spec = MapSpec {
                    max_keys: self.settings.lttng.mapkeys,
                };
                self.client
                    .add_map(domain, &identity.session, &identity.map, &spec)
                    .context(BenchError::ResourceAcquisition(format!(
                        "map {}",
                        identity.map
                    )))?;
                self.client
                    .add_trigger(
                        domain,
                        &identity.trigger,
                        event,
                        &identity.session,
                        &identity.map,
                        event,
                    )
                    .context(BenchError::ResourceAcquisition(format!(
                        "trigger {}",
                        identity.trigger
                    )))?;
                self.trigger_added = true;
            }
            None => bail!("LTTng backend without a sink"),
        }

        self.client
            .start(&identity.session)
            .context(BenchError::ResourceAcquisition(format!(
                "session {} start",
                identity.session
            )))?;

        Ok(())
    }

    /// Run the workload and capture its result. The sample is only exposed
    /// after this succeeds.
    pub fn run(&mut self) -> Result<f64> {
        if self.state != State::Acquired {
            bail!("session cannot run from state {:?}", self.state);
        }
        self.state = State::Running;

        log::info!(
            "running workload: {} threads for {} s ({})",
            self.config.thread_count,
            self.config.duration_s,
            self.backend
        );

        match self.workload.run(
            &self.config.workload,
            self.config.thread_count,
            self.config.duration_s,
            self.backend.workload_domain(),
        ) {
            Ok(sample) => {
                self.state = State::Completed;
                self.sample = Some(sample);
                if log::log_enabled!(log::Level::Debug) {
                    self.inspect();
                }
                Ok(sample)
            }
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    /// The captured result, available once `run` has completed.
    pub fn sample(&self) -> Option<f64> {
        self.sample
    }

    /// Release every acquired resource. Safe to call from any state; called
    /// by the orchestrator on normal completion and after a failed run alike.
    pub fn teardown(&mut self) -> Result<()> {
        match self.state {
            State::TornDown => return Ok(()),
            State::Created => {
                self.state = State::TornDown;
                return Ok(());
            }
            _ => {}
        }

        let result = self.release_all();
        self.state = match result {
            Ok(()) => State::TornDown,
            Err(_) => State::Failed,
        };
        result
    }

    /// Release in the required order. This is not a naive reversal of the
    /// acquisition list: the session must be destroyed before its trigger is
    /// removed, and the counting program must detach before the counter
    /// module unloads. Required steps (session, trigger, daemon) fail the
    /// teardown; module unloads and the sweep only log.
    fn release_all(&mut self) -> Result<()> {
        let mut first_failure: Option<anyhow::Error> = None;

        if self.session_created {
            if let Some(identity) = self.identity.clone() {
                match self.client.destroy_session(&identity.session) {
                    Ok(()) => self.session_created = false,
                    Err(e) => record_failure(
                        &mut first_failure,
                        e.context(BenchError::ResourceRelease(format!(
                            "session {}",
                            identity.session
                        ))),
                    ),
                }
            }
        }

        if self.trigger_added {
            if let Some(identity) = self.identity.clone() {
                match self.client.remove_trigger(&identity.trigger) {
                    Ok(()) => self.trigger_added = false,
                    Err(e) => record_failure(
                        &mut first_failure,
                        e.context(BenchError::ResourceRelease(format!(
                            "trigger {}",
                            identity.trigger
                        ))),
                    ),
                }
            }
        }

        if self.daemon_started {
            match self.daemon.stop() {
                Ok(()) => self.daemon_started = false,
                Err(e) => record_failure(
                    &mut first_failure,
                    e.context(BenchError::ResourceRelease(
                        "tracing session daemon".to_string(),
                    )),
                ),
            }
        }

        if let Some(probe) = self.probe.take() {
            probe.detach();
            log::debug!("detached the counting program");
        }

        let had_modules = !self.loaded_modules.is_empty();
        while let Some(module) = self.loaded_modules.pop() {
            if let Err(e) = self.kernel.unload_module(module) {
                log::warn!("leaving module {} loaded: {:#}", module, e);
            }
        }
        if had_modules {
            self.kernel.sweep_modules();
        }

        match first_failure {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Dump the backend's counters at debug level. Inspection only; never
    /// contributes to the measurement.
    fn inspect(&self) {
        match (self.backend.sink(), &self.identity) {
            (Some(Sink::CountingMap), Some(identity)) => {
                match self.client.view_map(&identity.session, &identity.map) {
                    Ok(contents) => log::debug!("map {} contents:\n{}", identity.map, contents),
                    Err(e) => log::warn!("failed to view map {}: {:#}", identity.map, e),
                }
            }
            _ => {
                if let Some(probe) = &self.probe {
                    match probe.read_counters() {
                        Ok(per_cpu) => {
                            for (cpu, count) in per_cpu.iter().enumerate() {
                                log::debug!("cpu {}: {} events", cpu, count);
                            }
                        }
                        Err(e) => log::warn!("failed to read the counter map: {:#}", e),
                    }
                }
            }
        }
    }
}

fn record_failure(first: &mut Option<anyhow::Error>, e: anyhow::Error) {
    log::error!("teardown step failed: {:#}", e);
    if first.is_none() {
        *first = Some(e);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::PathBuf;

    use super::*;
    use crate::config::{Daemon, Ebpf, Lttng};
    use crate::process::testing::Recorder;

    type CallLog = Rc<RefCell<Vec<Vec<String>>>>;

    struct FakeDaemon {
        calls: CallLog,
    }

    impl DaemonControl for FakeDaemon {
        fn start(&mut self) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(vec!["daemon".to_string(), "start".to_string()]);
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(vec!["daemon".to_string(), "stop".to_string()]);
            Ok(())
        }
    }

    fn test_settings() -> Settings {
        Settings {
            lttng: Lttng {
                subbufsize: "8M".to_string(),
                subbufcount: 4,
                mapkeys: 1024,
            },
            ebpf: Ebpf {
                object: "/nonexistent/counter.bpf.o".to_string(),
            },
            daemon: Daemon {
                startwait: 1,
                stopwait: 1,
            },
            lockfile: "/tmp/tracebench-test.lock".to_string(),
        }
    }

    fn test_config() -> BenchmarkConfig {
        BenchmarkConfig {
            workload: PathBuf::from("/usr/bin/workload"),
            thread_count: 4,
            duration_s: 1,
            iterations: 1,
            lttng_bin_dir: None,
        }
    }

    fn session_with_log(
        backend: Backend,
        fail_matching: Option<&'static str>,
    ) -> (BenchmarkSession, CallLog) {
        let calls: CallLog = Rc::new(RefCell::new(Vec::new()));
        let mut recorder = Recorder::new(Rc::clone(&calls));
        recorder.fail_matching = fail_matching;
        let daemon = Box::new(FakeDaemon {
            calls: Rc::clone(&calls),
        });
        let session = BenchmarkSession::new(
            backend,
            test_config(),
            test_settings(),
            Rc::new(recorder),
            daemon,
        );
        (session, calls)
    }

    /// First two argv tokens of each recorded call, which is enough to name
    /// the step without depending on randomized identities.
    fn steps(calls: &CallLog) -> Vec<(String, String)> {
        calls
            .borrow()
            .iter()
            .map(|call| {
                (
                    call[0].clone(),
                    call.get(1).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }

    #[test]
    fn ust_map_lifecycle_order() -> Result<()> {
        let (mut session, calls) = session_with_log(Backend::LttngUstMap, None);

        session.acquire()?;
        let sample = session.run()?;
        session.teardown()?;

        assert_eq!(sample, 3.21);
        assert_eq!(session.sample(), Some(3.21));

        let expected = vec![
            ("daemon", "start"),
            ("lttng", "create"),
            ("lttng", "add-map"),
            ("lttng", "add-trigger"),
            ("lttng", "start"),
            ("/usr/bin/workload", "4"),
            ("lttng", "destroy"),
            ("lttng", "remove-trigger"),
            ("daemon", "stop"),
        ];
        let got = steps(&calls);
        assert_eq!(got.len(), expected.len());
        for (step, (program, verb)) in got.iter().zip(expected) {
            assert_eq!(step.0, program);
            if program == "lttng" || program == "daemon" {
                assert_eq!(step.1, verb);
            }
        }
        Ok(())
    }

    #[test]
    fn session_destroyed_before_trigger_removed() -> Result<()> {
        let (mut session, calls) = session_with_log(Backend::LttngKernelMap, None);

        session.acquire()?;
        session.run()?;
        session.teardown()?;

        let got = steps(&calls);
        let destroy = got
            .iter()
            .position(|s| s.1 == "destroy")
            .expect("session must be destroyed");
        let remove = got
            .iter()
            .position(|s| s.1 == "remove-trigger")
            .expect("trigger must be removed");
        assert!(
            destroy < remove,
            "the daemon rejects trigger removal while the session references it"
        );
        Ok(())
    }

    #[test]
    fn kernel_ringbuffer_teardown_reverses_acquisition() -> Result<()> {
        let (mut session, calls) = session_with_log(Backend::LttngKernelRingbuffer, None);

        session.acquire()?;
        session.run()?;
        session.teardown()?;

        let expected = vec![
            ("modprobe".to_string(), COUNTER_MODULE.to_string()),
            ("modprobe".to_string(), PROBE_MODULE.to_string()),
            ("daemon".to_string(), "start".to_string()),
            ("lttng".to_string(), "create".to_string()),
            ("lttng".to_string(), "enable-channel".to_string()),
            ("lttng".to_string(), "enable-event".to_string()),
            ("lttng".to_string(), "start".to_string()),
            ("/usr/bin/workload".to_string(), "4".to_string()),
            ("lttng".to_string(), "destroy".to_string()),
            ("daemon".to_string(), "stop".to_string()),
            ("rmmod".to_string(), PROBE_MODULE.to_string()),
            ("rmmod".to_string(), COUNTER_MODULE.to_string()),
        ];
        // The trailing module-family sweep may add host-dependent rmmod
        // calls; only the prefix is deterministic.
        let got = steps(&calls);
        assert!(got.len() >= expected.len());
        assert_eq!(got[..expected.len()].to_vec(), expected);
        Ok(())
    }

    #[test]
    fn failed_acquisition_unwinds_earlier_steps() {
        let (mut session, calls) = session_with_log(Backend::LttngUstMap, Some("add-trigger"));

        let err = session.acquire().expect_err("add-trigger must fail");
        let chain: Vec<String> = err.chain().map(|e| e.to_string()).collect();
        assert!(
            chain.iter().any(|msg| msg.contains("failed to acquire")),
            "unexpected error chain: {:?}",
            chain
        );

        let got = steps(&calls);
        // Steps 1..k-1 are reversed; the trigger never registered, so only
        // the session and the daemon need releasing.
        let expected = vec![
            ("daemon", "start"),
            ("lttng", "create"),
            ("lttng", "add-map"),
            ("lttng", "add-trigger"),
            ("lttng", "destroy"),
            ("daemon", "stop"),
        ];
        assert_eq!(got.len(), expected.len());
        for (step, (program, verb)) in got.iter().zip(expected) {
            assert_eq!((step.0.as_str(), step.1.as_str()), (program, verb));
        }

        // No sample, and the workload never ran.
        assert_eq!(session.sample(), None);
        assert!(!got.iter().any(|s| s.0.contains("workload")));
    }

    #[test]
    fn failed_module_attach_unwinds_loaded_module() {
        let (mut session, calls) = session_with_log(Backend::EbpfMap, None);

        // The counting-program object does not exist, so acquisition fails
        // after the counter module loaded.
        let err = session.acquire().expect_err("attach must fail");
        assert!(err
            .chain()
            .any(|e| e.to_string().contains("in-kernel counting program")));

        let got = steps(&calls);
        assert_eq!(
            got[0],
            ("modprobe".to_string(), COUNTER_MODULE.to_string())
        );
        assert_eq!(got[1], ("rmmod".to_string(), COUNTER_MODULE.to_string()));
    }

    #[test]
    fn teardown_still_releases_after_workload_failure() {
        let (mut session, calls) = session_with_log(Backend::LttngUstRingbuffer, Some("workload"));

        session.acquire().expect("acquisition must succeed");
        let err = session.run().expect_err("workload must fail");
        match err.downcast_ref::<BenchError>() {
            Some(BenchError::WorkloadExecution { .. }) => {}
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(session.sample(), None);

        session.teardown().expect("teardown must succeed");
        let got = steps(&calls);
        assert!(got.iter().any(|s| s.1 == "destroy"));
        assert_eq!(got.last().unwrap().1, "stop");
    }

    #[test]
    fn teardown_is_idempotent() -> Result<()> {
        let (mut session, calls) = session_with_log(Backend::LttngUstRingbuffer, None);

        session.acquire()?;
        session.run()?;
        session.teardown()?;
        let after_first = calls.borrow().len();

        session.teardown()?;
        assert_eq!(calls.borrow().len(), after_first);
        Ok(())
    }

    #[test]
    fn run_requires_acquired_state() {
        let (mut session, _calls) = session_with_log(Backend::LttngUstMap, None);
        assert!(session.run().is_err());
        assert_eq!(session.sample(), None);
    }
}
