// SPDX-License-Identifier: GPL-2.0-or-later
//
// tracebench - Estimate the per-event overhead of tracing backends

//! Client for the lttng control CLI. Each method wraps one control verb and
//! blocks until the tool exits; a non-zero exit propagates as a hard failure.
//! The tool's option names are part of the contract with the session daemon
//! and must not drift.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Result;
use rand::Rng;

use crate::process::CommandRunner;

/// The event fired by the userspace workload threads.
pub const UST_EVENT: &str = "lc2022:benchmark_event";

/// Tracing domain a session resource belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingDomain {
    Kernel,
    Ust,
}

impl TracingDomain {
    fn flag(self) -> &'static str {
        match self {
            TracingDomain::Kernel => "--kernel",
            TracingDomain::Ust => "--userspace",
        }
    }

    fn trigger_type(self) -> &'static str {
        match self {
            TracingDomain::Kernel => "kernel",
            TracingDomain::Ust => "user",
        }
    }
}

/// Channel geometry forwarded to enable-channel.
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub subbuf_size: String,
    pub subbuf_count: u32,
}

/// Counting-map geometry forwarded to add-map.
#[derive(Debug, Clone)]
pub struct MapSpec {
    pub max_keys: u32,
}

/// Randomized names for every resource one benchmark session registers with
/// the session daemon. Fresh names per session keep repeated iterations from
/// colliding with a leftover resource of the previous one.
#[derive(Debug, Clone)]
pub struct TracingIdentity {
    pub session: String,
    pub channel: String,
    pub map: String,
    pub trigger: String,
}

impl TracingIdentity {
    pub fn generate() -> Self {
        TracingIdentity {
            session: format!("session-{}", random_token()),
            channel: format!("channel-{}", random_token()),
            map: format!("map-{}", random_token()),
            trigger: format!("trigger-{}", random_token()),
        }
    }
}

/// Eight random uppercase letters.
fn random_token() -> String {
    let mut rng = rand::thread_rng();
    (0..8).map(|_| rng.gen_range(b'A'..=b'Z') as char).collect()
}

/// Issues lifecycle commands to the session daemon through the lttng CLI.
pub struct TracingControlClient {
    runner: Rc<dyn CommandRunner>,
    binary: PathBuf,
}

impl TracingControlClient {
    pub fn new(runner: Rc<dyn CommandRunner>, bin_dir: Option<&Path>) -> Self {
        let binary = match bin_dir {
            Some(dir) => dir.join("lttng"),
            None => PathBuf::from("lttng"),
        };
        TracingControlClient { runner, binary }
    }

    fn invoke(&self, args: Vec<String>) -> Result<String> {
        let output = self.runner.run(&self.binary, &args)?;
        Ok(output.stdout)
    }

    /// Create a snapshot-mode session.
    pub fn create_session(&self, session: &str) -> Result<()> {
        self.invoke(vec![
            "create".to_string(),
            session.to_string(),
            "--snapshot".to_string(),
        ])?;
        Ok(())
    }

    pub fn enable_channel(
        &self,
        domain: TracingDomain,
        session: &str,
        channel: &str,
        spec: &ChannelSpec,
    ) -> Result<()> {
        let mut args = vec![
            "enable-channel".to_string(),
            domain.flag().to_string(),
            format!("--session={}", session),
            format!("--subbuf-size={}", spec.subbuf_size),
            format!("--num-subbuf={}", spec.subbuf_count),
        ];
        if domain == TracingDomain::Ust {
            args.push("--buffers-uid".to_string());
        }
        args.push(channel.to_string());
        self.invoke(args)?;
        Ok(())
    }

    pub fn enable_event(
        &self,
        domain: TracingDomain,
        session: &str,
        channel: &str,
        event: &str,
    ) -> Result<()> {
        self.invoke(vec![
            "enable-event".to_string(),
            domain.flag().to_string(),
            format!("--session={}", session),
            format!("--channel={}", channel),
            event.to_string(),
        ])?;
        Ok(())
    }

    /// Add a 64-bit counting map to the session. Userspace maps use per-uid
    /// buffers, mirroring the channel layout.
    pub fn add_map(
        &self,
        domain: TracingDomain,
        session: &str,
        map: &str,
        spec: &MapSpec,
    ) -> Result<()> {
        let mut args = vec![
            "add-map".to_string(),
            domain.flag().to_string(),
            format!("--session={}", session),
            format!("--max-key-count={}", spec.max_keys),
            "--bitness=64".to_string(),
        ];
        if domain == TracingDomain::Ust {
            args.push("--per-uid".to_string());
        }
        args.push(map.to_string());
        self.invoke(args)?;
        Ok(())
    }

    /// Register a trigger binding an event-rule match to an increment of one
    /// map key.
    pub fn add_trigger(
        &self,
        domain: TracingDomain,
        trigger: &str,
        event: &str,
        session: &str,
        map: &str,
        key: &str,
    ) -> Result<()> {
        self.invoke(vec![
            "add-trigger".to_string(),
            format!("--name={}", trigger),
            "--condition=event-rule-matches".to_string(),
            format!("--type={}", domain.trigger_type()),
            format!("--name={}", event),
            "--action=incr-value".to_string(),
            format!("--session={}", session),
            format!("--map={}", map),
            format!("--key={}", key),
        ])?;
        Ok(())
    }

    /// The daemon rejects this while a session still references the trigger;
    /// callers must destroy the session first.
    pub fn remove_trigger(&self, trigger: &str) -> Result<()> {
        self.invoke(vec!["remove-trigger".to_string(), trigger.to_string()])?;
        Ok(())
    }

    pub fn start(&self, session: &str) -> Result<()> {
        self.invoke(vec!["start".to_string(), session.to_string()])?;
        Ok(())
    }

    pub fn destroy_session(&self, session: &str) -> Result<()> {
        self.invoke(vec!["destroy".to_string(), session.to_string()])?;
        Ok(())
    }

    /// Dump the contents of a counting map. Interactive inspection only; the
    /// benchmark result never comes from here.
    pub fn view_map(&self, session: &str, map: &str) -> Result<String> {
        self.invoke(vec![
            "view-map".to_string(),
            format!("--session={}", session),
            map.to_string(),
        ])
    }
}
