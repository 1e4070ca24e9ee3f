// SPDX-License-Identifier: GPL-2.0-or-later
//
// tracebench - Estimate the per-event overhead of tracing backends

//! Integration tests driving the workload runner against real executables.
//! Nothing here needs root, kernel modules, or a tracing installation.

use std::fs;
use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Result;
use tempfile::TempDir;

use tracebench::errors::BenchError;
use tracebench::process::SystemRunner;
use tracebench::workload::{WorkloadDomain, WorkloadRunner};

mod init;
use init::init;

/// Write an executable shell script standing in for the workload binary.
fn fake_workload(dir: &TempDir, body: &str) -> Result<PathBuf> {
    let path = dir.path().join("workload");
    let mut file = fs::File::create(&path)?;
    writeln!(file, "#!/bin/sh")?;
    writeln!(file, "{}", body)?;

    let mut perms = fs::metadata(&path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms)?;

    Ok(path)
}

fn runner() -> WorkloadRunner {
    WorkloadRunner::new(Rc::new(SystemRunner))
}

#[test]
fn parses_a_real_workload_result() -> Result<()> {
    init()?;

    let dir = TempDir::new()?;
    let workload = fake_workload(&dir, r#"echo "3.50 ns per event""#)?;

    let sample = runner().run(&workload, 4, 1, WorkloadDomain::Kernel)?;
    assert_eq!(sample, 3.50);
    Ok(())
}

#[test]
fn workload_sees_positional_arguments() -> Result<()> {
    init()?;

    let dir = TempDir::new()?;
    // The workload echoes its own argv back; the first token is the thread
    // count, which must parse as the result.
    let workload = fake_workload(&dir, r#"echo "$1 $2 $3""#)?;

    let sample = runner().run(&workload, 8, 2, WorkloadDomain::Ust)?;
    assert_eq!(sample, 8.0);
    Ok(())
}

#[test]
fn nonzero_exit_fails_regardless_of_stdout() -> Result<()> {
    init()?;

    let dir = TempDir::new()?;
    let workload = fake_workload(&dir, "echo \"9.99 ns per event\"\nexit 1")?;

    let err = runner()
        .run(&workload, 4, 1, WorkloadDomain::Kernel)
        .expect_err("workload must fail");
    match err.downcast_ref::<BenchError>() {
        Some(BenchError::WorkloadExecution { status, .. }) => assert!(!status.success()),
        other => panic!("unexpected error: {:?}", other),
    }
    Ok(())
}

#[test]
fn unparsable_output_is_a_format_error() -> Result<()> {
    init()?;

    let dir = TempDir::new()?;
    let workload = fake_workload(&dir, "echo abc")?;

    let err = runner()
        .run(&workload, 4, 1, WorkloadDomain::Kernel)
        .expect_err("output must not parse");
    match err.downcast_ref::<BenchError>() {
        Some(BenchError::WorkloadOutputFormat(output)) => assert!(output.contains("abc")),
        other => panic!("unexpected error: {:?}", other),
    }
    Ok(())
}
