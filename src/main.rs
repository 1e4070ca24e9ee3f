// SPDX-License-Identifier: GPL-2.0-or-later
//
// tracebench - Estimate the per-event overhead of tracing backends

use anyhow::Result;
use clap::Parser as _;

use tracebench::cli::Cli;

fn main() -> Result<()> {
    Cli::parse().run()
}
