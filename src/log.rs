// SPDX-License-Identifier: GPL-2.0-or-later
//
// tracebench - Estimate the per-event overhead of tracing backends

use anyhow::{Context as _, Result};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

/// Configure logging. Everything goes to stderr so benchmark results on
/// stdout stay machine-readable.
pub fn configure(log_level: LevelFilter) -> Result<()> {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "[{d(%Y-%m-%d %H:%M:%S)}] {h([{l}])}: {m}\n",
        )))
        .target(Target::Stderr)
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(log_level))
        .context("Failed to create logging configuration object")?;

    log4rs::init_config(config).context("Failed to configure logging")?;

    Ok(())
}
