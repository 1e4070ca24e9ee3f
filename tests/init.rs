use std::sync::Once;

use anyhow::Result;

static INIT: Once = Once::new();

pub fn init() -> Result<()> {
    INIT.call_once(|| {
        // Keep test output quiet unless a test opts in to more.
        let _ = tracebench::log::configure(log::LevelFilter::Warn);
    });

    Ok(())
}
