//! Blinkhost host process.
//!
//! Usage: `blinkhost [config.json]`

use std::path::PathBuf;

use anyhow::Result;
use tracing::info;

fn main() -> Result<()> {
    blinkhost_lib::init_logging();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = blinkhost_lib::load_config(config_path.as_deref())?;
    info!(?config, "Starting blinkhost");

    let report = blinkhost_lib::run(config)?;
    info!(
        sum = report.sum,
        async_calls = report.async_calls,
        view_loads = report.view_loads,
        "Session complete"
    );
    Ok(())
}
