pub mod agent;
pub mod chat;

use anyhow::{Context, Result};

use parley::ClientEvent;
use parley::config::FileConfig;

pub fn config_command(file_config: &FileConfig) -> Result<()> {
    let rendered =
        toml::to_string_pretty(file_config).context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}

/// One JSON object per line on stdout.
fn print_event(event: &ClientEvent) -> Result<()> {
    let line = serde_json::to_string(event).context("Failed to encode event")?;
    println!("{line}");
    Ok(())
}
