//! Config command - print or save the effective configuration

use super::{ConfigAction, ConfigArgs};
use crate::config::{save_config, Config};
use anyhow::{Context, Result};
use tracing::info;

/// Run the config command
pub fn run_config(config: &Config, args: &ConfigArgs) -> Result<()> {
    match &args.action {
        ConfigAction::Show => {
            let rendered = toml::to_string_pretty(config).context("Failed to serialize config")?;
            print!("{}", rendered);
        },
        ConfigAction::Save { path } => {
            save_config(config, path)?;
            info!("Configuration saved to {}", path.display());
        },
    }
    Ok(())
}
