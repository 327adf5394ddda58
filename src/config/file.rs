//! Configuration file loading

use super::env::{self, EnvSource};
use super::Config;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

/// Load configuration: file (if present), then environment, then validation
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) if path.exists() => load_file(path)?,
        Some(path) => {
            debug!("Config file {:?} not found, using defaults", path);
            Config::default()
        },
        None => Config::default(),
    };

    env::apply(&mut config, &EnvSource::load()?)?;
    super::validate(&config)?;

    Ok(config)
}

/// Parse a config file without applying overrides
pub fn load_file(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Write configuration as TOML; database credentials are never written
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(config).context("Failed to serialize config")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, contents)
        .with_context(|| format!("Failed to write config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_file(&dir.path().join("nope.toml"));
        assert!(config.is_err());

        let config = load_config(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config.discovery.max_depth, Config::default().discovery.max_depth);
    }

    #[test]
    fn test_save_omits_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/arachne.toml");

        let mut config = Config::default();
        config.database.postgres_password = Some("hunter2".into());
        config.tor.circuit_count = 4;
        save_config(&config, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("hunter2"));
        assert!(!written.contains("[database]"));

        let reloaded = load_file(&path).unwrap();
        assert_eq!(reloaded.tor.circuit_count, 4);
        assert!(reloaded.database.postgres_password.is_none());
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[tor\nsocks_port = ").unwrap();
        let err = load_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("bad.toml"));
    }
}
