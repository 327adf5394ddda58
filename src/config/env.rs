//! Environment overrides
//!
//! Variables come from the process environment first, then from a `.env`
//! file. The file never overrides a variable that is already set.

use super::Config;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Variable lookup used while applying overrides
pub(crate) struct EnvSource {
    dotenv: HashMap<String, String>,
}

impl EnvSource {
    /// Process environment plus `.env` in the working directory, if any
    pub fn load() -> Result<Self> {
        let path = Path::new(".env");
        let dotenv = if path.exists() {
            parse_dotenv(
                &std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
            )
        } else {
            HashMap::new()
        };
        Ok(Self { dotenv })
    }

    #[cfg(test)]
    pub fn from_map(dotenv: HashMap<String, String>) -> Self {
        Self { dotenv }
    }

    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .or_else(|| self.dotenv.get(key).cloned())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("Invalid value for {}: {:?} ({})", key, raw, e)),
        }
    }
}

/// Parse `KEY=VALUE` lines; `#` starts a comment, surrounding quotes are stripped
pub(crate) fn parse_dotenv(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

macro_rules! set {
    ($env:expr, $key:literal, $target:expr) => {
        if let Some(value) = $env.parse($key)? {
            $target = value;
        }
    };
    ($env:expr, $key:literal, $target:expr, optional) => {
        if let Some(value) = $env.parse($key)? {
            $target = Some(value);
        }
    };
}

/// Apply every known override to `config`
pub(crate) fn apply(config: &mut Config, env: &EnvSource) -> Result<()> {
    set!(env, "LOG_LEVEL", config.log_level);
    set!(env, "LOG_FILE", config.log_file, optional);
    set!(env, "METRICS_PORT", config.metrics_port);

    let tor = &mut config.tor;
    set!(env, "TOR_CONTROL_HOST", tor.control_host);
    set!(env, "TOR_SOCKS_PORT", tor.socks_port);
    set!(env, "TOR_CONTROL_PORT", tor.control_port);
    set!(env, "TOR_PASSWORD", tor.control_password, optional);
    set!(env, "TOR_CIRCUIT_COUNT", tor.circuit_count);
    set!(env, "TOR_CIRCUIT_LIFETIME", tor.circuit_lifetime_minutes);
    set!(env, "TOR_MAX_REQUESTS", tor.max_requests_per_circuit);
    set!(env, "TOR_ENTRY_GUARDS", tor.entry_guards);
    set!(env, "TOR_BINARY", tor.tor_binary);
    set!(env, "TOR_DATA_DIR", tor.data_dir);

    let discovery = &mut config.discovery;
    set!(env, "DISCOVERY_MAX_DEPTH", discovery.max_depth);
    set!(env, "DISCOVERY_MAX_PAGES", discovery.max_pages_per_site);
    set!(env, "DISCOVERY_CONCURRENT", discovery.concurrent_requests);
    set!(env, "DISCOVERY_DELAY_MIN", discovery.request_delay_min_ms);
    set!(env, "DISCOVERY_DELAY_MAX", discovery.request_delay_max_ms);
    set!(env, "USER_AGENTS_FILE", discovery.user_agents_file, optional);
    set!(env, "DISCOVERY_SEEDS_FILE", discovery.seeds_file);

    set!(env, "SAFETY_REVIEW_THRESHOLD", config.safety.review_threshold);

    let db = &mut config.database;
    set!(env, "DATABASE_ENABLED", db.enabled);
    set!(env, "POSTGRES_HOST", db.postgres_host);
    set!(env, "POSTGRES_PORT", db.postgres_port);
    set!(env, "POSTGRES_USER", db.postgres_user);
    set!(env, "POSTGRES_PASSWORD", db.postgres_password, optional);
    set!(env, "POSTGRES_DB", db.postgres_db);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotenv() {
        let vars = parse_dotenv(
            "# comment\n\nTOR_SOCKS_PORT=9150\nexport POSTGRES_PASSWORD=\"p@ss word\"\nLOG_LEVEL='debug'\nbroken line\n",
        );
        assert_eq!(vars.get("TOR_SOCKS_PORT").map(String::as_str), Some("9150"));
        assert_eq!(vars.get("POSTGRES_PASSWORD").map(String::as_str), Some("p@ss word"));
        assert_eq!(vars.get("LOG_LEVEL").map(String::as_str), Some("debug"));
        assert_eq!(vars.len(), 3);
    }

    #[test]
    fn test_apply_from_dotenv() {
        // Keys chosen so they are unlikely to be set in the test environment
        let mut map = HashMap::new();
        map.insert("DISCOVERY_MAX_PAGES".to_string(), "7".to_string());
        map.insert("TOR_ENTRY_GUARDS".to_string(), "5".to_string());
        let env = EnvSource::from_map(map);

        let mut config = Config::default();
        apply(&mut config, &env).unwrap();
        assert_eq!(config.discovery.max_pages_per_site, 7);
        assert_eq!(config.tor.entry_guards, 5);
    }

    #[test]
    fn test_invalid_value_is_error() {
        let mut map = HashMap::new();
        map.insert("DISCOVERY_CONCURRENT".to_string(), "lots".to_string());
        let env = EnvSource::from_map(map);

        let mut config = Config::default();
        let err = apply(&mut config, &env).unwrap_err();
        assert!(err.to_string().contains("DISCOVERY_CONCURRENT"));
    }
}
