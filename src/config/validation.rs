//! Configuration validation
//!
//! Fail-fast validation of configuration invariants.

use super::Config;
use anyhow::{bail, Result};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const MAX_DEPTH_LIMIT: u32 = 10;
/// One day
const MAX_CIRCUIT_LIFETIME_MINUTES: u64 = 1440;
/// One year
const MAX_RECHECK_HOURS: i64 = 8760;

/// Validate configuration invariants
pub fn validate(config: &Config) -> Result<()> {
    validate_logging(config)?;
    validate_tor(config)?;
    validate_discovery(config)?;
    validate_safety(config)?;
    Ok(())
}

fn validate_logging(config: &Config) -> Result<()> {
    if !LOG_LEVELS.contains(&config.log_level.to_ascii_lowercase().as_str()) {
        bail!(
            "log_level must be one of {:?}, got {:?}",
            LOG_LEVELS,
            config.log_level
        );
    }
    Ok(())
}

fn validate_tor(config: &Config) -> Result<()> {
    let tor = &config.tor;
    if tor.circuit_count == 0 {
        bail!("tor.circuit_count must be at least 1");
    }
    if tor.circuit_lifetime_minutes == 0 {
        bail!("tor.circuit_lifetime_minutes must be at least 1");
    }
    if tor.circuit_lifetime_minutes > MAX_CIRCUIT_LIFETIME_MINUTES {
        bail!(
            "tor.circuit_lifetime_minutes ({}) exceeds the limit of {}",
            tor.circuit_lifetime_minutes,
            MAX_CIRCUIT_LIFETIME_MINUTES
        );
    }
    if tor.max_requests_per_circuit == 0 {
        bail!("tor.max_requests_per_circuit must be at least 1");
    }
    if tor.socks_port == tor.control_port {
        bail!(
            "tor.socks_port and tor.control_port must differ (both {})",
            tor.socks_port
        );
    }
    Ok(())
}

fn validate_discovery(config: &Config) -> Result<()> {
    let discovery = &config.discovery;
    if discovery.request_delay_min_ms > discovery.request_delay_max_ms {
        bail!(
            "discovery.request_delay_min_ms ({}) must not exceed request_delay_max_ms ({})",
            discovery.request_delay_min_ms,
            discovery.request_delay_max_ms
        );
    }
    if discovery.concurrent_requests == 0 {
        bail!("discovery.concurrent_requests must be at least 1");
    }
    if discovery.max_depth > MAX_DEPTH_LIMIT {
        bail!(
            "discovery.max_depth ({}) exceeds the limit of {}",
            discovery.max_depth,
            MAX_DEPTH_LIMIT
        );
    }
    if discovery.recheck_interval_hours < 0 {
        bail!("discovery.recheck_interval_hours cannot be negative");
    }
    if discovery.recheck_interval_hours > MAX_RECHECK_HOURS {
        bail!(
            "discovery.recheck_interval_hours ({}) exceeds the limit of {}",
            discovery.recheck_interval_hours,
            MAX_RECHECK_HOURS
        );
    }
    Ok(())
}

fn validate_safety(config: &Config) -> Result<()> {
    if !(0.0..=1.0).contains(&config.safety.review_threshold) {
        bail!(
            "safety.review_threshold must be within [0, 1], got {}",
            config.safety.review_threshold
        );
    }
    Ok(())
}
