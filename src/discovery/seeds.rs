//! Seed list loading

use crate::models::OnionAddress;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Read seed addresses from `path`
///
/// One address or URL per line. Blank lines and `#` comments are ignored,
/// invalid entries are logged and skipped, duplicates keep their first
/// position.
pub fn load_seeds(path: &Path) -> Result<Vec<OnionAddress>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seeds file {}", path.display()))?;
    let seeds = parse_seeds(&contents);
    info!("Loaded {} seeds from {}", seeds.len(), path.display());
    Ok(seeds)
}

pub fn parse_seeds(contents: &str) -> Vec<OnionAddress> {
    let mut seen = HashSet::new();
    let mut seeds = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let entry = line.split('#').next().unwrap_or("").trim();
        if entry.is_empty() {
            continue;
        }
        match OnionAddress::parse(entry) {
            Ok(addr) => {
                if seen.insert(addr.clone()) {
                    seeds.push(addr);
                }
            },
            Err(e) => warn!("Skipping seed on line {}: {}", lineno + 1, e),
        }
    }
    seeds
}
