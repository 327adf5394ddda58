//! Status command - show configuration and store state
//!
//! Displays:
//! - Version and log level
//! - Tor SOCKS and control ports
//! - Discovery depth
//! - Storage backend and row counts
//! - Available commands

use super::{OutputFormat, StatusArgs};
use crate::config::Config;
use crate::storage::{PgStore, SiteStore, StoreCounts};
use anyhow::Result;
use tracing::warn;

const COMMANDS: &[(&str, &str)] = &[
    ("discover", "Crawl from seed addresses and ingest what is found"),
    ("classify", "Classify one site or a batch of due sites"),
    ("status", "Show this status"),
    ("init-db", "Create the PostgreSQL schema"),
    ("tor", "Check the Tor connection and circuits"),
    ("run", "Run the crawler until interrupted"),
    ("config", "Show or save the effective configuration"),
];

/// Run the status command
pub async fn run_status(config: &Config, args: &StatusArgs) -> Result<()> {
    let counts = if config.database.enabled {
        match store_counts(config).await {
            Ok(counts) => Some(counts),
            Err(e) => {
                warn!("Database unreachable: {:#}", e);
                None
            },
        }
    } else {
        None
    };

    match args.format {
        OutputFormat::Json => print_json_status(config, counts)?,
        OutputFormat::Text => print_text_status(config, counts),
    }
    Ok(())
}

async fn store_counts(config: &Config) -> Result<StoreCounts> {
    let store = PgStore::connect(&config.database).await?;
    Ok(store.counts().await?)
}

fn backend_name(config: &Config) -> &'static str {
    if config.database.enabled {
        "postgresql"
    } else {
        "memory"
    }
}

fn print_text_status(config: &Config, counts: Option<StoreCounts>) {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              Arachne Status                                ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");

    println!("📋 General:");
    println!("   Version:   {}", crate::VERSION);
    println!("   Log level: {}", config.log_level);
    println!();

    println!("🧅 Tor:");
    println!("   SOCKS:    {}", config.tor.socks_addr());
    println!("   Control:  {}:{}", config.tor.control_host, config.tor.control_port);
    println!("   Circuits: {} max, {} min lifetime", config.tor.circuit_count, config.tor.circuit_lifetime_minutes);
    println!();

    println!("🕸️  Discovery:");
    println!("   Max depth:  {}", config.discovery.max_depth);
    println!("   Seeds file: {}", config.discovery.seeds_file.display());
    println!();

    println!("💾 Storage:");
    println!("   Backend: {}", backend_name(config));
    if config.database.enabled {
        println!(
            "   Database: {}:{}/{}",
            config.database.postgres_host, config.database.postgres_port, config.database.postgres_db
        );
        match counts {
            Some(counts) => {
                println!("   Sites:         {}", counts.sites);
                println!("   Classified:    {}", counts.classified);
                println!("   Safety checks: {}", counts.safety_checks);
                println!("   Pending jobs:  {}", counts.pending_jobs);
            },
            None => println!("   Status: unreachable"),
        }
    }
    println!();

    println!("📝 Commands:");
    for (name, about) in COMMANDS {
        println!("   {:<10} {}", name, about);
    }
}

fn print_json_status(config: &Config, counts: Option<StoreCounts>) -> Result<()> {
    let status = serde_json::json!({
        "version": crate::VERSION,
        "log_level": config.log_level,
        "tor": {
            "socks_port": config.tor.socks_port,
            "control_port": config.tor.control_port,
            "circuit_count": config.tor.circuit_count,
        },
        "discovery": {
            "max_depth": config.discovery.max_depth,
        },
        "storage": {
            "backend": backend_name(config),
            "counts": counts,
        },
        "commands": COMMANDS.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
    });

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
