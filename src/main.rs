//! Arachne - onion service discovery and classification
//!
//! Crawls the Tor network from seed addresses, extracts new onion
//! addresses, and classifies each site it can reach.
//!
//! # Architecture
//!
//! Every request goes through the local Tor SOCKS port on its own isolated
//! circuit. Pages pass the safety filter before anything else looks at
//! them; blocked content is never classified or hashed.
//!
//! # Usage
//!
//! ```bash
//! # Crawl from the default seed list
//! arachne discover --depth 2
//!
//! # Classify sites that are due
//! arachne classify --batch --limit 50
//!
//! # Check status
//! arachne status --format json
//!
//! # Run daemon
//! arachne run
//! ```

use anyhow::Result;
use arachne::cli::{self, Cli, Commands};
use arachne::{config, logging, scheduler};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = config::load_config(Some(&cli.config))?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    } else if cli.verbose {
        config.log_level = "debug".to_string();
    }
    config::validate(&config)?;

    logging::init(&config.log_level, config.log_file.as_deref())?;

    match &cli.command {
        Commands::Discover(args) => {
            cli::run_discover(&config, args).await?;
        },
        Commands::Classify(args) => {
            cli::run_classify(&config, args).await?;
        },
        Commands::Status(args) => {
            cli::run_status(&config, args).await?;
        },
        Commands::InitDb => {
            cli::run_init_db(&config).await?;
        },
        Commands::Tor(args) => {
            cli::run_tor(&config, args).await?;
        },
        Commands::Run => {
            scheduler::run(config).await?;
        },
        Commands::Config(args) => {
            cli::run_config(&config, args)?;
        },
    }

    Ok(())
}
