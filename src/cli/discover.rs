//! Discover command - crawl from seeds and ingest results

use super::{open_pipeline, DiscoverArgs};
use crate::config::Config;
use crate::discovery::load_seeds;
use anyhow::Result;
use tracing::{error, info};

/// Run the discover command
pub async fn run_discover(config: &Config, args: &DiscoverArgs) -> Result<()> {
    let seeds_file = args
        .seeds
        .clone()
        .unwrap_or_else(|| config.discovery.seeds_file.clone());

    if !seeds_file.exists() {
        error!("Seeds file not found: {}", seeds_file.display());
        return Ok(());
    }

    info!("Starting discovery with seeds from {}", seeds_file.display());
    info!("Maximum depth: {}", args.depth);

    let seeds = load_seeds(&seeds_file)?;
    if seeds.is_empty() {
        error!("No valid seeds in {}", seeds_file.display());
        return Ok(());
    }

    let (pipeline, manager) = open_pipeline(config).await?;
    let result = pipeline.discover(seeds, args.depth).await;
    manager.lock().await.stop().await?;
    let report = result?;

    println!("=== Discovery Report ===");
    println!("Seeds:          {}", report.seeds);
    println!("Sites found:    {}", report.sites_found);
    println!("Pages fetched:  {}", report.pages_fetched);
    println!("Fetch errors:   {}", report.fetch_errors);
    println!("Classified:     {}", report.classified);
    println!("Quarantined:    {}", report.quarantined);
    println!("Blocked:        {}", report.blocked);
    println!("Not fetched:    {}", report.unfetched);
    if report.ingest_errors > 0 {
        println!("Ingest errors:  {}", report.ingest_errors);
    }

    Ok(())
}
