//! Classify command - classify one site or a batch of due sites

use super::{open_pipeline, ClassifyArgs};
use crate::config::Config;
use anyhow::Result;
use tracing::info;

/// Run the classify command
pub async fn run_classify(config: &Config, args: &ClassifyArgs) -> Result<()> {
    let (pipeline, manager) = open_pipeline(config).await?;

    let result = match args.site_id {
        Some(site_id) => {
            info!("Classifying site: {}", site_id);
            pipeline.classify_site(site_id).await.map(|outcome| {
                println!("Site:     {}", outcome.site_id);
                match outcome.action {
                    Some(action) => println!("Safety:   {}", action),
                    None => println!("Safety:   not checked"),
                }
                match outcome.category {
                    Some(category) => println!("Category: {}", category),
                    None => println!("Category: not classified"),
                }
                if let Some(score) = outcome.risk_score {
                    println!("Risk:     {:.2}", score);
                }
            })
        },
        None => {
            info!("Batch classifying up to {} sites", args.limit);
            pipeline.classify_batch(args.limit).await.map(|report| {
                println!(
                    "Classified {}/{} sites ({} failed)",
                    report.classified, report.attempted, report.failed
                );
            })
        },
    };

    manager.lock().await.stop().await?;
    result
}
