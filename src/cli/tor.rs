//! Tor command - check the control port and circuit pool

use super::TorArgs;
use crate::config::Config;
use crate::tor::{create_tor_manager, TorController};
use anyhow::Result;
use tracing::{info, warn};

/// Run the tor command
pub async fn run_tor(config: &Config, args: &TorArgs) -> Result<()> {
    match TorController::connect(&config.tor).await {
        Ok(mut controller) => {
            let version = controller.version().await.unwrap_or_else(|_| "unknown".to_string());
            let bootstrapped = controller.is_bootstrapped().await.unwrap_or(false);
            println!("Tor version:  {}", version);
            println!("Bootstrapped: {}", if bootstrapped { "yes" } else { "no" });
            if let Ok((read, written)) = controller.traffic().await {
                println!("Traffic:      {} bytes read, {} bytes written", read, written);
            }
            if args.rotate {
                controller.signal_newnym().await?;
            }
        },
        Err(e) => warn!("Control port not reachable yet: {:#}", e),
    }

    let mut manager = create_tor_manager(config).await?;
    print_stats("Circuits", &manager.stats());

    if args.rotate {
        info!("Rotating circuits on request");
        let built = manager.rotate_all().await;
        println!("Rotated, {} new circuits built", built);
        print_stats("After rotation", &manager.stats());
    }

    manager.stop().await
}

fn print_stats(label: &str, stats: &crate::tor::TorStats) {
    println!("{}:", label);
    println!("   Total:   {}", stats.total_circuits);
    println!("   Active:  {}", stats.active_circuits);
    println!("   Healthy: {}", stats.healthy_circuits);
}
