//! Init-db command - create the PostgreSQL schema

use crate::config::Config;
use crate::storage::PgStore;
use anyhow::{Context, Result};
use tracing::{error, info};

/// Run the init-db command
///
/// Works whether or not `database.enabled` is set, so the schema can be
/// prepared before switching the store over.
pub async fn run_init_db(config: &Config) -> Result<()> {
    info!("Initializing database...");

    let result = async {
        let store = PgStore::connect(&config.database)
            .await
            .context("Failed to connect to PostgreSQL")?;
        store.init_schema().await.context("Failed to create schema")
    }
    .await;

    match result {
        Ok(()) => {
            info!("Database initialized successfully");
            println!(
                "Database {} on {}:{} is ready",
                config.database.postgres_db, config.database.postgres_host, config.database.postgres_port
            );
            Ok(())
        },
        Err(e) => {
            error!("Failed to initialize database: {:#}", e);
            Err(e)
        },
    }
}
