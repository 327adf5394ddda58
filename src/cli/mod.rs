//! Command-line interface for Arachne
//!
//! Provides main commands:
//! - `discover` - Crawl from seed addresses and ingest what is found
//! - `classify` - Classify one stored site or a batch of due sites
//! - `status` - Show configuration and storage status
//! - `init-db` - Create the PostgreSQL schema
//! - `tor` - Check the Tor connection and circuit pool
//! - `run` - Run the scheduler daemon
//! - `config` - Show or save the effective configuration

mod classify;
mod config;
mod discover;
mod init_db;
mod status;
mod tor;

pub use classify::run_classify;
pub use config::run_config;
pub use discover::run_discover;
pub use init_db::run_init_db;
pub use status::run_status;
pub use tor::run_tor;

use crate::discovery::TorFetcher;
use crate::scheduler::Pipeline;
use crate::storage::open_store;
use crate::tor::{create_tor_manager, TorController, TorManager};
use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Default depth for `discover`
pub const DEFAULT_DEPTH: u32 = 2;

/// Arachne - onion service discovery and classification
#[derive(Parser, Debug)]
#[command(name = "arachne")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "configs/default.toml")]
    pub config: PathBuf,

    /// Log level (overrides the configuration)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Verbose output (same as --log-level debug)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover new onion services from seed addresses
    Discover(DiscoverArgs),

    /// Classify discovered sites
    Classify(ClassifyArgs),

    /// Show system status
    Status(StatusArgs),

    /// Create the database schema
    InitDb,

    /// Check Tor connectivity and circuits
    Tor(TorArgs),

    /// Run the scheduler daemon
    Run,

    /// Show or save the effective configuration
    Config(ConfigArgs),
}

/// Arguments for discover command
#[derive(Parser, Debug)]
pub struct DiscoverArgs {
    /// File containing seed addresses (defaults to discovery.seeds_file)
    #[arg(short, long)]
    pub seeds: Option<PathBuf>,

    /// Crawl depth
    #[arg(short, long, default_value_t = DEFAULT_DEPTH)]
    pub depth: u32,
}

/// Arguments for classify command
#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["site_id", "batch"])))]
pub struct ClassifyArgs {
    /// Site ID to classify
    #[arg(long)]
    pub site_id: Option<Uuid>,

    /// Classify every site that is due for a check
    #[arg(long)]
    pub batch: bool,

    /// Maximum sites in a batch
    #[arg(long, default_value_t = 100)]
    pub limit: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Arguments for status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Arguments for tor command
#[derive(Parser, Debug)]
pub struct TorArgs {
    /// Replace every circuit after the check
    #[arg(long, default_value_t = false)]
    pub rotate: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Write the effective configuration to a file (database settings omitted)
    Save {
        /// Destination file
        path: PathBuf,
    },
}

type SharedManager = Arc<Mutex<TorManager<TorController>>>;

/// Store, Tor circuits and pipeline for one-shot commands
async fn open_pipeline(config: &crate::config::Config) -> Result<(Pipeline, SharedManager)> {
    let store = open_store(&config.database).await?;
    let manager = Arc::new(Mutex::new(create_tor_manager(config).await?));
    let fetcher = Arc::new(TorFetcher::new(Arc::clone(&manager)));
    Ok((Pipeline::new(config, store, fetcher)?, manager))
}
