//! Arachne library crate
//!
//! Discovers onion services over Tor, classifies their content and keeps
//! dangerous material out of the index.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface (discover, classify, status, ...)
//! - [`config`] - Configuration loading and validation
//! - [`tor`] - Control port, circuit pool and isolated HTTP sessions
//! - [`discovery`] - Seed loading, page fetching and the crawler
//! - [`classify`] - Safety filter, category classifier and risk scoring
//! - [`storage`] - Site store (PostgreSQL or in-memory) and job queue
//! - [`scheduler`] - Ingest pipeline and background loops
//! - [`state`] - Runtime counters and metrics snapshots
//! - [`models`] - Domain records shared by every layer
//! - [`util`] - Time, randomization, hashing

#![allow(clippy::doc_markdown)] // Doc formatting is secondary
#![allow(clippy::uninlined_format_args)] // Format string style preference
#![allow(clippy::cast_lossless)] // Explicit casts are fine
#![allow(clippy::cast_sign_loss)] // Controlled context
#![allow(clippy::cast_possible_wrap)] // Controlled context
#![allow(clippy::cast_possible_truncation)] // Counters stay small
#![allow(clippy::cast_precision_loss)] // Counters stay small
#![allow(clippy::option_if_let_else)] // Style preference
#![allow(clippy::single_match_else)] // Match for clarity
#![allow(clippy::items_after_statements)] // Local imports are fine
#![allow(clippy::new_without_default)] // Explicit new() is fine
#![allow(clippy::module_name_repetitions)] // TorManager in tor, SiteStore in storage
#![allow(clippy::too_many_lines)] // Some functions are complex
#![allow(clippy::significant_drop_tightening)] // Lock scope is intentional

pub mod classify;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod logging;
pub mod models;
pub mod scheduler;
pub mod state;
pub mod storage;
pub mod tor;
pub mod util;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
