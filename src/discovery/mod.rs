//! Onion service discovery
//!
//! Seeds are loaded from a list, crawled breadth-first over Tor, and every
//! onion address seen along the way is reported as a [`Discovery`].

pub mod extract;
pub mod fetch;
pub mod seeds;
pub mod spider;

pub use fetch::{FetchError, Fetcher, Page, TorFetcher, MAX_BODY_BYTES};
pub use seeds::load_seeds;
pub use spider::{CrawlStats, Discovery, Spider, SpiderSettings};
