//! Breadth-first onion spider
//!
//! Crawls outward from seed addresses one depth level at a time. Each level
//! is fetched concurrently (bounded by a semaphore); link bookkeeping
//! happens between levels on a single task, so no state is shared with the
//! fetch tasks.

use super::extract::{extract_links, extract_onion_addresses};
use super::fetch::{FetchError, Fetcher, Page};
use crate::config::DiscoveryConfig;
use crate::models::{DiscoveryMethod, OnionAddress};
use crate::util::rand::delay_between;
use crate::util::sha256_hex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

const SEED_CONFIDENCE: f64 = 1.0;
const CRAWL_CONFIDENCE: f64 = 0.5;
const REFERRER_BONUS: f64 = 0.1;
const MAX_CRAWL_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiderSettings {
    pub max_pages_per_site: usize,
    pub concurrency: usize,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
}

impl SpiderSettings {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            max_pages_per_site: config.max_pages_per_site,
            concurrency: config.concurrent_requests,
            delay_min_ms: config.request_delay_min_ms,
            delay_max_ms: config.request_delay_max_ms,
        }
    }
}

/// A newly seen onion service
#[derive(Debug, Clone)]
pub struct Discovery {
    pub address: OnionAddress,
    /// Page that first referenced the address; `None` for seeds
    pub source_url: Option<String>,
    pub method: DiscoveryMethod,
    pub confidence: f64,
    /// SHA-256 of the fetched page body
    pub content_hash: Option<String>,
    pub processing_time: Duration,
    /// First page fetched from the service, if it could be fetched
    pub page: Option<Page>,
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    pub pages_fetched: usize,
    pub fetch_errors: usize,
    pub sites_discovered: usize,
    pub links_followed: usize,
}

struct Target {
    url: Url,
    site: OnionAddress,
    depth: u32,
}

struct SiteEntry {
    method: DiscoveryMethod,
    source_url: Option<String>,
    referrers: HashSet<String>,
    depth: u32,
    emitted: bool,
}

impl SiteEntry {
    fn confidence(&self) -> f64 {
        match self.method {
            DiscoveryMethod::Seed => SEED_CONFIDENCE,
            _ => {
                let extra = self.referrers.len().saturating_sub(1) as f64;
                (CRAWL_CONFIDENCE + REFERRER_BONUS * extra).min(MAX_CRAWL_CONFIDENCE)
            },
        }
    }
}

/// Crawl state for one run
#[derive(Default)]
struct Frontier {
    sites: HashMap<OnionAddress, SiteEntry>,
    visited: HashSet<String>,
    pages_per_site: HashMap<OnionAddress, usize>,
    next: Vec<Target>,
}

impl Frontier {
    /// Register a site; returns true when it was not known before
    fn add_site(
        &mut self,
        address: &OnionAddress,
        method: DiscoveryMethod,
        referrer: Option<&str>,
        depth: u32,
    ) -> bool {
        if let Some(entry) = self.sites.get_mut(address) {
            if let Some(r) = referrer {
                entry.referrers.insert(r.to_string());
            }
            return false;
        }
        self.sites.insert(
            address.clone(),
            SiteEntry {
                method,
                source_url: referrer.map(str::to_string),
                referrers: referrer.map(str::to_string).into_iter().collect(),
                depth,
                emitted: false,
            },
        );
        true
    }

    fn push(&mut self, url: Url, site: OnionAddress, depth: u32) {
        self.next.push(Target { url, site, depth });
    }

    /// Drain queued targets, dropping visited URLs and sites over their cap
    fn take_level(&mut self, max_pages_per_site: usize) -> Vec<Target> {
        let queued = std::mem::take(&mut self.next);
        let mut level = Vec::new();
        for target in queued {
            let pages = self.pages_per_site.entry(target.site.clone()).or_insert(0);
            if *pages >= max_pages_per_site {
                continue;
            }
            if !self.visited.insert(target.url.to_string()) {
                continue;
            }
            *pages += 1;
            level.push(target);
        }
        level
    }

    /// Build the discovery for `address` unless it was already emitted
    fn emit(
        &mut self,
        address: &OnionAddress,
        page: Option<Page>,
        elapsed: Duration,
    ) -> Option<Discovery> {
        let entry = self.sites.get_mut(address)?;
        if entry.emitted {
            return None;
        }
        entry.emitted = true;
        Some(Discovery {
            address: address.clone(),
            source_url: entry.source_url.clone(),
            method: entry.method,
            confidence: entry.confidence(),
            content_hash: page.as_ref().map(|p| sha256_hex(&p.body)),
            processing_time: elapsed,
            page,
            depth: entry.depth,
        })
    }
}

pub struct Spider {
    fetcher: Arc<dyn Fetcher>,
    settings: SpiderSettings,
}

impl Spider {
    pub fn new(fetcher: Arc<dyn Fetcher>, settings: SpiderSettings) -> Self {
        Self { fetcher, settings }
    }

    /// Crawl from `seeds`, following links up to `max_depth` hops
    ///
    /// Every onion service seen is sent on `discoveries` exactly once.
    /// Stops early when the receiver is dropped.
    pub async fn crawl(
        &self,
        seeds: &[OnionAddress],
        max_depth: u32,
        discoveries: mpsc::Sender<Discovery>,
    ) -> CrawlStats {
        let mut stats = CrawlStats::default();
        let mut frontier = Frontier::default();

        for seed in seeds {
            if frontier.add_site(seed, DiscoveryMethod::Seed, None, 0) {
                match Url::parse(&seed.root_url()) {
                    Ok(url) => frontier.push(url, seed.clone(), 0),
                    Err(e) => warn!("Unusable seed {}: {}", seed, e),
                }
            }
        }

        let mut depth = 0;
        loop {
            let level = frontier.take_level(self.settings.max_pages_per_site);
            if level.is_empty() {
                break;
            }
            info!("Crawling {} pages at depth {}", level.len(), depth);

            for (target, elapsed, result) in self.fetch_level(level).await {
                let page = match result {
                    Ok(page) => {
                        stats.pages_fetched += 1;
                        Some(page)
                    },
                    Err(e) => {
                        debug!("Fetch of {} failed: {}", target.url, e);
                        stats.fetch_errors += 1;
                        None
                    },
                };

                if let Some(page) = &page {
                    if page.is_html() {
                        stats.links_followed +=
                            self.follow(&mut frontier, page, target.depth, max_depth);
                    }
                }

                if let Some(discovery) = frontier.emit(&target.site, page, elapsed) {
                    stats.sites_discovered += 1;
                    if discoveries.send(discovery).await.is_err() {
                        warn!("Discovery receiver closed, stopping crawl");
                        return stats;
                    }
                }
            }
            depth += 1;
        }

        // Found but never fetched: beyond max_depth, over the page cap, or
        // every queued URL was already visited
        let pending: Vec<OnionAddress> = frontier
            .sites
            .iter()
            .filter(|(_, entry)| !entry.emitted)
            .map(|(addr, _)| addr.clone())
            .collect();
        for address in pending {
            if let Some(discovery) = frontier.emit(&address, None, Duration::ZERO) {
                stats.sites_discovered += 1;
                if discoveries.send(discovery).await.is_err() {
                    break;
                }
            }
        }

        info!(
            "Crawl finished: {} sites, {} pages, {} errors",
            stats.sites_discovered, stats.pages_fetched, stats.fetch_errors
        );
        stats
    }

    /// Queue links and addresses found on `page`; returns links queued
    fn follow(&self, frontier: &mut Frontier, page: &Page, depth: u32, max_depth: u32) -> usize {
        let source = page.url.as_str();
        let next_depth = depth + 1;
        let descend = next_depth <= max_depth;
        let mut queued = 0;

        for address in extract_onion_addresses(&page.body) {
            let is_new = frontier.add_site(&address, DiscoveryMethod::Crawl, Some(source), next_depth);
            if is_new && descend {
                if let Ok(url) = Url::parse(&address.root_url()) {
                    frontier.push(url, address, next_depth);
                    queued += 1;
                }
            }
        }

        for link in extract_links(&page.url, &page.body) {
            let Ok(address) = OnionAddress::parse(link.as_str()) else {
                continue;
            };
            let is_new = frontier.add_site(&address, DiscoveryMethod::Crawl, Some(source), next_depth);
            if !descend {
                continue;
            }
            if is_new {
                if let Ok(root) = Url::parse(&address.root_url()) {
                    if root != link {
                        frontier.push(root, address.clone(), next_depth);
                    }
                }
            }
            frontier.push(link, address, next_depth);
            queued += 1;
        }
        queued
    }

    async fn fetch_level(
        &self,
        level: Vec<Target>,
    ) -> Vec<(Target, Duration, Result<Page, FetchError>)> {
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, target) in level.into_iter().enumerate() {
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);
            let delay = delay_between(self.settings.delay_min_ms, self.settings.delay_max_ms);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                tokio::time::sleep(delay).await;
                let started = Instant::now();
                let result = fetcher.fetch(&target.url).await;
                (index, target, started.elapsed(), result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("Fetch task failed: {}", e),
            }
        }
        // Keep processing order stable regardless of completion order
        results.sort_by_key(|(index, ..)| *index);
        results
            .into_iter()
            .map(|(_, target, elapsed, result)| (target, elapsed, result))
            .collect()
    }
}
