//! Discovery → safety → classification → storage
//!
//! Every page passes the safety filter before anything else looks at it.
//! Blocked content stops there; only its hash and the site flags are kept.

use crate::classify::{PageContent, RiskScorer, RuleClassifier, SafetyFilter};
use crate::config::Config;
use crate::discovery::extract::{extract_links, extract_onion_addresses};
use crate::discovery::{Discovery, FetchError, Fetcher, Page, Spider, SpiderSettings};
use crate::models::{
    AuditLog, AuditStatus, ContentHash, CrawlJob, DiscoveryMethod, DiscoveryResult, HashType,
    JobStatus, OnionAddress, SafetyAction, Site, SiteCategory, SiteStatus, SystemMetrics,
};
use crate::state::{build_metrics, RuntimeState};
use crate::storage::{JobQueue, SiteStore, SiteUpdate};
use crate::tor::TorStats;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

/// Confidence given to addresses found by crawl jobs
const JOB_DISCOVERY_CONFIDENCE: f64 = 0.5;

/// What happened to one page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub site_id: Uuid,
    pub action: Option<SafetyAction>,
    pub category: Option<SiteCategory>,
    pub risk_score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub seeds: usize,
    pub sites_found: usize,
    pub pages_fetched: usize,
    pub fetch_errors: usize,
    pub ingest_errors: usize,
    pub classified: usize,
    pub blocked: usize,
    pub quarantined: usize,
    /// Found but not fetched; queued as crawl jobs when new
    pub unfetched: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub attempted: usize,
    pub classified: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub processed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub links_found: usize,
}

/// Counts every request into the runtime counters
struct CountingFetcher {
    inner: Arc<dyn Fetcher>,
    state: Arc<RuntimeState>,
}

#[async_trait]
impl Fetcher for CountingFetcher {
    async fn fetch(&self, url: &Url) -> Result<Page, FetchError> {
        let result = self.inner.fetch(url).await;
        match &result {
            Ok(page) => self.state.counters.record_success(page.elapsed),
            Err(_) => self.state.counters.record_error(),
        }
        result
    }
}

pub struct Pipeline {
    store: Arc<dyn SiteStore>,
    fetcher: Arc<dyn Fetcher>,
    safety: SafetyFilter,
    classifier: RuleClassifier,
    risk: RiskScorer,
    spider: SpiderSettings,
    recheck: chrono::Duration,
    state: Arc<RuntimeState>,
}

impl Pipeline {
    pub fn new(config: &Config, store: Arc<dyn SiteStore>, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let hours = config.discovery.recheck_interval_hours;
        let recheck = chrono::Duration::try_hours(hours)
            .with_context(|| format!("Recheck interval of {} hours is out of range", hours))?;
        let state = Arc::new(RuntimeState::new());
        Ok(Self {
            store,
            fetcher: Arc::new(CountingFetcher {
                inner: fetcher,
                state: Arc::clone(&state),
            }),
            safety: SafetyFilter::new(&config.safety),
            classifier: RuleClassifier::new(),
            risk: RiskScorer::new(),
            spider: SpiderSettings::from_config(&config.discovery),
            recheck,
            state,
        })
    }

    pub fn store(&self) -> &Arc<dyn SiteStore> {
        &self.store
    }

    pub fn state(&self) -> &Arc<RuntimeState> {
        &self.state
    }

    /// Store a discovery and process its page
    ///
    /// Sites first seen without a page get a crawl job so they are fetched
    /// later.
    pub async fn ingest(&self, discovery: Discovery) -> Result<Option<IngestOutcome>> {
        let existed = self
            .store
            .get_site_by_address(&discovery.address)
            .await?
            .is_some();
        let site = self
            .store
            .create_or_update_site(&discovery.address, SiteUpdate::default())
            .await?;

        let mut result = DiscoveryResult::new(site.id, discovery.method, discovery.confidence)?;
        result.source_url = discovery.source_url.clone();
        result.raw_content_hash = discovery.content_hash.clone();
        result.processing_time = discovery.processing_time.as_secs_f64();
        self.store.record_discovery(&result).await?;

        match discovery.page {
            Some(page) => self.process_page(&site, &page).await.map(Some),
            None => {
                if !existed {
                    self.enqueue_root(&site, discovery.confidence).await?;
                }
                Ok(None)
            },
        }
    }

    async fn enqueue_root(&self, site: &Site, confidence: f64) -> Result<()> {
        let priority = (confidence * 10.0).round() as i32;
        let job = CrawlJob::new(site.id, site.onion_address.root_url(), priority, 1);
        self.store.create_crawl_job(&job).await?;
        debug!("Queued crawl job for {}", site.onion_address);
        Ok(())
    }

    /// Safety check, then classification and risk scoring for allowed pages
    pub async fn process_page(&self, site: &Site, page: &Page) -> Result<IngestOutcome> {
        let content = PageContent::from_page(page);
        let safety = self.safety.check(site.id, &content.full_text());
        self.store.record_safety_check(&safety).await?;

        let action = safety.action_taken;
        match action {
            SafetyAction::Block => {
                let (score, _) = self.risk.score(&safety, None);
                let update = SiteUpdate {
                    is_illegal: Some(true),
                    requires_review: Some(true),
                    risk_score: Some(score),
                    ..Default::default()
                };
                self.store
                    .create_or_update_site(&site.onion_address, update)
                    .await?;
                let audit = AuditLog::new("safety", "block", AuditStatus::Warning)
                    .with_details(serde_json::json!({
                        "site_id": site.id,
                        "flagged": safety.flagged_categories,
                    }));
                self.store.record_audit(&audit).await?;
                warn!("Blocked content on {}", site.onion_address);
                return Ok(IngestOutcome {
                    site_id: site.id,
                    action: Some(action),
                    category: None,
                    risk_score: Some(score),
                });
            },
            SafetyAction::Quarantine => {
                let (score, _) = self.risk.score(&safety, None);
                let update = SiteUpdate {
                    status: Some(SiteStatus::Honeypot),
                    is_honeypot: Some(true),
                    risk_score: Some(score),
                    title: content.title.clone(),
                    ..Default::default()
                };
                self.store
                    .create_or_update_site(&site.onion_address, update)
                    .await?;
                self.record_hashes(site.id, &content, page).await?;
                info!("Quarantined {} as a likely honeypot", site.onion_address);
                return Ok(IngestOutcome {
                    site_id: site.id,
                    action: Some(action),
                    category: None,
                    risk_score: Some(score),
                });
            },
            SafetyAction::Allow | SafetyAction::Review => {},
        }

        let classification = self.classifier.classify(site.id, &content);
        self.store.record_classification(&classification).await?;
        let (score, level) = self.risk.score(&safety, Some(&classification));

        let update = SiteUpdate {
            status: Some(SiteStatus::Active),
            category: Some(classification.category),
            subcategory: classification.subcategory.clone(),
            risk_score: Some(score),
            language: content.language.clone(),
            title: content.title.clone(),
            description: content.description.clone(),
            requires_review: Some(action == SafetyAction::Review),
            ..Default::default()
        };
        self.store
            .create_or_update_site(&site.onion_address, update)
            .await?;
        self.record_hashes(site.id, &content, page).await?;

        debug!(
            "Classified {} as {} ({:.2}), risk {} ({:.2})",
            site.onion_address, classification.category, classification.confidence, level, score
        );
        Ok(IngestOutcome {
            site_id: site.id,
            action: Some(action),
            category: Some(classification.category),
            risk_score: Some(score),
        })
    }

    async fn record_hashes(&self, site_id: Uuid, content: &PageContent, page: &Page) -> Result<()> {
        if let Some(title) = &content.title {
            let hash = ContentHash::sha256(site_id, HashType::Title, title.as_bytes());
            self.store.record_content_hash(&hash).await?;
        }
        let mut document = ContentHash::sha256(site_id, HashType::Document, page.body.as_bytes());
        document.mime_type = page.content_type.clone();
        self.store.record_content_hash(&document).await?;
        Ok(())
    }

    /// Crawl from `seeds` and ingest everything found
    pub async fn discover(&self, seeds: Vec<OnionAddress>, max_depth: u32) -> Result<DiscoveryReport> {
        let mut report = DiscoveryReport {
            seeds: seeds.len(),
            ..Default::default()
        };
        info!("Starting discovery from {} seeds (depth {})", seeds.len(), max_depth);

        let spider = Spider::new(Arc::clone(&self.fetcher), self.spider);
        let (tx, mut rx) = mpsc::channel(64);
        let crawl = tokio::spawn(async move { spider.crawl(&seeds, max_depth, tx).await });

        while let Some(discovery) = rx.recv().await {
            report.sites_found += 1;
            let address = discovery.address.clone();
            match self.ingest(discovery).await {
                Ok(Some(outcome)) => match outcome.action {
                    Some(SafetyAction::Block) => report.blocked += 1,
                    Some(SafetyAction::Quarantine) => report.quarantined += 1,
                    _ => report.classified += 1,
                },
                Ok(None) => report.unfetched += 1,
                Err(e) => {
                    error!("Failed to ingest {}: {:#}", address, e);
                    report.ingest_errors += 1;
                },
            }
        }

        let stats = crawl.await.context("Crawl task failed")?;
        report.pages_fetched = stats.pages_fetched;
        report.fetch_errors = stats.fetch_errors;

        let audit = AuditLog::new("discovery", "crawl", AuditStatus::Success)
            .with_details(serde_json::to_value(&report)?);
        self.store.record_audit(&audit).await?;
        info!(
            "Discovery complete: {} sites, {} classified, {} blocked",
            report.sites_found, report.classified, report.blocked
        );
        Ok(report)
    }

    /// Fetch a stored site's root page and run it through the pipeline
    pub async fn classify_site(&self, site_id: Uuid) -> Result<IngestOutcome> {
        let site = self
            .store
            .get_site(site_id)
            .await?
            .with_context(|| format!("Site {} not found", site_id))?;
        let url = Url::parse(&site.onion_address.root_url())?;
        let page = self
            .fetcher
            .fetch(&url)
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;
        self.process_page(&site, &page).await
    }

    /// Classify up to `limit` sites due for a check
    pub async fn classify_batch(&self, limit: usize) -> Result<BatchReport> {
        let sites = self.store.get_pending_sites(limit, self.recheck).await?;
        let mut report = BatchReport {
            attempted: sites.len(),
            ..Default::default()
        };
        for site in sites {
            match self.classify_site(site.id).await {
                Ok(_) => report.classified += 1,
                Err(e) => {
                    warn!("Classification of {} failed: {:#}", site.onion_address, e);
                    report.failed += 1;
                    // Stamp last_checked so the site waits a full recheck interval
                    self.store
                        .create_or_update_site(&site.onion_address, SiteUpdate::default())
                        .await?;
                },
            }
        }
        info!(
            "Batch classification: {}/{} succeeded",
            report.classified, report.attempted
        );
        Ok(report)
    }

    /// Run up to `limit` due crawl jobs
    pub async fn run_jobs(&self, limit: usize) -> Result<JobReport> {
        let due = self.store.get_pending_jobs(limit).await?;
        // Per run; unreached jobs stay pending in the store
        let mut queue: JobQueue = due.into_iter().collect();

        let mut report = JobReport::default();
        while let Some(mut job) = queue.pop() {
            report.processed += 1;
            job.start();
            self.store.update_job(&job).await?;

            match self.run_job(&job).await {
                Ok(links) => {
                    job.complete(links);
                    report.completed += 1;
                    report.links_found += links;
                },
                Err(e) => {
                    let retryable = e
                        .downcast_ref::<FetchError>()
                        .map_or(true, FetchError::is_retryable);
                    if !retryable {
                        job.retry_count = job.max_retries;
                    }
                    job.fail(format!("{:#}", e));
                    if job.status == JobStatus::Retry {
                        report.retried += 1;
                    } else {
                        report.failed += 1;
                    }
                    debug!("Job {} for {} failed: {:#}", job.id, job.url, e);
                },
            }
            self.store.update_job(&job).await?;
        }
        if report.processed > 0 {
            info!(
                "Ran {} crawl jobs: {} completed, {} retrying, {} failed",
                report.processed, report.completed, report.retried, report.failed
            );
        }
        Ok(report)
    }

    /// Fetch a job's URL, process the page, ingest referenced sites
    async fn run_job(&self, job: &CrawlJob) -> Result<usize> {
        let site = self
            .store
            .get_site(job.site_id)
            .await?
            .with_context(|| format!("Site {} not found", job.site_id))?;
        let url = Url::parse(&job.url)?;
        let page = self.fetcher.fetch(&url).await?;
        let outcome = self.process_page(&site, &page).await?;
        if matches!(outcome.action, Some(SafetyAction::Block)) {
            return Ok(0);
        }

        let mut found: BTreeSet<OnionAddress> = extract_onion_addresses(&page.body).into_iter().collect();
        found.extend(
            extract_links(&page.url, &page.body)
                .iter()
                .filter_map(|link| OnionAddress::parse(link.as_str()).ok()),
        );
        found.remove(&site.onion_address);

        let links = found.len();
        for address in found {
            let discovery = Discovery {
                address,
                source_url: Some(page.url.to_string()),
                method: DiscoveryMethod::Crawl,
                confidence: JOB_DISCOVERY_CONFIDENCE,
                content_hash: None,
                processing_time: std::time::Duration::ZERO,
                page: None,
                depth: 1,
            };
            self.ingest(discovery).await?;
        }
        Ok(links)
    }

    /// Metrics for the window since the previous snapshot
    pub async fn metrics_snapshot(&self, tor: Option<TorStats>) -> Result<SystemMetrics> {
        let counts = self.store.counts().await?;
        let (snapshot, window) = self.state.take_window();
        Ok(build_metrics(tor, counts, snapshot, window))
    }

    /// Take a metrics snapshot and store it
    pub async fn record_metrics(&self, tor: Option<TorStats>) -> Result<SystemMetrics> {
        let metrics = self.metrics_snapshot(tor).await?;
        self.store.record_metrics(&metrics).await?;
        Ok(metrics)
    }
}
