//! End-to-end tests for the ingest pipeline
//!
//! Pages are served by a canned fetcher and everything lands in the
//! in-memory store, so these run without Tor or PostgreSQL.

use arachne::config::Config;
use arachne::discovery::{Discovery, FetchError, Fetcher, Page};
use arachne::models::{
    AuditLog, ClassificationResult, ContentHash, CrawlJob, DiscoveryMethod, DiscoveryResult,
    HashType, JobStatus, OnionAddress, SafetyAction, SafetyCheckResult, Site, SiteCategory,
    SiteStatus, SystemMetrics,
};
use arachne::scheduler::Pipeline;
use arachne::storage::{MemoryStore, SiteQuery, SiteStore, SiteUpdate, StoreCounts, StoreError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

#[derive(Default)]
struct CannedFetcher {
    pages: HashMap<String, String>,
    timeouts: HashSet<String>,
    requests: Mutex<Vec<String>>,
}

impl CannedFetcher {
    fn page(mut self, address: &OnionAddress, body: impl Into<String>) -> Self {
        self.pages.insert(address.root_url(), body.into());
        self
    }

    fn timing_out(mut self, address: &OnionAddress) -> Self {
        self.timeouts.insert(address.root_url());
        self
    }

    fn requests_for(&self, address: &OnionAddress) -> usize {
        let url = address.root_url();
        self.requests.lock().unwrap().iter().filter(|r| **r == url).count()
    }
}

#[async_trait]
impl Fetcher for CannedFetcher {
    async fn fetch(&self, url: &Url) -> Result<Page, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        if self.timeouts.contains(url.as_str()) {
            return Err(FetchError::Timeout);
        }
        match self.pages.get(url.as_str()) {
            Some(body) => Ok(Page {
                url: url.clone(),
                status: 200,
                content_type: Some("text/html".into()),
                body: body.clone(),
                elapsed: Duration::from_millis(250),
            }),
            None => Err(FetchError::Status(404)),
        }
    }
}

fn addr(seed: u8) -> OnionAddress {
    OnionAddress::from_public_key(&[seed; 32])
}

fn config() -> Config {
    let mut config = Config::default();
    config.discovery.request_delay_min_ms = 0;
    config.discovery.request_delay_max_ms = 0;
    config
}

fn pipeline(fetcher: CannedFetcher) -> (Pipeline, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(&config(), store.clone(), Arc::new(fetcher)).unwrap();
    (pipeline, store)
}

/// Memory store whose next `update_job` fails once armed
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_next_job_update: AtomicBool,
}

#[async_trait]
impl SiteStore for FlakyStore {
    async fn create_or_update_site(
        &self,
        address: &OnionAddress,
        update: SiteUpdate,
    ) -> Result<Site, StoreError> {
        self.inner.create_or_update_site(address, update).await
    }

    async fn get_site(&self, id: Uuid) -> Result<Option<Site>, StoreError> {
        self.inner.get_site(id).await
    }

    async fn get_site_by_address(&self, address: &OnionAddress) -> Result<Option<Site>, StoreError> {
        self.inner.get_site_by_address(address).await
    }

    async fn get_pending_sites(
        &self,
        limit: usize,
        recheck: chrono::Duration,
    ) -> Result<Vec<Site>, StoreError> {
        self.inner.get_pending_sites(limit, recheck).await
    }

    async fn search_sites(&self, query: &SiteQuery) -> Result<Vec<Site>, StoreError> {
        self.inner.search_sites(query).await
    }

    async fn update_site(&self, site: &Site) -> Result<(), StoreError> {
        self.inner.update_site(site).await
    }

    async fn record_discovery(&self, result: &DiscoveryResult) -> Result<(), StoreError> {
        self.inner.record_discovery(result).await
    }

    async fn record_classification(&self, result: &ClassificationResult) -> Result<(), StoreError> {
        self.inner.record_classification(result).await
    }

    async fn record_safety_check(&self, result: &SafetyCheckResult) -> Result<(), StoreError> {
        self.inner.record_safety_check(result).await
    }

    async fn record_content_hash(&self, hash: &ContentHash) -> Result<(), StoreError> {
        self.inner.record_content_hash(hash).await
    }

    async fn create_crawl_job(&self, job: &CrawlJob) -> Result<(), StoreError> {
        self.inner.create_crawl_job(job).await
    }

    async fn get_pending_jobs(&self, limit: usize) -> Result<Vec<CrawlJob>, StoreError> {
        self.inner.get_pending_jobs(limit).await
    }

    async fn update_job(&self, job: &CrawlJob) -> Result<(), StoreError> {
        if self.fail_next_job_update.swap(false, Ordering::SeqCst) {
            return Err(StoreError::NotFound {
                kind: "crawl job",
                id: job.id,
            });
        }
        self.inner.update_job(job).await
    }

    async fn record_metrics(&self, metrics: &SystemMetrics) -> Result<(), StoreError> {
        self.inner.record_metrics(metrics).await
    }

    async fn record_audit(&self, entry: &AuditLog) -> Result<(), StoreError> {
        self.inner.record_audit(entry).await
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        self.inner.counts().await
    }
}

fn forum_page(links: &[&OnionAddress]) -> String {
    let anchors: String = links
        .iter()
        .map(|a| format!(r#"<a href="http://{}/">next</a>"#, a))
        .collect();
    format!(
        "<html lang=\"en\"><head><title>Freedom Forum</title></head>\
         <body><h1>Forum</h1><p>Latest thread from our members, join the discussion.</p>{}</body></html>",
        anchors
    )
}

fn fetched(address: &OnionAddress, body: &str) -> Discovery {
    let url = Url::parse(&address.root_url()).unwrap();
    Discovery {
        address: address.clone(),
        source_url: Some(url.to_string()),
        method: DiscoveryMethod::Seed,
        confidence: 1.0,
        content_hash: None,
        processing_time: Duration::ZERO,
        page: Some(Page {
            url,
            status: 200,
            content_type: Some("text/html".into()),
            body: body.to_string(),
            elapsed: Duration::ZERO,
        }),
        depth: 0,
    }
}

#[tokio::test]
async fn test_discover_classifies_seed_and_queues_found_sites() {
    let (a, b) = (addr(1), addr(2));
    let (pipeline, store) = pipeline(CannedFetcher::default().page(&a, forum_page(&[&b])));

    let report = pipeline.discover(vec![a.clone()], 0).await.unwrap();
    assert_eq!(report.seeds, 1);
    assert_eq!(report.sites_found, 2);
    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.classified, 1);
    assert_eq!(report.unfetched, 1);
    assert_eq!(report.ingest_errors, 0);

    let seed = store.get_site_by_address(&a).await.unwrap().unwrap();
    assert_eq!(seed.status, SiteStatus::Active);
    assert_eq!(seed.category, Some(SiteCategory::Forum));
    assert_eq!(seed.title.as_deref(), Some("Freedom Forum"));
    assert_eq!(seed.language.as_deref(), Some("en"));
    assert!(!seed.requires_review);

    let found = store.get_site_by_address(&b).await.unwrap().unwrap();
    let jobs = store.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].site_id, found.id);
    assert_eq!(jobs[0].url, b.root_url());

    assert_eq!(store.discoveries().await.len(), 2);
    let audit = store.audit_log().await;
    assert!(audit.iter().any(|e| e.component == "discovery" && e.action == "crawl"));
}

#[tokio::test]
async fn test_blocked_page_is_flagged_and_not_classified() {
    let a = addr(3);
    let (pipeline, store) = pipeline(CannedFetcher::default());

    let outcome = pipeline
        .ingest(fetched(&a, "<title>Links</title><p>csam collection</p>"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.action, Some(SafetyAction::Block));
    assert!(outcome.category.is_none());

    let site = store.get_site_by_address(&a).await.unwrap().unwrap();
    assert!(site.is_illegal);
    assert!(site.requires_review);
    assert!(site.category.is_none());

    assert!(store.classifications().await.is_empty());
    assert!(store.content_hashes().await.is_empty());
    let checks = store.safety_checks().await;
    assert_eq!(checks.len(), 1);
    assert!(!checks[0].is_safe);
    assert!(store
        .audit_log()
        .await
        .iter()
        .any(|e| e.component == "safety" && e.action == "block"));
}

#[tokio::test]
async fn test_honeypot_is_quarantined_with_hashes() {
    let a = addr(4);
    let (pipeline, store) = pipeline(CannedFetcher::default());

    let outcome = pipeline
        .ingest(fetched(
            &a,
            "<title>Notice</title><p>This site has been seized as part of a law enforcement operation.</p>",
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.action, Some(SafetyAction::Quarantine));

    let site = store.get_site_by_address(&a).await.unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Honeypot);
    assert!(site.is_honeypot);
    assert_eq!(site.title.as_deref(), Some("Notice"));

    assert!(store.classifications().await.is_empty());
    let hashes = store.content_hashes().await;
    assert_eq!(hashes.len(), 2);
    assert!(hashes.iter().any(|h| h.hash_type == HashType::Title));
    assert!(hashes.iter().any(|h| h.hash_type == HashType::Document));
}

#[tokio::test]
async fn test_review_keywords_mark_site_for_review() {
    let a = addr(5);
    let (pipeline, store) = pipeline(CannedFetcher::default());

    let outcome = pipeline
        .ingest(fetched(
            &a,
            "<title>Shop</title><p>weapons and explosives, ask the vendor</p>",
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.action, Some(SafetyAction::Review));
    assert!(outcome.category.is_some());

    let site = store.get_site_by_address(&a).await.unwrap().unwrap();
    assert!(site.requires_review);
    assert_eq!(store.classifications().await.len(), 1);
}

#[tokio::test]
async fn test_run_jobs_fetches_and_ingests_links() {
    let (a, b, c) = (addr(6), addr(7), addr(8));
    let fetcher = CannedFetcher::default()
        .page(&a, forum_page(&[&b]))
        .page(&b, forum_page(&[&c, &a]));
    let (pipeline, store) = pipeline(fetcher);

    pipeline.discover(vec![a.clone()], 0).await.unwrap();
    let report = pipeline.run_jobs(10).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.links_found, 2);

    let b_site = store.get_site_by_address(&b).await.unwrap().unwrap();
    assert_eq!(b_site.category, Some(SiteCategory::Forum));

    // c is new and gets its own job; a already existed and does not
    let c_site = store.get_site_by_address(&c).await.unwrap().unwrap();
    let jobs = store.jobs().await;
    assert_eq!(jobs.len(), 2);
    let b_job = jobs.iter().find(|j| j.site_id == b_site.id).unwrap();
    assert_eq!(b_job.status, JobStatus::Completed);
    assert_eq!(b_job.discovered_links, 2);
    let c_job = jobs.iter().find(|j| j.site_id == c_site.id).unwrap();
    assert_eq!(c_job.status, JobStatus::Pending);
}

#[tokio::test]
async fn test_missing_page_fails_job_without_retry() {
    let (a, b) = (addr(9), addr(10));
    let (pipeline, store) = pipeline(CannedFetcher::default().page(&a, forum_page(&[&b])));

    pipeline.discover(vec![a], 0).await.unwrap();
    let report = pipeline.run_jobs(10).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.retried, 0);

    let jobs = store.jobs().await;
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert!(jobs[0].error_message.as_deref().unwrap_or("").contains("404"));
}

#[tokio::test]
async fn test_classify_batch_and_metrics() {
    let (a, b) = (addr(11), addr(12));
    let (pipeline, store) = pipeline(CannedFetcher::default().page(&a, forum_page(&[])));

    store
        .create_or_update_site(&a, Default::default())
        .await
        .unwrap();
    let unreachable = store
        .create_or_update_site(&b, Default::default())
        .await
        .unwrap();

    let report = pipeline.classify_batch(10).await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.classified, 1);
    assert_eq!(report.failed, 1);

    let stamped = store.get_site(unreachable.id).await.unwrap().unwrap();
    assert!(stamped.last_checked.is_some());

    let metrics = pipeline.record_metrics(None).await.unwrap();
    assert_eq!(metrics.sites_discovered, 2);
    assert_eq!(metrics.sites_classified, 1);
    assert_eq!(metrics.safety_checks_performed, 1);
    assert!((metrics.error_rate - 0.5).abs() < 1e-9);
    assert!((metrics.avg_response_time - 0.25).abs() < 1e-9);
    assert_eq!(store.metrics().await.len(), 1);
}

#[tokio::test]
async fn test_timeout_schedules_job_retry() {
    let (a, b) = (addr(13), addr(14));
    let fetcher = CannedFetcher::default()
        .page(&a, forum_page(&[&b]))
        .timing_out(&b);
    let (pipeline, store) = pipeline(fetcher);

    pipeline.discover(vec![a], 0).await.unwrap();
    let before = chrono::Utc::now();
    let report = pipeline.run_jobs(10).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.retried, 1);
    assert_eq!(report.failed, 0);

    let jobs = store.jobs().await;
    assert_eq!(jobs[0].status, JobStatus::Retry);
    assert_eq!(jobs[0].retry_count, 1);
    assert!(jobs[0].scheduled_for > before);
    assert!(jobs[0].error_message.as_deref().unwrap_or("").contains("timed out"));

    // Not due again until the backoff elapses
    assert_eq!(pipeline.run_jobs(10).await.unwrap().processed, 0);
}

#[tokio::test]
async fn test_failed_job_run_does_not_repeat_jobs() {
    let (a, b, c) = (addr(15), addr(16), addr(17));
    let fetcher = Arc::new(
        CannedFetcher::default()
            .page(&a, forum_page(&[&b, &c]))
            .page(&b, forum_page(&[]))
            .page(&c, forum_page(&[])),
    );
    let store = Arc::new(FlakyStore::default());
    let pipeline = Pipeline::new(&config(), store.clone(), fetcher.clone()).unwrap();

    pipeline.discover(vec![a], 0).await.unwrap();
    assert_eq!(store.inner.jobs().await.len(), 2);

    store.fail_next_job_update.store(true, Ordering::SeqCst);
    assert!(pipeline.run_jobs(10).await.is_err());

    let report = pipeline.run_jobs(10).await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(fetcher.requests_for(&b), 1);
    assert_eq!(fetcher.requests_for(&c), 1);
    assert!(store
        .inner
        .jobs()
        .await
        .iter()
        .all(|j| j.status == JobStatus::Completed));
}

#[tokio::test]
async fn test_out_of_range_recheck_interval_is_an_error() {
    let mut config = config();
    config.discovery.recheck_interval_hours = i64::MAX / 2;
    let result = Pipeline::new(
        &config,
        Arc::new(MemoryStore::new()),
        Arc::new(CannedFetcher::default()),
    );
    assert!(result.is_err());
}
