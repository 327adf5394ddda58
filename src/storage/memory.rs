//! In-memory store

use super::{SiteQuery, SiteStore, SiteUpdate, StoreCounts, StoreError};
use crate::models::{
    AuditLog, ClassificationResult, ContentHash, CrawlJob, DiscoveryResult, OnionAddress,
    SafetyCheckResult, Site, SystemMetrics,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    sites: HashMap<Uuid, Site>,
    by_address: HashMap<OnionAddress, Uuid>,
    discoveries: Vec<DiscoveryResult>,
    classifications: Vec<ClassificationResult>,
    safety_checks: Vec<SafetyCheckResult>,
    content_hashes: Vec<ContentHash>,
    jobs: HashMap<Uuid, CrawlJob>,
    metrics: Vec<SystemMetrics>,
    audit: Vec<AuditLog>,
}

/// Process-local store; contents are lost on exit
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn discoveries(&self) -> Vec<DiscoveryResult> {
        self.tables.read().await.discoveries.clone()
    }

    pub async fn classifications(&self) -> Vec<ClassificationResult> {
        self.tables.read().await.classifications.clone()
    }

    pub async fn safety_checks(&self) -> Vec<SafetyCheckResult> {
        self.tables.read().await.safety_checks.clone()
    }

    pub async fn content_hashes(&self) -> Vec<ContentHash> {
        self.tables.read().await.content_hashes.clone()
    }

    pub async fn metrics(&self) -> Vec<SystemMetrics> {
        self.tables.read().await.metrics.clone()
    }

    pub async fn audit_log(&self) -> Vec<AuditLog> {
        self.tables.read().await.audit.clone()
    }

    pub async fn jobs(&self) -> Vec<CrawlJob> {
        self.tables.read().await.jobs.values().cloned().collect()
    }
}

#[async_trait]
impl SiteStore for MemoryStore {
    async fn create_or_update_site(
        &self,
        address: &OnionAddress,
        update: SiteUpdate,
    ) -> Result<Site, StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(id) = tables.by_address.get(address).copied() {
            let site = tables
                .sites
                .get_mut(&id)
                .ok_or(StoreError::NotFound { kind: "site", id })?;
            update.apply(site)?;
            site.last_checked = Some(Utc::now());
            return Ok(site.clone());
        }

        let mut site = Site::new(address.clone());
        update.apply(&mut site)?;
        tables.by_address.insert(address.clone(), site.id);
        tables.sites.insert(site.id, site.clone());
        Ok(site)
    }

    async fn get_site(&self, id: Uuid) -> Result<Option<Site>, StoreError> {
        Ok(self.tables.read().await.sites.get(&id).cloned())
    }

    async fn get_site_by_address(&self, address: &OnionAddress) -> Result<Option<Site>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_address
            .get(address)
            .and_then(|id| tables.sites.get(id))
            .cloned())
    }

    async fn get_pending_sites(&self, limit: usize, recheck: Duration) -> Result<Vec<Site>, StoreError> {
        let now = Utc::now();
        let tables = self.tables.read().await;
        let mut pending: Vec<Site> = tables
            .sites
            .values()
            .filter(|s| s.is_crawlable(now, recheck))
            .cloned()
            .collect();
        pending.sort_by_key(|s| (s.last_checked, s.first_seen));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn search_sites(&self, query: &SiteQuery) -> Result<Vec<Site>, StoreError> {
        let tables = self.tables.read().await;
        let mut found: Vec<Site> = tables
            .sites
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        // Never-checked sites sort last
        found.sort_by(|a, b| b.last_checked.cmp(&a.last_checked));
        Ok(found
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    async fn update_site(&self, site: &Site) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.sites.get_mut(&site.id) {
            Some(stored) => {
                *stored = site.clone();
                Ok(())
            },
            None => Err(StoreError::NotFound {
                kind: "site",
                id: site.id,
            }),
        }
    }

    async fn record_discovery(&self, result: &DiscoveryResult) -> Result<(), StoreError> {
        self.tables.write().await.discoveries.push(result.clone());
        Ok(())
    }

    async fn record_classification(&self, result: &ClassificationResult) -> Result<(), StoreError> {
        self.tables.write().await.classifications.push(result.clone());
        Ok(())
    }

    async fn record_safety_check(&self, result: &SafetyCheckResult) -> Result<(), StoreError> {
        self.tables.write().await.safety_checks.push(result.clone());
        Ok(())
    }

    async fn record_content_hash(&self, hash: &ContentHash) -> Result<(), StoreError> {
        self.tables.write().await.content_hashes.push(hash.clone());
        Ok(())
    }

    async fn create_crawl_job(&self, job: &CrawlJob) -> Result<(), StoreError> {
        self.tables.write().await.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_pending_jobs(&self, limit: usize) -> Result<Vec<CrawlJob>, StoreError> {
        let now = Utc::now();
        let tables = self.tables.read().await;
        let mut due: Vec<CrawlJob> = tables
            .jobs
            .values()
            .filter(|j| j.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn update_job(&self, job: &CrawlJob) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            },
            None => Err(StoreError::NotFound {
                kind: "crawl job",
                id: job.id,
            }),
        }
    }

    async fn record_metrics(&self, metrics: &SystemMetrics) -> Result<(), StoreError> {
        self.tables.write().await.metrics.push(metrics.clone());
        Ok(())
    }

    async fn record_audit(&self, entry: &AuditLog) -> Result<(), StoreError> {
        self.tables.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let now = Utc::now();
        let tables = self.tables.read().await;
        let classified: HashSet<Uuid> = tables.classifications.iter().map(|c| c.site_id).collect();
        let count = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
        Ok(StoreCounts {
            sites: count(tables.sites.len()),
            classified: count(classified.len()),
            safety_checks: count(tables.safety_checks.len()),
            pending_jobs: count(tables.jobs.values().filter(|j| j.is_due(now)).count()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobStatus, SiteCategory, SiteStatus};

    fn addr(seed: u8) -> OnionAddress {
        OnionAddress::from_public_key(&[seed; 32])
    }

    #[tokio::test]
    async fn test_upsert() {
        let store = MemoryStore::new();
        let created = store
            .create_or_update_site(&addr(1), SiteUpdate::default())
            .await
            .unwrap();
        assert!(created.last_checked.is_none());

        let updated = store
            .create_or_update_site(
                &addr(1),
                SiteUpdate {
                    title: Some("Forum".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.title.as_deref(), Some("Forum"));
        assert!(updated.last_checked.is_some());
        assert_eq!(store.counts().await.unwrap().sites, 1);

        let by_address = store.get_site_by_address(&addr(1)).await.unwrap().unwrap();
        assert_eq!(by_address.id, created.id);
        assert!(store.get_site(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_sites_order() {
        let store = MemoryStore::new();
        let checked = store
            .create_or_update_site(&addr(2), SiteUpdate::default())
            .await
            .unwrap();
        let fresh = store
            .create_or_update_site(&addr(3), SiteUpdate::default())
            .await
            .unwrap();
        let mut stale = store
            .create_or_update_site(&addr(4), SiteUpdate::default())
            .await
            .unwrap();
        let mut honeypot = store
            .create_or_update_site(&addr(5), SiteUpdate::default())
            .await
            .unwrap();

        // Recently checked: skipped
        store
            .create_or_update_site(&checked.onion_address, SiteUpdate::default())
            .await
            .unwrap();
        stale.last_checked = Some(Utc::now() - Duration::hours(48));
        store.update_site(&stale).await.unwrap();
        honeypot.is_honeypot = true;
        store.update_site(&honeypot).await.unwrap();

        let pending = store.get_pending_sites(10, Duration::hours(24)).await.unwrap();
        let ids: Vec<Uuid> = pending.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![fresh.id, stale.id]);

        let limited = store.get_pending_sites(1, Duration::hours(24)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_search() {
        let store = MemoryStore::new();
        for (seed, title, category) in [
            (6, "Dread forum", SiteCategory::Forum),
            (7, "Book library", SiteCategory::Library),
            (8, "Another forum", SiteCategory::Forum),
        ] {
            store
                .create_or_update_site(
                    &addr(seed),
                    SiteUpdate {
                        title: Some(title.into()),
                        category: Some(category),
                        status: Some(SiteStatus::Active),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }

        let forums = store
            .search_sites(&SiteQuery {
                text: Some("FORUM".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(forums.len(), 2);

        let page = store
            .search_sites(&SiteQuery {
                category: Some(SiteCategory::Forum),
                limit: 1,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_jobs_by_priority() {
        let store = MemoryStore::new();
        let site = Uuid::new_v4();
        let low = CrawlJob::new(site, "http://a.onion/", 1, 1);
        let high = CrawlJob::new(site, "http://b.onion/", 9, 1);
        let mut done = CrawlJob::new(site, "http://c.onion/", 5, 1);
        done.complete(3);
        for job in [&low, &high, &done] {
            store.create_crawl_job(job).await.unwrap();
        }

        let pending = store.get_pending_jobs(10).await.unwrap();
        let urls: Vec<&str> = pending.iter().map(|j| j.url.as_str()).collect();
        assert_eq!(urls, vec!["http://b.onion/", "http://a.onion/"]);
        assert_eq!(store.counts().await.unwrap().pending_jobs, 2);

        let mut running = pending[0].clone();
        running.start();
        store.update_job(&running).await.unwrap();
        let jobs = store.jobs().await;
        assert!(jobs.iter().any(|j| j.status == JobStatus::Running));

        let missing = CrawlJob::new(site, "http://d.onion/", 0, 1);
        assert!(matches!(
            store.update_job(&missing).await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
