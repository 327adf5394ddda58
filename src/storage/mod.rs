//! Persistence
//!
//! [`SiteStore`] is the repository seam used by the pipeline. Sites are
//! keyed by id and unique by onion address; every per-stage result is
//! appended, never rewritten.

mod memory;
mod postgres;
pub mod queue;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use queue::JobQueue;

use crate::config::DatabaseConfig;
use crate::models::{
    AuditLog, ClassificationResult, ContentHash, CrawlJob, DiscoveryResult, ModelError,
    OnionAddress, SafetyCheckResult, Site, SiteCategory, SiteStatus, SystemMetrics,
};
use async_trait::async_trait;
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid stored value: {0}")]
    Model(#[from] ModelError),
}

/// Field changes for an upsert; `None` leaves the stored value alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteUpdate {
    pub status: Option<SiteStatus>,
    pub category: Option<SiteCategory>,
    pub subcategory: Option<String>,
    pub risk_score: Option<f64>,
    pub language: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_honeypot: Option<bool>,
    pub requires_review: Option<bool>,
    pub is_illegal: Option<bool>,
}

impl SiteUpdate {
    pub fn apply(&self, site: &mut Site) -> Result<(), ModelError> {
        if let Some(status) = self.status {
            site.status = status;
        }
        if let Some(category) = self.category {
            site.category = Some(category);
        }
        if let Some(subcategory) = &self.subcategory {
            site.subcategory = Some(subcategory.clone());
        }
        if let Some(score) = self.risk_score {
            site.set_risk(score)?;
        }
        if let Some(language) = &self.language {
            site.language = Some(language.clone());
        }
        if let Some(title) = &self.title {
            site.set_title(title.clone());
        }
        if let Some(description) = &self.description {
            site.description = Some(description.clone());
        }
        if let Some(flag) = self.is_honeypot {
            site.is_honeypot = flag;
        }
        if let Some(flag) = self.requires_review {
            site.requires_review = flag;
        }
        if let Some(flag) = self.is_illegal {
            site.is_illegal = flag;
        }
        Ok(())
    }
}

/// Site search filters
#[derive(Debug, Clone, PartialEq)]
pub struct SiteQuery {
    /// Case-insensitive substring of title, description or address
    pub text: Option<String>,
    pub category: Option<SiteCategory>,
    pub status: Option<SiteStatus>,
    pub language: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for SiteQuery {
    fn default() -> Self {
        Self {
            text: None,
            category: None,
            status: None,
            language: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl SiteQuery {
    pub(crate) fn matches(&self, site: &Site) -> bool {
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            let hit = |field: Option<&str>| field.is_some_and(|f| f.to_lowercase().contains(&needle));
            if !(hit(site.title.as_deref())
                || hit(site.description.as_deref())
                || hit(Some(site.onion_address.as_str())))
            {
                return false;
            }
        }
        if self.category.is_some() && site.category != self.category {
            return false;
        }
        if self.status.is_some_and(|s| s != site.status) {
            return false;
        }
        if self.language.is_some() && site.language != self.language {
            return false;
        }
        true
    }
}

/// Row counts for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub sites: i64,
    /// Distinct sites with at least one classification
    pub classified: i64,
    pub safety_checks: i64,
    pub pending_jobs: i64,
}

#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Insert a site or apply `update` to the existing one
    ///
    /// Updating an existing site also stamps `last_checked`.
    async fn create_or_update_site(
        &self,
        address: &OnionAddress,
        update: SiteUpdate,
    ) -> Result<Site, StoreError>;

    async fn get_site(&self, id: Uuid) -> Result<Option<Site>, StoreError>;

    async fn get_site_by_address(&self, address: &OnionAddress) -> Result<Option<Site>, StoreError>;

    /// Crawlable sites not checked within `recheck`; never-checked first
    async fn get_pending_sites(&self, limit: usize, recheck: Duration) -> Result<Vec<Site>, StoreError>;

    /// Filtered sites, most recently checked first
    async fn search_sites(&self, query: &SiteQuery) -> Result<Vec<Site>, StoreError>;

    async fn update_site(&self, site: &Site) -> Result<(), StoreError>;

    async fn record_discovery(&self, result: &DiscoveryResult) -> Result<(), StoreError>;

    async fn record_classification(&self, result: &ClassificationResult) -> Result<(), StoreError>;

    async fn record_safety_check(&self, result: &SafetyCheckResult) -> Result<(), StoreError>;

    async fn record_content_hash(&self, hash: &ContentHash) -> Result<(), StoreError>;

    async fn create_crawl_job(&self, job: &CrawlJob) -> Result<(), StoreError>;

    /// Due pending or retrying jobs, highest priority first, then oldest
    async fn get_pending_jobs(&self, limit: usize) -> Result<Vec<CrawlJob>, StoreError>;

    async fn update_job(&self, job: &CrawlJob) -> Result<(), StoreError>;

    async fn record_metrics(&self, metrics: &SystemMetrics) -> Result<(), StoreError>;

    async fn record_audit(&self, entry: &AuditLog) -> Result<(), StoreError>;

    async fn counts(&self) -> Result<StoreCounts, StoreError>;
}

/// PostgreSQL when enabled, otherwise an empty in-memory store
pub async fn open_store(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn SiteStore>> {
    if config.enabled {
        let store = PgStore::connect(config).await?;
        store.init_schema().await?;
        Ok(Arc::new(store))
    } else {
        info!("Database disabled, using in-memory store");
        Ok(Arc::new(MemoryStore::new()))
    }
}
