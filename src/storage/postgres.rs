//! PostgreSQL store
//!
//! Queries are checked at runtime so the crate builds without a live
//! database. Enums are stored as their lowercase names.

use super::{SiteQuery, SiteStore, SiteUpdate, StoreCounts, StoreError};
use crate::config::DatabaseConfig;
use crate::models::{
    AuditLog, ClassificationResult, ContentHash, CrawlJob, DiscoveryResult, OnionAddress,
    SafetyCheckResult, Site, SystemMetrics,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::info;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS sites (
        id UUID PRIMARY KEY,
        onion_address VARCHAR(62) NOT NULL UNIQUE,
        first_seen TIMESTAMPTZ NOT NULL,
        last_checked TIMESTAMPTZ,
        last_changed TIMESTAMPTZ,
        status TEXT NOT NULL,
        category TEXT,
        subcategory VARCHAR(100),
        risk_score DOUBLE PRECISION NOT NULL DEFAULT 0,
        risk_level TEXT NOT NULL DEFAULT 'low',
        language VARCHAR(10),
        title TEXT,
        title_hash VARCHAR(64),
        description TEXT,
        is_honeypot BOOLEAN NOT NULL DEFAULT FALSE,
        requires_review BOOLEAN NOT NULL DEFAULT FALSE,
        is_illegal BOOLEAN NOT NULL DEFAULT FALSE,
        tags TEXT[] NOT NULL DEFAULT '{}',
        metadata JSONB NOT NULL DEFAULT '{}'
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_sites_status_category ON sites (status, category)",
    "CREATE INDEX IF NOT EXISTS idx_sites_last_checked ON sites (last_checked)",
    "CREATE INDEX IF NOT EXISTS idx_sites_title_hash ON sites (title_hash)",
    r#"CREATE TABLE IF NOT EXISTS discovery_results (
        id UUID PRIMARY KEY,
        site_id UUID NOT NULL REFERENCES sites (id),
        source_url TEXT,
        discovery_method TEXT NOT NULL,
        confidence DOUBLE PRECISION NOT NULL,
        raw_content_hash VARCHAR(64),
        processing_time DOUBLE PRECISION,
        discovered_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_discovery_site ON discovery_results (site_id)",
    r#"CREATE TABLE IF NOT EXISTS classifications (
        id UUID PRIMARY KEY,
        site_id UUID NOT NULL REFERENCES sites (id),
        category TEXT NOT NULL,
        subcategory VARCHAR(100),
        confidence DOUBLE PRECISION NOT NULL,
        model_version VARCHAR(50) NOT NULL,
        model_type TEXT NOT NULL,
        features JSONB,
        classified_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_classifications_site ON classifications (site_id)",
    r#"CREATE TABLE IF NOT EXISTS safety_checks (
        id UUID PRIMARY KEY,
        site_id UUID NOT NULL REFERENCES sites (id),
        is_safe BOOLEAN NOT NULL,
        action_taken TEXT NOT NULL,
        flagged_categories TEXT[] NOT NULL DEFAULT '{}',
        risk_factors TEXT[] NOT NULL DEFAULT '{}',
        filter_version VARCHAR(50),
        checked_content_hash VARCHAR(64),
        checked_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_safety_site ON safety_checks (site_id)",
    r#"CREATE TABLE IF NOT EXISTS crawl_jobs (
        id UUID PRIMARY KEY,
        site_id UUID NOT NULL REFERENCES sites (id),
        url TEXT NOT NULL,
        priority INTEGER NOT NULL DEFAULT 0,
        max_depth INTEGER NOT NULL DEFAULT 1,
        status TEXT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL DEFAULT 3,
        error_message TEXT,
        discovered_links INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL,
        scheduled_for TIMESTAMPTZ NOT NULL,
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        metadata JSONB NOT NULL DEFAULT '{}'
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_status_priority ON crawl_jobs (status, priority)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_scheduled ON crawl_jobs (scheduled_for)",
    r#"CREATE TABLE IF NOT EXISTS content_hashes (
        id UUID PRIMARY KEY,
        site_id UUID NOT NULL REFERENCES sites (id),
        hash_type TEXT NOT NULL,
        hash_value VARCHAR(128) NOT NULL,
        algorithm VARCHAR(50) NOT NULL,
        content_size BIGINT,
        mime_type TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_hashes_value ON content_hashes (hash_value)",
    r#"CREATE TABLE IF NOT EXISTS system_metrics (
        id UUID PRIMARY KEY,
        timestamp TIMESTAMPTZ NOT NULL,
        circuits_active BIGINT,
        circuits_total BIGINT,
        sites_discovered BIGINT,
        sites_classified BIGINT,
        safety_checks_performed BIGINT,
        requests_per_minute DOUBLE PRECISION,
        error_rate DOUBLE PRECISION,
        avg_response_time DOUBLE PRECISION
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_metrics_timestamp ON system_metrics (timestamp)",
    r#"CREATE TABLE IF NOT EXISTS audit_logs (
        id UUID PRIMARY KEY,
        component VARCHAR(100) NOT NULL,
        action VARCHAR(100) NOT NULL,
        status TEXT NOT NULL,
        details JSONB,
        error_message TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_audit_component_action ON audit_logs (component, action)",
    "CREATE INDEX IF NOT EXISTS idx_audit_created_status ON audit_logs (created_at, status)",
];

const SITE_COLUMNS: &str = "id, onion_address, first_seen, last_checked, last_changed, status, \
    category, subcategory, risk_score, risk_level, language, title, title_hash, description, \
    is_honeypot, requires_review, is_illegal, tags, metadata";

const JOB_COLUMNS: &str = "id, site_id, url, priority, max_depth, status, retry_count, \
    max_retries, error_message, discovered_links, created_at, scheduled_for, started_at, \
    completed_at, metadata";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        info!(
            "Connecting to PostgreSQL at {}:{} (max_connections={})",
            config.postgres_host, config.postgres_port, config.max_connections
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url())
            .await?;
        Ok(Self { pool })
    }

    /// Create every table and index that does not exist yet
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!("Database schema ready ({} statements)", SCHEMA.len());
        Ok(())
    }

    async fn insert_site(&self, site: &Site) -> Result<bool, StoreError> {
        let result = sqlx::query(&format!(
            "INSERT INTO sites ({SITE_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
             ON CONFLICT (onion_address) DO NOTHING"
        ))
        .bind(site.id)
        .bind(site.onion_address.as_str())
        .bind(site.first_seen)
        .bind(site.last_checked)
        .bind(site.last_changed)
        .bind(site.status.as_str())
        .bind(site.category.map(|c| c.as_str()))
        .bind(&site.subcategory)
        .bind(site.risk_score)
        .bind(site.risk_level.as_str())
        .bind(&site.language)
        .bind(&site.title)
        .bind(&site.title_hash)
        .bind(&site.description)
        .bind(site.is_honeypot)
        .bind(site.requires_review)
        .bind(site.is_illegal)
        .bind(&site.tags)
        .bind(&site.metadata)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn site_from_row(row: &PgRow) -> Result<Site, StoreError> {
    let address: String = row.try_get("onion_address")?;
    let category: Option<String> = row.try_get("category")?;
    Ok(Site {
        id: row.try_get("id")?,
        onion_address: OnionAddress::parse(&address)?,
        first_seen: row.try_get("first_seen")?,
        last_checked: row.try_get("last_checked")?,
        last_changed: row.try_get("last_changed")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        category: category.map(|c| c.parse()).transpose()?,
        subcategory: row.try_get("subcategory")?,
        risk_score: row.try_get("risk_score")?,
        risk_level: row.try_get::<String, _>("risk_level")?.parse()?,
        language: row.try_get("language")?,
        title: row.try_get("title")?,
        title_hash: row.try_get("title_hash")?,
        description: row.try_get("description")?,
        is_honeypot: row.try_get("is_honeypot")?,
        requires_review: row.try_get("requires_review")?,
        is_illegal: row.try_get("is_illegal")?,
        tags: row.try_get("tags")?,
        metadata: row.try_get("metadata")?,
    })
}

fn job_from_row(row: &PgRow) -> Result<CrawlJob, StoreError> {
    Ok(CrawlJob {
        id: row.try_get("id")?,
        site_id: row.try_get("site_id")?,
        url: row.try_get("url")?,
        priority: row.try_get("priority")?,
        max_depth: row.try_get("max_depth")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        error_message: row.try_get("error_message")?,
        discovered_links: row.try_get("discovered_links")?,
        created_at: row.try_get("created_at")?,
        scheduled_for: row.try_get("scheduled_for")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        metadata: row.try_get("metadata")?,
    })
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl SiteStore for PgStore {
    async fn create_or_update_site(
        &self,
        address: &OnionAddress,
        update: SiteUpdate,
    ) -> Result<Site, StoreError> {
        if let Some(mut site) = self.get_site_by_address(address).await? {
            update.apply(&mut site)?;
            site.last_checked = Some(Utc::now());
            self.update_site(&site).await?;
            return Ok(site);
        }

        let mut site = Site::new(address.clone());
        update.apply(&mut site)?;
        if self.insert_site(&site).await? {
            return Ok(site);
        }

        // Lost an insert race; apply the update to the winner
        let mut existing = self
            .get_site_by_address(address)
            .await?
            .ok_or(StoreError::NotFound {
                kind: "site",
                id: site.id,
            })?;
        update.apply(&mut existing)?;
        existing.last_checked = Some(Utc::now());
        self.update_site(&existing).await?;
        Ok(existing)
    }

    async fn get_site(&self, id: Uuid) -> Result<Option<Site>, StoreError> {
        let row = sqlx::query(&format!("SELECT {SITE_COLUMNS} FROM sites WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(site_from_row).transpose()
    }

    async fn get_site_by_address(&self, address: &OnionAddress) -> Result<Option<Site>, StoreError> {
        let row = sqlx::query(&format!("SELECT {SITE_COLUMNS} FROM sites WHERE onion_address = $1"))
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(site_from_row).transpose()
    }

    async fn get_pending_sites(&self, limit: usize, recheck: Duration) -> Result<Vec<Site>, StoreError> {
        let cutoff = Utc::now() - recheck;
        let rows = sqlx::query(&format!(
            "SELECT {SITE_COLUMNS} FROM sites \
             WHERE (last_checked IS NULL OR last_checked < $1) \
               AND status IN ('discovered', 'active') \
               AND NOT is_honeypot AND NOT is_illegal \
             ORDER BY last_checked ASC NULLS FIRST, first_seen ASC \
             LIMIT $2"
        ))
        .bind(cutoff)
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(site_from_row).collect()
    }

    async fn search_sites(&self, query: &SiteQuery) -> Result<Vec<Site>, StoreError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {SITE_COLUMNS} FROM sites WHERE TRUE"));
        if let Some(text) = &query.text {
            let pattern = contains_pattern(text);
            builder
                .push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR description ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR onion_address ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(category) = query.category {
            builder.push(" AND category = ").push_bind(category.as_str());
        }
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(language) = &query.language {
            builder.push(" AND language = ").push_bind(language.clone());
        }
        builder
            .push(" ORDER BY last_checked DESC NULLS LAST LIMIT ")
            .push_bind(to_i64(query.limit))
            .push(" OFFSET ")
            .push_bind(to_i64(query.offset));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(site_from_row).collect()
    }

    async fn update_site(&self, site: &Site) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE sites SET last_checked = $2, last_changed = $3, status = $4, category = $5, \
             subcategory = $6, risk_score = $7, risk_level = $8, language = $9, title = $10, \
             title_hash = $11, description = $12, is_honeypot = $13, requires_review = $14, \
             is_illegal = $15, tags = $16, metadata = $17 WHERE id = $1",
        )
        .bind(site.id)
        .bind(site.last_checked)
        .bind(site.last_changed)
        .bind(site.status.as_str())
        .bind(site.category.map(|c| c.as_str()))
        .bind(&site.subcategory)
        .bind(site.risk_score)
        .bind(site.risk_level.as_str())
        .bind(&site.language)
        .bind(&site.title)
        .bind(&site.title_hash)
        .bind(&site.description)
        .bind(site.is_honeypot)
        .bind(site.requires_review)
        .bind(site.is_illegal)
        .bind(&site.tags)
        .bind(&site.metadata)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "site",
                id: site.id,
            });
        }
        Ok(())
    }

    async fn record_discovery(&self, result: &DiscoveryResult) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO discovery_results (id, site_id, source_url, discovery_method, confidence, \
             raw_content_hash, processing_time, discovered_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(result.id)
        .bind(result.site_id)
        .bind(&result.source_url)
        .bind(result.discovery_method.as_str())
        .bind(result.confidence)
        .bind(&result.raw_content_hash)
        .bind(result.processing_time)
        .bind(result.discovered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_classification(&self, result: &ClassificationResult) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO classifications (id, site_id, category, subcategory, confidence, \
             model_version, model_type, features, classified_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(result.id)
        .bind(result.site_id)
        .bind(result.category.as_str())
        .bind(&result.subcategory)
        .bind(result.confidence)
        .bind(&result.model_version)
        .bind(result.model_type.as_str())
        .bind(&result.features)
        .bind(result.classified_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_safety_check(&self, result: &SafetyCheckResult) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO safety_checks (id, site_id, is_safe, action_taken, flagged_categories, \
             risk_factors, filter_version, checked_content_hash, checked_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(result.id)
        .bind(result.site_id)
        .bind(result.is_safe)
        .bind(result.action_taken.as_str())
        .bind(&result.flagged_categories)
        .bind(&result.risk_factors)
        .bind(&result.filter_version)
        .bind(&result.checked_content_hash)
        .bind(result.checked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_content_hash(&self, hash: &ContentHash) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO content_hashes (id, site_id, hash_type, hash_value, algorithm, \
             content_size, mime_type, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(hash.id)
        .bind(hash.site_id)
        .bind(hash.hash_type.as_str())
        .bind(&hash.hash_value)
        .bind(&hash.algorithm)
        .bind(hash.content_size)
        .bind(&hash.mime_type)
        .bind(hash.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_crawl_job(&self, job: &CrawlJob) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO crawl_jobs ({JOB_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
        ))
        .bind(job.id)
        .bind(job.site_id)
        .bind(&job.url)
        .bind(job.priority)
        .bind(job.max_depth)
        .bind(job.status.as_str())
        .bind(job.retry_count)
        .bind(job.max_retries)
        .bind(&job.error_message)
        .bind(job.discovered_links)
        .bind(job.created_at)
        .bind(job.scheduled_for)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_pending_jobs(&self, limit: usize) -> Result<Vec<CrawlJob>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM crawl_jobs \
             WHERE status IN ('pending', 'retry') AND scheduled_for <= $1 \
             ORDER BY priority DESC, created_at ASC LIMIT $2"
        ))
        .bind(Utc::now())
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn update_job(&self, job: &CrawlJob) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE crawl_jobs SET status = $2, retry_count = $3, error_message = $4, \
             discovered_links = $5, scheduled_for = $6, started_at = $7, completed_at = $8, \
             metadata = $9 WHERE id = $1",
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(job.retry_count)
        .bind(&job.error_message)
        .bind(job.discovered_links)
        .bind(job.scheduled_for)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.metadata)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "crawl job",
                id: job.id,
            });
        }
        Ok(())
    }

    async fn record_metrics(&self, metrics: &SystemMetrics) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO system_metrics (id, timestamp, circuits_active, circuits_total, \
             sites_discovered, sites_classified, safety_checks_performed, requests_per_minute, \
             error_rate, avg_response_time) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(Uuid::new_v4())
        .bind(metrics.timestamp)
        .bind(metrics.circuits_active)
        .bind(metrics.circuits_total)
        .bind(metrics.sites_discovered)
        .bind(metrics.sites_classified)
        .bind(metrics.safety_checks_performed)
        .bind(metrics.requests_per_minute)
        .bind(metrics.error_rate)
        .bind(metrics.avg_response_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_audit(&self, entry: &AuditLog) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO audit_logs (id, component, action, status, details, error_message, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(&entry.component)
        .bind(&entry.action)
        .bind(entry.status.as_str())
        .bind(&entry.details)
        .bind(&entry.error_message)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let row = sqlx::query(
            "SELECT \
               (SELECT COUNT(*) FROM sites) AS sites, \
               (SELECT COUNT(DISTINCT site_id) FROM classifications) AS classified, \
               (SELECT COUNT(*) FROM safety_checks) AS safety_checks, \
               (SELECT COUNT(*) FROM crawl_jobs \
                  WHERE status IN ('pending', 'retry') AND scheduled_for <= NOW()) AS pending_jobs",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(StoreCounts {
            sites: row.try_get("sites")?,
            classified: row.try_get("classified")?,
            safety_checks: row.try_get("safety_checks")?,
            pending_jobs: row.try_get("pending_jobs")?,
        })
    }
}

/// `ILIKE` pattern matching `text` anywhere, with wildcards taken literally
fn contains_pattern(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}
