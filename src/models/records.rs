//! Per-stage result records and operational records

use super::{check_unit, string_enum, ModelError, SiteCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a site was first found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    Seed,
    Crawl,
    Directory,
    Social,
    Api,
}

string_enum!(DiscoveryMethod, "discovery method", {
    Seed => "seed",
    Crawl => "crawl",
    Directory => "directory",
    Social => "social",
    Api => "api",
});

/// Kind of model that produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    RuleBased,
    MlSupervised,
    MlUnsupervised,
    Hybrid,
}

string_enum!(ModelType, "model type", {
    RuleBased => "rule_based",
    MlSupervised => "ml_supervised",
    MlUnsupervised => "ml_unsupervised",
    Hybrid => "hybrid",
});

/// Outcome of the safety filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyAction {
    Allow,
    Block,
    Review,
    Quarantine,
}

string_enum!(SafetyAction, "safety action", {
    Allow => "allow",
    Block => "block",
    Review => "review",
    Quarantine => "quarantine",
});

/// Kind of content fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashType {
    Title,
    ImagePhash,
    TextSimhash,
    Document,
}

string_enum!(HashType, "hash type", {
    Title => "title",
    ImagePhash => "image_phash",
    TextSimhash => "text_simhash",
    Document => "document",
});

/// Audit outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
    Warning,
}

string_enum!(AuditStatus, "audit status", {
    Success => "success",
    Failure => "failure",
    Warning => "warning",
});

/// Result of discovering a site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub id: Uuid,
    pub site_id: Uuid,
    pub source_url: Option<String>,
    pub discovery_method: DiscoveryMethod,
    pub confidence: f64,
    /// SHA-256 of the raw page that referenced the site
    pub raw_content_hash: Option<String>,
    /// Seconds spent fetching and parsing
    pub processing_time: f64,
    pub discovered_at: DateTime<Utc>,
}

impl DiscoveryResult {
    pub fn new(
        site_id: Uuid,
        discovery_method: DiscoveryMethod,
        confidence: f64,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            id: Uuid::new_v4(),
            site_id,
            source_url: None,
            discovery_method,
            confidence: check_unit("confidence", confidence)?,
            raw_content_hash: None,
            processing_time: 0.0,
            discovered_at: Utc::now(),
        })
    }
}

/// Classification of a site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub id: Uuid,
    pub site_id: Uuid,
    pub category: SiteCategory,
    pub subcategory: Option<String>,
    pub confidence: f64,
    pub model_version: String,
    pub model_type: ModelType,
    pub features: serde_json::Value,
    pub classified_at: DateTime<Utc>,
}

/// Result of the safety filter for one piece of content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheckResult {
    pub id: Uuid,
    pub site_id: Uuid,
    pub is_safe: bool,
    pub action_taken: SafetyAction,
    pub flagged_categories: Vec<String>,
    pub risk_factors: Vec<String>,
    pub filter_version: String,
    pub checked_content_hash: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Content fingerprint for deduplication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentHash {
    pub id: Uuid,
    pub site_id: Uuid,
    pub hash_type: HashType,
    pub hash_value: String,
    pub algorithm: String,
    pub content_size: Option<i64>,
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ContentHash {
    /// SHA-256 fingerprint of `content`
    pub fn sha256(site_id: Uuid, hash_type: HashType, content: &[u8]) -> Self {
        Self {
            id: Uuid::new_v4(),
            site_id,
            hash_type,
            hash_value: crate::util::sha256_hex(content),
            algorithm: "sha256".to_string(),
            content_size: i64::try_from(content.len()).ok(),
            mime_type: None,
            created_at: Utc::now(),
        }
    }
}

/// Point-in-time pipeline metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub timestamp: DateTime<Utc>,
    pub circuits_active: i64,
    pub circuits_total: i64,
    pub sites_discovered: i64,
    pub sites_classified: i64,
    pub safety_checks_performed: i64,
    pub requests_per_minute: f64,
    pub error_rate: f64,
    /// Mean fetch latency in seconds
    pub avg_response_time: f64,
}

/// Audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub component: String,
    pub action: String,
    pub status: AuditStatus,
    pub details: serde_json::Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(component: &str, action: &str, status: AuditStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            component: component.to_string(),
            action: action.to_string(),
            status,
            details: serde_json::Value::Null,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error_message = Some(error.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_confidence_checked() {
        let site = Uuid::new_v4();
        assert!(DiscoveryResult::new(site, DiscoveryMethod::Seed, 1.0).is_ok());
        assert!(DiscoveryResult::new(site, DiscoveryMethod::Crawl, 1.5).is_err());
    }

    #[test]
    fn test_content_hash() {
        let h = ContentHash::sha256(Uuid::new_v4(), HashType::Title, b"");
        assert_eq!(h.algorithm, "sha256");
        assert_eq!(h.content_size, Some(0));
        assert_eq!(h.hash_value.len(), 64);
    }

    #[test]
    fn test_audit_builder() {
        let log = AuditLog::new("tor", "rotate", AuditStatus::Failure).with_error("timeout");
        assert_eq!(log.error_message.as_deref(), Some("timeout"));
        assert_eq!(log.details, serde_json::Value::Null);
    }
}
