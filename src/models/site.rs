//! Site entity

use super::{check_unit, string_enum, ModelError, OnionAddress};
use crate::util::sha256_hex;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a discovered site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Unknown,
    Discovered,
    Active,
    Inactive,
    Dead,
    Honeypot,
    Scam,
}

string_enum!(SiteStatus, "site status", {
    Unknown => "unknown",
    Discovered => "discovered",
    Active => "active",
    Inactive => "inactive",
    Dead => "dead",
    Honeypot => "honeypot",
    Scam => "scam",
});

/// Coarse content category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteCategory {
    Forum,
    Market,
    Service,
    Library,
    Blog,
    Mirror,
    HiddenService,
    Other,
}

string_enum!(SiteCategory, "site category", {
    Forum => "forum",
    Market => "market",
    Service => "service",
    Library => "library",
    Blog => "blog",
    Mirror => "mirror",
    HiddenService => "hidden_service",
    Other => "other",
});

/// Bucketed risk assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

string_enum!(RiskLevel, "risk level", {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

impl RiskLevel {
    /// Bucket a score in [0, 1]
    pub fn from_score(score: f64) -> Self {
        if score < 0.25 {
            Self::Low
        } else if score < 0.5 {
            Self::Medium
        } else if score < 0.75 {
            Self::High
        } else {
            Self::Critical
        }
    }
}

/// A discovered onion service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    pub onion_address: OnionAddress,
    pub first_seen: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_changed: Option<DateTime<Utc>>,

    pub status: SiteStatus,
    pub category: Option<SiteCategory>,
    pub subcategory: Option<String>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,

    pub language: Option<String>,
    pub title: Option<String>,
    /// SHA-256 of the title, used for mirror detection
    pub title_hash: Option<String>,
    pub description: Option<String>,

    pub is_honeypot: bool,
    pub requires_review: bool,
    pub is_illegal: bool,

    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
}

impl Site {
    /// A freshly discovered site
    pub fn new(onion_address: OnionAddress) -> Self {
        Self {
            id: Uuid::new_v4(),
            onion_address,
            first_seen: Utc::now(),
            last_checked: None,
            last_changed: None,
            status: SiteStatus::Discovered,
            category: None,
            subcategory: None,
            risk_score: 0.0,
            risk_level: RiskLevel::Low,
            language: None,
            title: None,
            title_hash: None,
            description: None,
            is_honeypot: false,
            requires_review: false,
            is_illegal: false,
            tags: Vec::new(),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the risk score and derive its level
    pub fn set_risk(&mut self, score: f64) -> Result<(), ModelError> {
        self.risk_score = check_unit("risk_score", score)?;
        self.risk_level = RiskLevel::from_score(score);
        Ok(())
    }

    /// Set the title and its hash; records a change when the title differs
    pub fn set_title(&mut self, title: impl Into<String>) {
        let title = title.into();
        let hash = sha256_hex(title.as_bytes());
        if self.title_hash.as_deref() != Some(hash.as_str()) {
            if self.title_hash.is_some() {
                self.last_changed = Some(Utc::now());
            }
            self.title_hash = Some(hash);
        }
        self.title = Some(title);
    }

    /// Whether the site is due for a (re)crawl
    pub fn is_crawlable(&self, now: DateTime<Utc>, recheck: Duration) -> bool {
        if !matches!(self.status, SiteStatus::Discovered | SiteStatus::Active) {
            return false;
        }
        if self.is_honeypot || self.is_illegal {
            return false;
        }
        match self.last_checked {
            None => true,
            Some(checked) => checked < now - recheck,
        }
    }

    /// Add a tag once
    pub fn tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }
}
