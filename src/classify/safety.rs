//! Keyword safety filter
//!
//! Runs before classification. Blocked content is never classified or
//! stored beyond its hash; honeypot indicators quarantine a site; review
//! keywords route it to manual review.

use crate::config::SafetyConfig;
use crate::models::{SafetyAction, SafetyCheckResult};
use crate::util::sha256_hex;
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Reported in every result so checks can be re-run after list changes
pub const FILTER_VERSION: &str = "1.0";

/// Distinct review keywords needed for a full review score
const REVIEW_SATURATION: usize = 4;

pub struct SafetyFilter {
    blocked: Vec<String>,
    review: Vec<String>,
    honeypot: Vec<String>,
    review_threshold: f64,
}

impl SafetyFilter {
    pub fn new(config: &SafetyConfig) -> Self {
        let lower = |items: &[String]| -> Vec<String> {
            items
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect()
        };
        Self {
            blocked: lower(&config.blocked_keywords),
            review: lower(&config.review_keywords),
            honeypot: lower(&config.honeypot_indicators),
            review_threshold: config.review_threshold,
        }
    }

    /// Share of the review list present in `text`, saturating at 1.0
    pub fn review_score(&self, text: &str) -> f64 {
        let lowered = text.to_lowercase();
        self.review_score_lowered(&lowered).0
    }

    fn review_score_lowered(&self, lowered: &str) -> (f64, Vec<String>) {
        let hits = matches(&self.review, lowered);
        let denominator = self.review.len().clamp(1, REVIEW_SATURATION);
        let score = (hits.len() as f64 / denominator as f64).min(1.0);
        (score, hits)
    }

    pub fn check(&self, site_id: Uuid, text: &str) -> SafetyCheckResult {
        let lowered = text.to_lowercase();
        let mut flagged = Vec::new();
        let mut risk_factors = Vec::new();

        let blocked = matches(&self.blocked, &lowered);
        let honeypot = matches(&self.honeypot, &lowered);
        let (review_score, review_hits) = self.review_score_lowered(&lowered);

        let action = if !blocked.is_empty() {
            warn!("Site {} blocked by safety filter", site_id);
            flagged.extend(blocked);
            risk_factors.push("blocked_content".to_string());
            SafetyAction::Block
        } else if !honeypot.is_empty() {
            debug!("Site {} matches honeypot indicators: {:?}", site_id, honeypot);
            risk_factors.push("honeypot_indicator".to_string());
            SafetyAction::Quarantine
        } else if !review_hits.is_empty() && review_score >= self.review_threshold {
            SafetyAction::Review
        } else {
            SafetyAction::Allow
        };

        if action != SafetyAction::Block {
            for hit in review_hits {
                risk_factors.push(format!("review_keyword:{}", hit));
                flagged.push(hit);
            }
        }

        SafetyCheckResult {
            id: Uuid::new_v4(),
            site_id,
            is_safe: action == SafetyAction::Allow,
            action_taken: action,
            flagged_categories: flagged,
            risk_factors,
            filter_version: FILTER_VERSION.to_string(),
            checked_content_hash: Some(sha256_hex(text.as_bytes())),
            checked_at: Utc::now(),
        }
    }
}

fn matches(keywords: &[String], lowered: &str) -> Vec<String> {
    keywords
        .iter()
        .filter(|k| lowered.contains(k.as_str()))
        .cloned()
        .collect()
}
