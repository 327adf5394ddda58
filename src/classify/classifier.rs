//! Rule-based site classifier
//!
//! Each category has a weighted keyword list. Matches in the title count
//! three times, in the meta description twice, in the body once. The best
//! scoring category wins; its share of the total score is the confidence.

use super::PageContent;
use crate::models::{ClassificationResult, ModelType, SiteCategory};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

const TITLE_WEIGHT: f64 = 3.0;
const DESCRIPTION_WEIGHT: f64 = 2.0;
const BODY_WEIGHT: f64 = 1.0;

/// Occurrences of one keyword in the body counted at most this often
const MAX_BODY_HITS: usize = 5;

const MIN_CONFIDENCE: f64 = 0.1;
const MAX_CONFIDENCE: f64 = 0.99;

type KeywordTable = &'static [(&'static str, f64)];

const RULES: &[(SiteCategory, KeywordTable)] = &[
    (
        SiteCategory::Forum,
        &[
            ("forum", 2.0),
            ("thread", 1.0),
            ("topic", 1.0),
            ("reply", 0.5),
            ("members", 1.0),
            ("board", 1.0),
            ("discussion", 1.0),
            ("posts", 0.5),
        ],
    ),
    (
        SiteCategory::Market,
        &[
            ("market", 2.0),
            ("vendor", 2.0),
            ("escrow", 2.0),
            ("add to cart", 2.0),
            ("shop", 1.0),
            ("listing", 1.0),
            ("shipping", 1.0),
            ("price", 0.5),
            ("monero", 0.5),
            ("btc", 0.5),
        ],
    ),
    (
        SiteCategory::Service,
        &[
            ("hosting", 2.0),
            ("email", 1.0),
            ("vpn", 1.0),
            ("mixer", 2.0),
            ("tumbler", 2.0),
            ("pastebin", 2.0),
            ("file upload", 1.5),
            ("search engine", 2.0),
            ("chat", 1.0),
        ],
    ),
    (
        SiteCategory::Library,
        &[
            ("library", 2.0),
            ("ebook", 2.0),
            ("books", 1.0),
            ("pdf", 1.0),
            ("archive", 1.0),
            ("documents", 1.0),
            ("papers", 1.0),
        ],
    ),
    (
        SiteCategory::Blog,
        &[
            ("blog", 2.0),
            ("posted by", 1.5),
            ("posted on", 1.5),
            ("comments", 0.5),
            ("article", 1.0),
            ("read more", 1.0),
        ],
    ),
    (
        SiteCategory::Mirror,
        &[
            ("mirror", 2.0),
            ("official link", 2.0),
            ("verified links", 1.5),
            ("pgp signed", 1.5),
            ("phishing", 1.0),
        ],
    ),
    (
        SiteCategory::HiddenService,
        &[
            ("hidden service", 2.0),
            ("hidden wiki", 2.0),
            ("onion links", 2.0),
            ("link list", 1.5),
            ("directory", 1.0),
            ("wiki", 1.0),
        ],
    ),
];

pub struct RuleClassifier {
    version: String,
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleClassifier {
    pub fn new() -> Self {
        Self {
            version: format!("rules-{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Weighted keyword score per category, in table order
    pub fn scores(&self, content: &PageContent) -> Vec<(SiteCategory, f64)> {
        let title = content.title.as_deref().unwrap_or("").to_lowercase();
        let description = content.description.as_deref().unwrap_or("").to_lowercase();
        let body = content.text.to_lowercase();

        RULES
            .iter()
            .map(|(category, keywords)| {
                let score = keywords
                    .iter()
                    .map(|(keyword, weight)| {
                        let hits = TITLE_WEIGHT * occurrences(&title, keyword) as f64
                            + DESCRIPTION_WEIGHT * occurrences(&description, keyword) as f64
                            + BODY_WEIGHT * occurrences(&body, keyword).min(MAX_BODY_HITS) as f64;
                        hits * weight
                    })
                    .sum();
                (*category, score)
            })
            .collect()
    }

    pub fn classify(&self, site_id: Uuid, content: &PageContent) -> ClassificationResult {
        let scores = self.scores(content);
        let total: f64 = scores.iter().map(|(_, s)| s).sum();

        // First category wins ties
        let (category, confidence) = scores
            .iter()
            .fold(None, |best: Option<(SiteCategory, f64)>, &(cat, score)| match best {
                Some((_, top)) if top >= score => best,
                _ if score > 0.0 => Some((cat, score)),
                _ => best,
            })
            .map(|(cat, top)| (cat, (top / total).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)))
            .unwrap_or((SiteCategory::Other, MIN_CONFIDENCE));

        let score_map: serde_json::Map<String, serde_json::Value> = scores
            .iter()
            .map(|(cat, score)| (cat.as_str().to_string(), json!(score)))
            .collect();

        ClassificationResult {
            id: Uuid::new_v4(),
            site_id,
            category,
            subcategory: None,
            confidence,
            model_version: self.version.clone(),
            model_type: ModelType::RuleBased,
            features: json!({
                "scores": score_map,
                "word_count": content.word_count(),
                "link_count": content.link_count,
                "language": content.language,
            }),
            classified_at: Utc::now(),
        }
    }
}

fn occurrences(haystack: &str, needle: &str) -> usize {
    if haystack.is_empty() {
        0
    } else {
        haystack.matches(needle).count()
    }
}
