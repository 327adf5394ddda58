//! Risk scoring from safety and classification results

use crate::models::{ClassificationResult, RiskLevel, SafetyAction, SafetyCheckResult, SiteCategory};

const PER_FACTOR: f64 = 0.05;

#[derive(Debug, Clone, Copy, Default)]
pub struct RiskScorer;

impl RiskScorer {
    pub fn new() -> Self {
        Self
    }

    /// Baseline risk of a category
    pub fn base(category: SiteCategory) -> f64 {
        match category {
            SiteCategory::Market => 0.6,
            SiteCategory::Mirror => 0.4,
            SiteCategory::Forum | SiteCategory::Service | SiteCategory::HiddenService => 0.3,
            SiteCategory::Library | SiteCategory::Blog | SiteCategory::Other => 0.1,
        }
    }

    fn action_adjustment(action: SafetyAction) -> f64 {
        match action {
            SafetyAction::Block => 0.4,
            SafetyAction::Quarantine => 0.3,
            SafetyAction::Review => 0.2,
            SafetyAction::Allow => 0.0,
        }
    }

    /// Combined score in [0, 1] and its level
    ///
    /// Without a classification (blocked content is never classified) the
    /// lowest category baseline is used.
    pub fn score(
        &self,
        safety: &SafetyCheckResult,
        classification: Option<&ClassificationResult>,
    ) -> (f64, RiskLevel) {
        let base = classification.map_or(Self::base(SiteCategory::Other), |c| Self::base(c.category));
        let score = base
            + Self::action_adjustment(safety.action_taken)
            + PER_FACTOR * safety.risk_factors.len() as f64;
        let score = score.clamp(0.0, 1.0);
        (score, RiskLevel::from_score(score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelType;
    use chrono::Utc;
    use uuid::Uuid;

    fn safety(action: SafetyAction, factors: usize) -> SafetyCheckResult {
        SafetyCheckResult {
            id: Uuid::new_v4(),
            site_id: Uuid::new_v4(),
            is_safe: action == SafetyAction::Allow,
            action_taken: action,
            flagged_categories: Vec::new(),
            risk_factors: (0..factors).map(|i| format!("factor{}", i)).collect(),
            filter_version: "1.0".into(),
            checked_content_hash: None,
            checked_at: Utc::now(),
        }
    }

    fn classification(category: SiteCategory) -> ClassificationResult {
        ClassificationResult {
            id: Uuid::new_v4(),
            site_id: Uuid::new_v4(),
            category,
            subcategory: None,
            confidence: 0.8,
            model_version: "rules-test".into(),
            model_type: ModelType::RuleBased,
            features: serde_json::Value::Null,
            classified_at: Utc::now(),
        }
    }

    #[test]
    fn test_clean_library_is_low() {
        let (score, level) = RiskScorer::new().score(
            &safety(SafetyAction::Allow, 0),
            Some(&classification(SiteCategory::Library)),
        );
        assert!((score - 0.1).abs() < 1e-9);
        assert_eq!(level, RiskLevel::Low);
    }

    #[test]
    fn test_market_under_review() {
        let (score, level) = RiskScorer::new().score(
            &safety(SafetyAction::Review, 2),
            Some(&classification(SiteCategory::Market)),
        );
        assert!((score - 0.9).abs() < 1e-9);
        assert_eq!(level, RiskLevel::Critical);
    }

    #[test]
    fn test_clamped_to_one() {
        let (score, _) = RiskScorer::new().score(
            &safety(SafetyAction::Block, 4),
            Some(&classification(SiteCategory::Market)),
        );
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_blocked_without_classification() {
        let (score, level) = RiskScorer::new().score(&safety(SafetyAction::Block, 1), None);
        assert!((score - 0.55).abs() < 1e-9);
        assert_eq!(level, RiskLevel::High);
    }
}
