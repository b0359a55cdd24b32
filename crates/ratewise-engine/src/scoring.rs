//! Match specificity and confidence.
//!
//! ```text
//! specificity = wc * container + ww * weight + wv * validity     (weights sum to 1)
//! validity    = (recency + tightness) / 2
//! recency     = 1 / (1 + age_days / recency_horizon)
//! tightness   = 1 / (1 + span_days / tightness_horizon)
//! confidence  = clamp(similarity^a * specificity^b, 0, 1)
//! ```
//!
//! Every component lies in `[0, 1]`, so confidence is non-decreasing in
//! both similarity and specificity.

use chrono::NaiveDate;

use ratewise_core::config::{ScoringConfig, SimilarityNormalization};
use ratewise_core::types::{QueryCriteria, RouteRecord, TierContainment};
use ratewise_storage::TierMatch;

#[derive(Debug, Clone)]
pub struct MatchScorer {
    config: ScoringConfig,
    normalization: SimilarityNormalization,
}

impl MatchScorer {
    pub fn new(config: ScoringConfig, normalization: SimilarityNormalization) -> Self {
        Self {
            config,
            normalization,
        }
    }

    /// How precisely `tier` of `record` answers `criteria`, in `[0, 1]`.
    ///
    /// A query without a container type earns nothing for the container
    /// component, so its specificity is capped at one minus the normalized
    /// container weight (0.6 with the default weights) and it cannot clear
    /// the default auto-send threshold.
    pub fn specificity(&self, criteria: &QueryCriteria, record: &RouteRecord, tier: &TierMatch) -> f64 {
        let (wc, ww, wv) = self.config.normalized_weights();

        // Routes are filtered on the container type when one is given, so a
        // returned route always matches it exactly.
        let container = if criteria.container_type.is_some() { 1.0 } else { 0.0 };

        let weight = match tier.containment {
            TierContainment::Bracket => 1.0,
            // A single open bracket is the rate for every weight.
            TierContainment::StartingRate
                if record.route.tiers.len() == 1
                    && tier.tier.min_weight == 0.0
                    && tier.tier.max_weight.is_none() =>
            {
                1.0
            }
            TierContainment::StartingRate => 0.0,
        };

        let validity = self.validity(record, criteria.as_of);
        (wc * container + ww * weight + wv * validity).clamp(0.0, 1.0)
    }

    /// Recency and tightness of the route's validity window.
    ///
    /// Age is measured from `valid_from`, or the upload date when the window
    /// has no start. An open-ended window counts as one horizon long.
    pub fn validity(&self, record: &RouteRecord, as_of: NaiveDate) -> f64 {
        let issued = record
            .route
            .valid_from
            .unwrap_or_else(|| record.document.uploaded_at.date_naive());
        let age_days = (as_of - issued).num_days().max(0) as f64;
        let recency_horizon = f64::from(self.config.recency_horizon_days.max(1));
        let recency = 1.0 / (1.0 + age_days / recency_horizon);

        let tightness_horizon = f64::from(self.config.tightness_horizon_days.max(1));
        let span_days = match (record.route.valid_from, record.route.valid_to) {
            (Some(from), Some(to)) => (to - from).num_days().max(0) as f64,
            _ => tightness_horizon,
        };
        let tightness = 1.0 / (1.0 + span_days / tightness_horizon);

        0.5 * recency + 0.5 * tightness
    }

    /// Map a raw similarity into `[0, 1]`. No hint means full relevance.
    pub fn normalize_similarity(&self, raw: Option<f64>, best: Option<f64>) -> f64 {
        let Some(raw) = raw else {
            return 1.0;
        };
        match self.normalization {
            SimilarityNormalization::Absolute => raw.clamp(0.0, 1.0),
            SimilarityNormalization::RelativeToBest => match best {
                Some(best) if best > 0.0 => (raw / best).clamp(0.0, 1.0),
                _ => 0.0,
            },
        }
    }

    pub fn confidence(&self, similarity: f64, specificity: f64) -> f64 {
        let value = similarity.clamp(0.0, 1.0).powf(self.config.similarity_exponent)
            * specificity.clamp(0.0, 1.0).powf(self.config.specificity_exponent);
        if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

impl Default for MatchScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default(), SimilarityNormalization::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ratewise_core::types::{PricingTier, RateSheetDocument, RateSheetType, Route};
    use ratewise_core::ContainerType;
    use uuid::Uuid;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn tier(min: f64, max: Option<f64>) -> PricingTier {
        PricingTier {
            min_weight: min,
            max_weight: max,
            currency: "USD".to_string(),
            base_rate: 100.0,
            remarks: None,
        }
    }

    fn record(from: Option<&str>, to: Option<&str>, tiers: Vec<PricingTier>) -> RouteRecord {
        let document = RateSheetDocument {
            document_id: Uuid::new_v4(),
            organization_id: "org-1".to_string(),
            uploader_id: "user-1".to_string(),
            file_name: "rates.xlsx".to_string(),
            carrier_name: "Maersk".to_string(),
            title: None,
            sheet_type: RateSheetType::Ocean,
            uploaded_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            superseded_by: None,
            surcharges: vec![],
        };
        let route = Route {
            route_id: Uuid::new_v4(),
            document_id: document.document_id,
            origin: "MUMBAI".to_string(),
            destination: "CHENNAI".to_string(),
            origin_code: None,
            destination_code: None,
            container_type: ContainerType::Dry40,
            transit_time_days: None,
            valid_from: from.map(date),
            valid_to: to.map(date),
            routing: None,
            free_detention_days: None,
            remarks: None,
            tiers,
            surcharges: vec![],
        };
        RouteRecord { document, route }
    }

    fn criteria(container: bool, weight: Option<f64>) -> QueryCriteria {
        QueryCriteria {
            organization_id: "org-1".to_string(),
            origin: "Mumbai".to_string(),
            destination: "Chennai".to_string(),
            container_type: container.then_some(ContainerType::Dry40),
            weight,
            as_of: date("2024-06-01"),
            include_superseded: false,
        }
    }

    fn bracket(t: PricingTier) -> TierMatch {
        TierMatch {
            tier: t,
            containment: TierContainment::Bracket,
        }
    }

    fn starting(t: PricingTier) -> TierMatch {
        TierMatch {
            tier: t,
            containment: TierContainment::StartingRate,
        }
    }

    #[test]
    fn test_exact_match_clears_default_threshold() {
        let scorer = MatchScorer::default();
        let tiers = vec![tier(0.0, Some(10_000.0)), tier(10_000.0, Some(25_000.0))];
        let r = record(Some("2024-01-01"), Some("2024-12-31"), tiers.clone());
        let spec = scorer.specificity(&criteria(true, Some(12_000.0)), &r, &bracket(tiers[1].clone()));
        assert!(spec > 0.9 && spec < 1.0, "specificity {}", spec);
        assert!((scorer.confidence(1.0, spec) - spec).abs() < 1e-12);
    }

    #[test]
    fn test_starting_rate_scores_below_bracket() {
        let scorer = MatchScorer::default();
        let tiers = vec![tier(0.0, Some(10_000.0)), tier(10_000.0, None)];
        let r = record(Some("2024-01-01"), Some("2024-12-31"), tiers.clone());
        let c = criteria(true, None);
        let exact = scorer.specificity(&c, &r, &bracket(tiers[0].clone()));
        let fallback = scorer.specificity(&c, &r, &starting(tiers[0].clone()));
        assert!(fallback < exact);
        assert!((exact - fallback - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_single_open_tier_is_exact_without_weight() {
        let scorer = MatchScorer::default();
        let tiers = vec![tier(0.0, None)];
        let r = record(Some("2024-01-01"), None, tiers.clone());
        let c = criteria(true, None);
        assert_eq!(
            scorer.specificity(&c, &r, &starting(tiers[0].clone())),
            scorer.specificity(&c, &r, &bracket(tiers[0].clone()))
        );
    }

    #[test]
    fn test_missing_container_lowers_specificity() {
        let scorer = MatchScorer::default();
        let tiers = vec![tier(0.0, None)];
        let r = record(Some("2024-01-01"), Some("2024-12-31"), tiers.clone());
        let with = scorer.specificity(&criteria(true, Some(5.0)), &r, &bracket(tiers[0].clone()));
        let without = scorer.specificity(&criteria(false, Some(5.0)), &r, &bracket(tiers[0].clone()));
        assert!((with - without - 0.4).abs() < 1e-9);
        assert!(without <= 0.6 + 1e-9);
        assert!(without < ratewise_core::config::DispatchConfig::default().confidence_threshold);
    }

    #[test]
    fn test_newer_and_tighter_windows_score_higher() {
        let scorer = MatchScorer::default();
        let as_of = date("2024-07-01");
        let older = record(Some("2024-01-01"), Some("2024-12-31"), vec![]);
        let newer = record(Some("2024-06-01"), Some("2024-12-31"), vec![]);
        assert!(scorer.validity(&newer, as_of) > scorer.validity(&older, as_of));

        let open = record(Some("2024-06-01"), None, vec![]);
        assert!(scorer.validity(&newer, as_of) > scorer.validity(&open, as_of));
    }

    #[test]
    fn test_validity_without_start_uses_upload_date() {
        let scorer = MatchScorer::default();
        let r = record(None, None, vec![]);
        // Uploaded 2024-01-01, queried on the same day: full recency, half tightness.
        assert!((scorer.validity(&r, date("2024-01-01")) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_future_window_has_zero_age() {
        let scorer = MatchScorer::default();
        let r = record(Some("2024-08-01"), Some("2024-08-01"), vec![]);
        assert!((scorer.validity(&r, date("2024-07-01")) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_similarity_normalization() {
        let relative = MatchScorer::default();
        assert_eq!(relative.normalize_similarity(None, Some(0.4)), 1.0);
        assert!((relative.normalize_similarity(Some(0.2), Some(0.4)) - 0.5).abs() < 1e-12);
        assert_eq!(relative.normalize_similarity(Some(0.0), Some(0.0)), 0.0);

        let absolute = MatchScorer::new(ScoringConfig::default(), SimilarityNormalization::Absolute);
        assert_eq!(absolute.normalize_similarity(Some(0.4), Some(0.8)), 0.4);
        assert_eq!(absolute.normalize_similarity(Some(-0.3), None), 0.0);
    }

    #[test]
    fn test_confidence_is_monotonic() {
        let scorer = MatchScorer::new(
            ScoringConfig {
                similarity_exponent: 2.0,
                specificity_exponent: 0.5,
                ..ScoringConfig::default()
            },
            SimilarityNormalization::Absolute,
        );
        let steps: Vec<f64> = (0..=20).map(|i| i as f64 / 20.0).collect();
        for &fixed in &steps {
            for pair in steps.windows(2) {
                assert!(scorer.confidence(fixed, pair[0]) <= scorer.confidence(fixed, pair[1]));
                assert!(scorer.confidence(pair[0], fixed) <= scorer.confidence(pair[1], fixed));
            }
        }
        assert_eq!(scorer.confidence(1.5, 2.0), 1.0);
    }
}
