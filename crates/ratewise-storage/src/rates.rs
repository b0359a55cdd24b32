//! Tier selection for a stored route.

use serde::{Deserialize, Serialize};

use ratewise_core::error::RatewiseError;
use ratewise_core::types::{PricingTier, Route, TierContainment};
use ratewise_core::validation::check_route_integrity;

/// The tier chosen for a route and how it was chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierMatch {
    pub tier: PricingTier,
    pub containment: TierContainment,
}

/// Pick the pricing tier of `route` that applies to `weight`.
///
/// With a weight, returns the unique half-open bracket containing it, or
/// `NotFound` when none does. Without a weight, returns the lowest bracket as
/// the starting rate. Overlapping brackets or an inverted validity window
/// fail with `DataIntegrity` before any selection happens.
pub fn extract_precise_rate(route: &Route, weight: Option<f64>) -> Result<TierMatch, RatewiseError> {
    check_route_integrity(route)?;

    match weight {
        Some(w) if !w.is_finite() || w < 0.0 => Err(RatewiseError::Validation(format!(
            "weight {} must be a finite, non-negative number",
            w
        ))),
        Some(w) => route
            .tiers
            .iter()
            .find(|tier| tier.contains(w))
            .map(|tier| TierMatch {
                tier: tier.clone(),
                containment: TierContainment::Bracket,
            })
            .ok_or_else(|| {
                RatewiseError::NotFound(format!(
                    "no pricing tier of route {} contains weight {}",
                    route.route_id, w
                ))
            }),
        None => route
            .tiers
            .iter()
            .min_by(|a, b| a.min_weight.total_cmp(&b.min_weight))
            .map(|tier| TierMatch {
                tier: tier.clone(),
                containment: TierContainment::StartingRate,
            })
            .ok_or_else(|| {
                RatewiseError::NotFound(format!("route {} has no pricing tiers", route.route_id))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewise_core::ContainerType;
    use uuid::Uuid;

    fn tier(min: f64, max: Option<f64>, rate: f64) -> PricingTier {
        PricingTier {
            min_weight: min,
            max_weight: max,
            currency: "USD".to_string(),
            base_rate: rate,
            remarks: None,
        }
    }

    fn route(tiers: Vec<PricingTier>) -> Route {
        Route {
            route_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            origin: "MUMBAI".to_string(),
            destination: "CHENNAI".to_string(),
            origin_code: None,
            destination_code: None,
            container_type: ContainerType::Dry40,
            transit_time_days: None,
            valid_from: None,
            valid_to: None,
            routing: None,
            free_detention_days: None,
            remarks: None,
            tiers,
            surcharges: vec![],
        }
    }

    fn bracketed() -> Route {
        // Deliberately out of order.
        route(vec![
            tier(10_000.0, Some(25_000.0), 450.0),
            tier(0.0, Some(10_000.0), 500.0),
            tier(25_000.0, None, 400.0),
        ])
    }

    #[test]
    fn test_weight_selects_containing_bracket() {
        let m = extract_precise_rate(&bracketed(), Some(15_000.0)).unwrap();
        assert_eq!(m.tier.base_rate, 450.0);
        assert_eq!(m.containment, TierContainment::Bracket);
    }

    #[test]
    fn test_boundary_weight_belongs_to_upper_bracket() {
        let m = extract_precise_rate(&bracketed(), Some(10_000.0)).unwrap();
        assert_eq!(m.tier.base_rate, 450.0);
        let m = extract_precise_rate(&bracketed(), Some(0.0)).unwrap();
        assert_eq!(m.tier.base_rate, 500.0);
    }

    #[test]
    fn test_unbounded_top_bracket() {
        let m = extract_precise_rate(&bracketed(), Some(1_000_000.0)).unwrap();
        assert_eq!(m.tier.base_rate, 400.0);
    }

    #[test]
    fn test_no_weight_returns_starting_rate() {
        let m = extract_precise_rate(&bracketed(), None).unwrap();
        assert_eq!(m.tier.min_weight, 0.0);
        assert_eq!(m.containment, TierContainment::StartingRate);
    }

    #[test]
    fn test_weight_outside_every_bracket_is_not_found() {
        let r = route(vec![tier(100.0, Some(500.0), 10.0)]);
        let err = extract_precise_rate(&r, Some(50.0)).unwrap_err();
        assert!(err.is_not_found());
        let err = extract_precise_rate(&r, Some(500.0)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_overlapping_brackets_are_integrity_errors() {
        let r = route(vec![
            tier(0.0, Some(10_000.0), 500.0),
            tier(5_000.0, Some(20_000.0), 450.0),
        ]);
        // Even when the weight sits outside the overlap.
        for w in [Some(1_000.0), Some(7_500.0), None] {
            let err = extract_precise_rate(&r, w).unwrap_err();
            assert!(matches!(err, RatewiseError::DataIntegrity(_)));
        }
    }

    #[test]
    fn test_invalid_weight_rejected() {
        for w in [-1.0, f64::NAN, f64::INFINITY] {
            let err = extract_precise_rate(&bracketed(), Some(w)).unwrap_err();
            assert!(matches!(err, RatewiseError::Validation(_)));
        }
    }

    #[test]
    fn test_route_without_tiers_is_not_found() {
        assert!(extract_precise_rate(&route(vec![]), None)
            .unwrap_err()
            .is_not_found());
    }
}
