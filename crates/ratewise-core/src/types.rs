use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::container::ContainerType;

// =============================================================================
// Enums
// =============================================================================

/// Transport mode a rate sheet covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSheetType {
    #[default]
    Ocean,
    Air,
    Land,
    Multimodal,
}

impl RateSheetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateSheetType::Ocean => "ocean",
            RateSheetType::Air => "air",
            RateSheetType::Land => "land",
            RateSheetType::Multimodal => "multimodal",
        }
    }

    /// Parse the stored form. Unknown values fall back to `Ocean`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "air" => RateSheetType::Air,
            "land" | "road" | "rail" => RateSheetType::Land,
            "multimodal" => RateSheetType::Multimodal,
            _ => RateSheetType::Ocean,
        }
    }
}

/// Surcharge category.
///
/// Carrier abbreviations (`BAF`, `CAF`, `PSS`, `THC`, `EBS`) are accepted on
/// input; the long snake_case name is the canonical form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SurchargeKind {
    /// Bunker adjustment factor.
    Fuel,
    /// Currency adjustment factor.
    Currency,
    PeakSeason,
    Documentation,
    TerminalHandling,
    EmergencyBunker,
    Other(String),
}

impl SurchargeKind {
    pub fn parse(raw: &str) -> Self {
        let key = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match key.as_str() {
            "fuel" | "baf" | "bunker" => SurchargeKind::Fuel,
            "currency" | "caf" => SurchargeKind::Currency,
            "peak_season" | "pss" => SurchargeKind::PeakSeason,
            "documentation" | "doc" | "docs" => SurchargeKind::Documentation,
            "terminal_handling" | "thc" => SurchargeKind::TerminalHandling,
            "emergency_bunker" | "ebs" => SurchargeKind::EmergencyBunker,
            _ => SurchargeKind::Other(key),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SurchargeKind::Fuel => "fuel",
            SurchargeKind::Currency => "currency",
            SurchargeKind::PeakSeason => "peak_season",
            SurchargeKind::Documentation => "documentation",
            SurchargeKind::TerminalHandling => "terminal_handling",
            SurchargeKind::EmergencyBunker => "emergency_bunker",
            SurchargeKind::Other(name) => name,
        }
    }
}

impl fmt::Display for SurchargeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for SurchargeKind {
    fn from(raw: String) -> Self {
        SurchargeKind::parse(&raw)
    }
}

impl From<SurchargeKind> for String {
    fn from(kind: SurchargeKind) -> Self {
        kind.as_str().to_string()
    }
}

/// How the tier of a match was selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierContainment {
    /// The query weight falls inside the tier's bracket.
    Bracket,
    /// No weight given; the lowest bracket is quoted as the starting rate.
    StartingRate,
}

// =============================================================================
// Rate sheet records
// =============================================================================

/// A weight-bracketed rate. The bracket is half-open: `[min_weight, max_weight)`.
///
/// Weights are kilograms. `max_weight = None` means unbounded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    #[serde(default)]
    pub min_weight: f64,
    #[serde(default)]
    pub max_weight: Option<f64>,
    pub currency: String,
    pub base_rate: f64,
    #[serde(default)]
    pub remarks: Option<String>,
}

impl PricingTier {
    pub fn contains(&self, weight: f64) -> bool {
        weight >= self.min_weight && self.max_weight.map_or(true, |max| weight < max)
    }

    /// Half-open brackets overlap iff each starts before the other ends.
    pub fn overlaps(&self, other: &PricingTier) -> bool {
        let self_starts_first = other.max_weight.map_or(true, |max| self.min_weight < max);
        let other_starts_first = self.max_weight.map_or(true, |max| other.min_weight < max);
        self_starts_first && other_starts_first
    }
}

/// A surcharge on a route, or on the whole sheet when route-independent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Surcharge {
    pub kind: SurchargeKind,
    /// Flat amount, in `currency`.
    #[serde(default)]
    pub amount: Option<f64>,
    /// Percentage of the base rate.
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub applies_from: Option<NaiveDate>,
    #[serde(default)]
    pub applies_to: Option<NaiveDate>,
}

impl Surcharge {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        self.applies_from.map_or(true, |from| from <= date)
            && self.applies_to.map_or(true, |to| date <= to)
    }
}

/// One route as produced by the upstream extraction step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParsedRoute {
    pub origin: String,
    pub destination: String,
    #[serde(default)]
    pub origin_code: Option<String>,
    #[serde(default)]
    pub destination_code: Option<String>,
    pub container_type: ContainerType,
    #[serde(default)]
    pub transit_time_days: Option<u32>,
    #[serde(default)]
    pub valid_from: Option<NaiveDate>,
    #[serde(default)]
    pub valid_to: Option<NaiveDate>,
    #[serde(default)]
    pub routing: Option<String>,
    #[serde(default)]
    pub free_detention_days: Option<u32>,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub tiers: Vec<PricingTier>,
    #[serde(default)]
    pub surcharges: Vec<Surcharge>,
}

/// Upstream extraction result for one uploaded rate sheet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParsedRateSheet {
    pub carrier_name: String,
    pub organization_id: String,
    pub uploader_id: String,
    pub file_name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub sheet_type: RateSheetType,
    pub routes: Vec<ParsedRoute>,
    /// Route-independent surcharges.
    #[serde(default)]
    pub surcharges: Vec<Surcharge>,
}

/// One upload. Read-only after creation except for `superseded_by`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateSheetDocument {
    pub document_id: Uuid,
    pub organization_id: String,
    pub uploader_id: String,
    pub file_name: String,
    pub carrier_name: String,
    pub title: Option<String>,
    pub sheet_type: RateSheetType,
    pub uploaded_at: DateTime<Utc>,
    pub superseded_by: Option<Uuid>,
    /// Route-independent surcharges.
    pub surcharges: Vec<Surcharge>,
}

impl RateSheetDocument {
    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }
}

/// A stored route. `origin` and `destination` are normalized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub route_id: Uuid,
    pub document_id: Uuid,
    pub origin: String,
    pub destination: String,
    pub origin_code: Option<String>,
    pub destination_code: Option<String>,
    pub container_type: ContainerType,
    pub transit_time_days: Option<u32>,
    pub valid_from: Option<NaiveDate>,
    /// `None` means valid until superseded.
    pub valid_to: Option<NaiveDate>,
    pub routing: Option<String>,
    pub free_detention_days: Option<u32>,
    pub remarks: Option<String>,
    pub tiers: Vec<PricingTier>,
    pub surcharges: Vec<Surcharge>,
}

impl Route {
    /// Inclusive on both ends; open ends are unbounded.
    pub fn is_valid_on(&self, date: NaiveDate) -> bool {
        self.valid_from.map_or(true, |from| from <= date)
            && self.valid_to.map_or(true, |to| date <= to)
    }
}

/// A document together with all its routes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRateSheet {
    pub document: RateSheetDocument,
    pub routes: Vec<Route>,
}

/// A route returned by the rate store, with the header of its document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub document: RateSheetDocument,
    pub route: Route,
}

// =============================================================================
// Resolution
// =============================================================================

/// Structured query criteria, as produced by the external entity extractor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryCriteria {
    pub organization_id: String,
    pub origin: String,
    pub destination: String,
    #[serde(default)]
    pub container_type: Option<ContainerType>,
    /// Kilograms.
    #[serde(default)]
    pub weight: Option<f64>,
    pub as_of: NaiveDate,
    /// Include superseded documents.
    #[serde(default)]
    pub include_superseded: bool,
}

/// One candidate rate for a query. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMatch {
    pub document_id: Uuid,
    pub carrier_name: String,
    pub file_name: String,
    pub route: Route,
    pub tier: PricingTier,
    pub containment: TierContainment,
    pub applicable_surcharges: Vec<Surcharge>,
    /// Raw similarity from the semantic index; `None` without a hint.
    pub similarity_score: Option<f64>,
    pub match_specificity: f64,
    pub confidence: f64,
    pub superseded: bool,
}

/// A data-integrity violation found while resolving.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub document_id: Uuid,
    pub route_id: Uuid,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(min: f64, max: Option<f64>) -> PricingTier {
        PricingTier {
            min_weight: min,
            max_weight: max,
            currency: "USD".to_string(),
            base_rate: 100.0,
            remarks: None,
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_tier_bracket_is_half_open() {
        let t = tier(0.0, Some(10_000.0));
        assert!(t.contains(0.0));
        assert!(t.contains(9_999.9));
        assert!(!t.contains(10_000.0));
        assert!(tier(10_000.0, None).contains(1e9));
    }

    #[test]
    fn test_adjacent_tiers_do_not_overlap() {
        let a = tier(0.0, Some(10_000.0));
        let b = tier(10_000.0, Some(25_000.0));
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn test_overlapping_tiers() {
        let a = tier(0.0, Some(10_000.0));
        let b = tier(5_000.0, Some(20_000.0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(tier(0.0, None).overlaps(&tier(50_000.0, None)));
    }

    #[test]
    fn test_surcharge_window() {
        let s = Surcharge {
            kind: SurchargeKind::PeakSeason,
            amount: Some(150.0),
            percentage: None,
            currency: Some("USD".to_string()),
            applies_from: Some(date("2024-06-01")),
            applies_to: Some(date("2024-08-31")),
        };
        assert!(!s.applies_on(date("2024-05-31")));
        assert!(s.applies_on(date("2024-06-01")));
        assert!(s.applies_on(date("2024-08-31")));
        assert!(!s.applies_on(date("2024-09-01")));
    }

    #[test]
    fn test_surcharge_kind_abbreviations() {
        assert_eq!(SurchargeKind::parse("BAF"), SurchargeKind::Fuel);
        assert_eq!(SurchargeKind::parse("Peak Season"), SurchargeKind::PeakSeason);
        assert_eq!(SurchargeKind::parse("THC"), SurchargeKind::TerminalHandling);
        assert_eq!(
            SurchargeKind::parse("Seal Fee"),
            SurchargeKind::Other("seal_fee".to_string())
        );
    }

    #[test]
    fn test_parsed_sheet_deserializes_with_defaults() {
        let json = r#"{
            "carrier_name": "Maersk",
            "organization_id": "org-1",
            "uploader_id": "user-1",
            "file_name": "rates.xlsx",
            "routes": [{
                "origin": "Mumbai",
                "destination": "Chennai",
                "container_type": "40'",
                "valid_from": "2024-01-01",
                "tiers": [{"currency": "USD", "base_rate": 500.0, "max_weight": 10000.0}],
                "surcharges": [{"kind": "BAF", "amount": 75.0, "currency": "USD"}]
            }]
        }"#;
        let sheet: ParsedRateSheet = serde_json::from_str(json).unwrap();
        assert_eq!(sheet.sheet_type, RateSheetType::Ocean);
        assert!(sheet.surcharges.is_empty());
        let route = &sheet.routes[0];
        assert_eq!(route.container_type, ContainerType::Dry40);
        assert_eq!(route.valid_to, None);
        assert_eq!(route.tiers[0].min_weight, 0.0);
        assert_eq!(route.surcharges[0].kind, SurchargeKind::Fuel);
    }

    #[test]
    fn test_route_validity_window() {
        let route = Route {
            route_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            origin: "MUMBAI".into(),
            destination: "CHENNAI".into(),
            origin_code: None,
            destination_code: None,
            container_type: ContainerType::Dry40,
            transit_time_days: Some(4),
            valid_from: Some(date("2024-01-01")),
            valid_to: None,
            routing: None,
            free_detention_days: None,
            remarks: None,
            tiers: vec![],
            surcharges: vec![],
        };
        assert!(!route.is_valid_on(date("2023-12-31")));
        assert!(route.is_valid_on(date("2030-01-01")));
    }
}
