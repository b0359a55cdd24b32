//! Retrieval text for a rate sheet.
//!
//! Only ever embedded and searched. Rates quoted to customers come from
//! the structured store, never from this text.

use std::fmt::Write;

use ratewise_core::types::{PricingTier, RateSheetDocument, Route, Surcharge};

pub fn build_raw_text(document: &RateSheetDocument, routes: &[Route]) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "{}", document.file_name);
    let _ = writeln!(text, "Carrier: {}", document.carrier_name);
    if let Some(title) = &document.title {
        let _ = writeln!(text, "Title: {}", title);
    }
    let _ = writeln!(text, "Type: {}", document.sheet_type.as_str());
    for surcharge in &document.surcharges {
        let _ = writeln!(text, "Surcharge: {}", describe_surcharge(surcharge));
    }

    for route in routes {
        text.push('\n');
        let _ = write!(text, "Route: {} to {}", route.origin, route.destination);
        if let (Some(from), Some(to)) = (&route.origin_code, &route.destination_code) {
            let _ = write!(text, " ({} - {})", from, to);
        }
        text.push('\n');
        if let Some(routing) = &route.routing {
            let _ = writeln!(text, "Routing: {}", routing);
        }
        let _ = writeln!(text, "Container: {}", route.container_type);
        if let Some(days) = route.transit_time_days {
            let _ = writeln!(text, "Transit: {} days", days);
        }
        let _ = writeln!(
            text,
            "Valid: {} to {}",
            route
                .valid_from
                .map_or_else(|| "open".to_string(), |d| d.to_string()),
            route
                .valid_to
                .map_or_else(|| "open".to_string(), |d| d.to_string())
        );
        if let Some(days) = route.free_detention_days {
            let _ = writeln!(text, "Free detention: {} days", days);
        }
        for tier in &route.tiers {
            let _ = writeln!(text, "Tier: {}", describe_tier(tier));
        }
        for surcharge in &route.surcharges {
            let _ = writeln!(text, "Surcharge: {}", describe_surcharge(surcharge));
        }
        if let Some(remarks) = &route.remarks {
            let _ = writeln!(text, "Remarks: {}", remarks);
        }
    }
    text
}

fn describe_tier(tier: &PricingTier) -> String {
    let bracket = match tier.max_weight {
        Some(max) => format!("{}-{} kg", tier.min_weight, max),
        None => format!("{}+ kg", tier.min_weight),
    };
    format!("{} {} {}", bracket, tier.currency, tier.base_rate)
}

fn describe_surcharge(surcharge: &Surcharge) -> String {
    match (surcharge.amount, surcharge.percentage) {
        (Some(amount), _) => format!(
            "{} {} {}",
            surcharge.kind,
            surcharge.currency.as_deref().unwrap_or(""),
            amount
        ),
        (None, Some(pct)) => format!("{} {}%", surcharge.kind, pct),
        (None, None) => surcharge.kind.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ratewise_core::types::{RateSheetType, SurchargeKind};
    use ratewise_core::ContainerType;
    use uuid::Uuid;

    #[test]
    fn test_raw_text_mentions_carrier_route_and_tiers() {
        let document = RateSheetDocument {
            document_id: Uuid::new_v4(),
            organization_id: "org-1".to_string(),
            uploader_id: "user-1".to_string(),
            file_name: "maersk_q1.xlsx".to_string(),
            carrier_name: "Maersk".to_string(),
            title: Some("West India Q1".to_string()),
            sheet_type: RateSheetType::Ocean,
            uploaded_at: Utc::now(),
            superseded_by: None,
            surcharges: vec![],
        };
        let route = Route {
            route_id: Uuid::new_v4(),
            document_id: document.document_id,
            origin: "MUMBAI".to_string(),
            destination: "CHENNAI".to_string(),
            origin_code: Some("INBOM".to_string()),
            destination_code: Some("INMAA".to_string()),
            container_type: ContainerType::Dry40,
            transit_time_days: Some(5),
            valid_from: "2024-01-01".parse().ok(),
            valid_to: None,
            routing: Some("via Colombo".to_string()),
            free_detention_days: None,
            remarks: None,
            tiers: vec![PricingTier {
                min_weight: 0.0,
                max_weight: Some(10_000.0),
                currency: "USD".to_string(),
                base_rate: 500.0,
                remarks: None,
            }],
            surcharges: vec![Surcharge {
                kind: SurchargeKind::Fuel,
                amount: None,
                percentage: Some(12.0),
                currency: None,
                applies_from: None,
                applies_to: None,
            }],
        };

        let text = build_raw_text(&document, &[route]);
        assert!(text.contains("Carrier: Maersk"));
        assert!(text.contains("Route: MUMBAI to CHENNAI (INBOM - INMAA)"));
        assert!(text.contains("Routing: via Colombo"));
        assert!(text.contains("Container: FCL-40ft"));
        assert!(text.contains("Valid: 2024-01-01 to open"));
        assert!(text.contains("Tier: 0-10000 kg USD 500"));
        assert!(text.contains("Surcharge: fuel 12%"));
    }
}
