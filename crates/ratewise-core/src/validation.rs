//! Ingestion-time validation and query-time integrity checks.

use std::collections::HashSet;

use crate::error::{RatewiseError, Result};
use crate::location::LocationNormalizer;
use crate::types::{ParsedRateSheet, ParsedRoute, PricingTier, Route, Surcharge};

/// First pair of sibling tiers whose brackets overlap, if any.
pub fn find_tier_overlap(tiers: &[PricingTier]) -> Option<(usize, usize)> {
    for i in 0..tiers.len() {
        for j in (i + 1)..tiers.len() {
            if tiers[i].overlaps(&tiers[j]) {
                return Some((i, j));
            }
        }
    }
    None
}

/// Validate an extraction result before anything is written.
///
/// Every failure is a `Validation` error naming the offending route.
pub fn validate_sheet(sheet: &ParsedRateSheet, normalizer: &LocationNormalizer) -> Result<()> {
    require_text("carrier_name", &sheet.carrier_name)?;
    require_text("organization_id", &sheet.organization_id)?;
    require_text("uploader_id", &sheet.uploader_id)?;
    require_text("file_name", &sheet.file_name)?;

    if sheet.routes.is_empty() {
        return invalid("rate sheet must contain at least one route".to_string());
    }

    for (i, surcharge) in sheet.surcharges.iter().enumerate() {
        validate_surcharge(surcharge).map_err(|msg| {
            RatewiseError::Validation(format!("sheet surcharge {}: {}", i, msg))
        })?;
    }

    let mut keys = HashSet::new();
    for (i, route) in sheet.routes.iter().enumerate() {
        validate_route(route)
            .map_err(|msg| RatewiseError::Validation(format!("route {}: {}", i, msg)))?;

        let key = (
            normalizer.normalize(&route.origin),
            normalizer.normalize(&route.destination),
            route.container_type.code().to_string(),
            route.valid_from,
        );
        if !keys.insert(key) {
            return invalid(format!(
                "route {}: duplicates an earlier route with the same origin, destination, container type and valid_from",
                i
            ));
        }
    }
    Ok(())
}

/// Re-check a stored route before quoting from it.
///
/// Rows written by older releases or by hand may violate invariants that
/// ingestion now enforces.
pub fn check_route_integrity(route: &Route) -> Result<()> {
    if let (Some(from), Some(to)) = (route.valid_from, route.valid_to) {
        if from > to {
            return Err(RatewiseError::DataIntegrity(format!(
                "route {} has valid_from {} after valid_to {}",
                route.route_id, from, to
            )));
        }
    }
    if let Some((a, b)) = find_tier_overlap(&route.tiers) {
        return Err(RatewiseError::DataIntegrity(format!(
            "route {} has overlapping weight brackets {} and {}",
            route.route_id,
            describe_bracket(&route.tiers[a]),
            describe_bracket(&route.tiers[b])
        )));
    }
    Ok(())
}

fn validate_route(route: &ParsedRoute) -> std::result::Result<(), String> {
    if route.origin.trim().is_empty() {
        return Err("origin must not be empty".to_string());
    }
    if route.destination.trim().is_empty() {
        return Err("destination must not be empty".to_string());
    }
    if let (Some(from), Some(to)) = (route.valid_from, route.valid_to) {
        if from > to {
            return Err(format!("valid_from {} is after valid_to {}", from, to));
        }
    }
    if route.tiers.is_empty() {
        return Err("route must contain at least one pricing tier".to_string());
    }
    for (j, tier) in route.tiers.iter().enumerate() {
        validate_tier(tier).map_err(|msg| format!("tier {}: {}", j, msg))?;
    }
    if let Some((a, b)) = find_tier_overlap(&route.tiers) {
        return Err(format!(
            "tiers {} {} and {} {} overlap",
            a,
            describe_bracket(&route.tiers[a]),
            b,
            describe_bracket(&route.tiers[b])
        ));
    }
    for (j, surcharge) in route.surcharges.iter().enumerate() {
        validate_surcharge(surcharge).map_err(|msg| format!("surcharge {}: {}", j, msg))?;
    }
    Ok(())
}

fn validate_tier(tier: &PricingTier) -> std::result::Result<(), String> {
    if !tier.min_weight.is_finite() || tier.min_weight < 0.0 {
        return Err(format!("min_weight {} must be >= 0", tier.min_weight));
    }
    if let Some(max) = tier.max_weight {
        if !max.is_finite() || max <= tier.min_weight {
            return Err(format!(
                "max_weight {} must be greater than min_weight {}",
                max, tier.min_weight
            ));
        }
    }
    if !tier.base_rate.is_finite() || tier.base_rate < 0.0 {
        return Err(format!("base_rate {} must be >= 0", tier.base_rate));
    }
    validate_currency(&tier.currency)
}

fn validate_surcharge(surcharge: &Surcharge) -> std::result::Result<(), String> {
    match (surcharge.amount, surcharge.percentage) {
        (Some(_), Some(_)) => {
            return Err("set either amount or percentage, not both".to_string())
        }
        (None, None) => return Err("amount or percentage is required".to_string()),
        (Some(amount), None) => {
            if !amount.is_finite() {
                return Err("amount must be finite".to_string());
            }
            match &surcharge.currency {
                Some(currency) => validate_currency(currency)?,
                None => return Err("a flat amount requires a currency".to_string()),
            }
        }
        (None, Some(pct)) => {
            if !pct.is_finite() {
                return Err("percentage must be finite".to_string());
            }
        }
    }
    if let (Some(from), Some(to)) = (surcharge.applies_from, surcharge.applies_to) {
        if from > to {
            return Err(format!("applies_from {} is after applies_to {}", from, to));
        }
    }
    Ok(())
}

fn validate_currency(code: &str) -> std::result::Result<(), String> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        Err(format!("currency '{}' is not a 3-letter code", code))
    }
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return invalid(format!("{} must not be empty", field));
    }
    Ok(())
}

fn invalid(msg: String) -> Result<()> {
    Err(RatewiseError::Validation(msg))
}

fn describe_bracket(tier: &PricingTier) -> String {
    match tier.max_weight {
        Some(max) => format!("[{}, {})", tier.min_weight, max),
        None => format!("[{}, inf)", tier.min_weight),
    }
}
