//! Location normalization.
//!
//! Origins and destinations are compared after trimming, collapsing inner
//! whitespace, upper-casing, and resolving aliases (historic names and
//! UN/LOCODEs) to one canonical port name. Normalization is idempotent.

use std::collections::HashMap;

use crate::config::LocationConfig;

/// Built-in alias table: alias -> canonical name. Both sides upper-case.
static BUILTIN_ALIASES: &[(&str, &str)] = &[
    ("BOMBAY", "MUMBAI"),
    ("INBOM", "MUMBAI"),
    ("MUMBAI PORT", "MUMBAI"),
    ("MADRAS", "CHENNAI"),
    ("INMAA", "CHENNAI"),
    ("CALCUTTA", "KOLKATA"),
    ("INCCU", "KOLKATA"),
    ("JNPT", "NHAVA SHEVA"),
    ("INNSA", "NHAVA SHEVA"),
    ("NHAVASHEVA", "NHAVA SHEVA"),
    ("JAWAHARLAL NEHRU PORT", "NHAVA SHEVA"),
    ("INMUN", "MUNDRA"),
    ("INTUT", "TUTICORIN"),
    ("THOOTHUKUDI", "TUTICORIN"),
    ("COCHIN", "KOCHI"),
    ("INCOK", "KOCHI"),
    ("VIZAG", "VISAKHAPATNAM"),
    ("INVTZ", "VISAKHAPATNAM"),
    ("AEJEA", "JEBEL ALI"),
    ("SGSIN", "SINGAPORE"),
    ("CNSHA", "SHANGHAI"),
    ("CNNGB", "NINGBO"),
    ("HKHKG", "HONG KONG"),
    ("LKCMB", "COLOMBO"),
    ("BDCGP", "CHITTAGONG"),
    ("CHATTOGRAM", "CHITTAGONG"),
    ("PKKHI", "KARACHI"),
    ("THLCH", "LAEM CHABANG"),
    ("NLRTM", "ROTTERDAM"),
    ("DEHAM", "HAMBURG"),
    ("BEANR", "ANTWERP"),
    ("USNYC", "NEW YORK"),
    ("USLAX", "LOS ANGELES"),
];

/// Resolves free-form location names to canonical upper-case names.
#[derive(Debug, Clone)]
pub struct LocationNormalizer {
    aliases: HashMap<String, String>,
}

impl LocationNormalizer {
    /// Normalizer with only the built-in alias table.
    pub fn new() -> Self {
        let aliases = BUILTIN_ALIASES
            .iter()
            .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
            .collect();
        Self { aliases }
    }

    /// Built-in table plus configured aliases (configured entries win).
    pub fn from_config(config: &LocationConfig) -> Self {
        let mut normalizer = Self::new();
        for (alias, canonical) in &config.aliases {
            let alias = compact(alias);
            let canonical = compact(canonical);
            if !alias.is_empty() && !canonical.is_empty() {
                normalizer.aliases.insert(alias, canonical);
            }
        }
        normalizer
    }

    /// Canonical form of `raw`. Empty input stays empty.
    pub fn normalize(&self, raw: &str) -> String {
        let key = compact(raw);
        match self.aliases.get(&key) {
            Some(canonical) => canonical.clone(),
            None => key,
        }
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }
}

impl Default for LocationNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn compact(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}
