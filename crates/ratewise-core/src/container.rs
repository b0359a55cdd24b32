//! Container type classification.
//!
//! Carriers spell the same equipment many ways (`40'`, `40ft`, `40GP`,
//! `FCL-40ft`). Everything is parsed into a closed enum so that matching is
//! exact equality on the canonical form.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Equipment / load type a route is priced for.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContainerType {
    /// 20ft dry container.
    Dry20,
    /// 40ft dry container.
    Dry40,
    /// 40ft high cube.
    HighCube40,
    /// 45ft high cube.
    HighCube45,
    /// Full container load, size not stated.
    Fcl,
    /// Less than container load.
    Lcl,
    /// Break bulk / bulk cargo.
    Bulk,
    /// Anything else, kept in upper-case compact form (e.g. `40RF`).
    Other(String),
}

impl ContainerType {
    /// Parse a carrier spelling. Never fails; unknown spellings become `Other`.
    pub fn parse(raw: &str) -> Self {
        let compact: String = raw
            .trim()
            .to_uppercase()
            .chars()
            .filter(|c| !c.is_whitespace() && !matches!(c, '\'' | '’' | '"' | '-' | '_' | '/'))
            .collect();

        if let Some(known) = Self::from_canonical(&compact) {
            return known;
        }

        let body = compact.strip_prefix("FCL").unwrap_or(&compact);
        match body {
            "" => return ContainerType::Fcl,
            "LCL" => return ContainerType::Lcl,
            "BULK" | "BREAKBULK" => return ContainerType::Bulk,
            _ => {}
        }

        let digits: String = body.chars().take_while(|c| c.is_ascii_digit()).collect();
        let rest = &body[digits.len()..];
        let rest = rest
            .strip_prefix("FEET")
            .or_else(|| rest.strip_prefix("FT"))
            .unwrap_or(rest);
        let high_cube = matches!(rest, "HC" | "HQ" | "HIGHCUBE");
        let dry = matches!(rest, "" | "GP" | "DV" | "DC" | "ST" | "STD" | "DRY");

        match (digits.as_str(), high_cube, dry) {
            ("20", false, true) => ContainerType::Dry20,
            ("40", false, true) => ContainerType::Dry40,
            ("40", true, _) => ContainerType::HighCube40,
            ("45", true, _) | ("45", _, true) => ContainerType::HighCube45,
            _ => ContainerType::Other(compact),
        }
    }

    fn from_canonical(compact: &str) -> Option<Self> {
        match compact {
            "FCL20FT" => Some(ContainerType::Dry20),
            "FCL40FT" => Some(ContainerType::Dry40),
            "FCL40HC" => Some(ContainerType::HighCube40),
            "FCL45HC" => Some(ContainerType::HighCube45),
            _ => None,
        }
    }

    /// Canonical code used for storage and display.
    pub fn code(&self) -> &str {
        match self {
            ContainerType::Dry20 => "FCL-20ft",
            ContainerType::Dry40 => "FCL-40ft",
            ContainerType::HighCube40 => "FCL-40HC",
            ContainerType::HighCube45 => "FCL-45HC",
            ContainerType::Fcl => "FCL",
            ContainerType::Lcl => "LCL",
            ContainerType::Bulk => "BULK",
            ContainerType::Other(code) => code,
        }
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl From<String> for ContainerType {
    fn from(raw: String) -> Self {
        ContainerType::parse(&raw)
    }
}

impl From<&str> for ContainerType {
    fn from(raw: &str) -> Self {
        ContainerType::parse(raw)
    }
}

impl From<ContainerType> for String {
    fn from(ct: ContainerType) -> Self {
        ct.code().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forty_foot_spellings() {
        for raw in ["40'", "40ft", "40 FT", "FCL-40ft", "fcl 40", "40GP", "40DV"] {
            assert_eq!(ContainerType::parse(raw), ContainerType::Dry40, "{}", raw);
        }
    }

    #[test]
    fn test_parse_high_cube() {
        assert_eq!(ContainerType::parse("40HC"), ContainerType::HighCube40);
        assert_eq!(ContainerType::parse("40' HQ"), ContainerType::HighCube40);
        assert_eq!(ContainerType::parse("FCL-40HC"), ContainerType::HighCube40);
        assert_eq!(ContainerType::parse("45'"), ContainerType::HighCube45);
    }

    #[test]
    fn test_parse_load_types() {
        assert_eq!(ContainerType::parse("20'"), ContainerType::Dry20);
        assert_eq!(ContainerType::parse("lcl"), ContainerType::Lcl);
        assert_eq!(ContainerType::parse("FCL"), ContainerType::Fcl);
        assert_eq!(ContainerType::parse("Break Bulk"), ContainerType::Bulk);
    }

    #[test]
    fn test_unknown_spelling_is_case_insensitive_other() {
        let a = ContainerType::parse("40 rf");
        let b = ContainerType::parse("40RF");
        assert_eq!(a, b);
        assert_eq!(a, ContainerType::Other("40RF".to_string()));
    }

    #[test]
    fn test_canonical_code_parses_back() {
        for ct in [
            ContainerType::Dry20,
            ContainerType::Dry40,
            ContainerType::HighCube40,
            ContainerType::HighCube45,
            ContainerType::Fcl,
            ContainerType::Lcl,
            ContainerType::Bulk,
        ] {
            assert_eq!(ContainerType::parse(ct.code()), ct);
        }
    }

    #[test]
    fn test_serde_uses_canonical_code() {
        let json = serde_json::to_string(&ContainerType::Dry40).unwrap();
        assert_eq!(json, "\"FCL-40ft\"");
        let ct: ContainerType = serde_json::from_str("\"40'\"").unwrap();
        assert_eq!(ct, ContainerType::Dry40);
    }
}
