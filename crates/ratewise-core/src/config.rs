use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{RatewiseError, Result};

/// Top-level configuration for the ratewise service.
///
/// Loaded from `~/.ratewise/config.toml` by default. Each section maps to
/// one stage of the ingestion / resolution path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatewiseConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub locations: LocationConfig,
}

impl RatewiseConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails
    /// [`RatewiseConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RatewiseConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values that would make scoring or dispatch meaningless.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scoring;
        let weights = [s.container_weight, s.weight_bracket_weight, s.validity_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(RatewiseError::Config(
                "scoring weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(RatewiseError::Config(
                "at least one scoring weight must be positive".to_string(),
            ));
        }
        if s.similarity_exponent <= 0.0 || s.specificity_exponent <= 0.0 {
            return Err(RatewiseError::Config(
                "confidence exponents must be positive".to_string(),
            ));
        }
        if s.recency_horizon_days == 0 || s.tightness_horizon_days == 0 {
            return Err(RatewiseError::Config(
                "scoring horizons must be at least one day".to_string(),
            ));
        }

        let d = &self.dispatch;
        if !(0.0..=1.0).contains(&d.confidence_threshold) {
            return Err(RatewiseError::Config(format!(
                "dispatch.confidence_threshold must be within [0, 1], got {}",
                d.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&d.ambiguity_margin) {
            return Err(RatewiseError::Config(format!(
                "dispatch.ambiguity_margin must be within [0, 1], got {}",
                d.ambiguity_margin
            )));
        }

        if self.resolver.top_k == 0 {
            return Err(RatewiseError::Config(
                "resolver.top_k must be at least 1".to_string(),
            ));
        }
        if self.ingestion.max_attempts == 0 {
            return Err(RatewiseError::Config(
                "ingestion.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.ingestion.structured_write_timeout_ms == 0 {
            return Err(RatewiseError::Config(
                "ingestion.structured_write_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(RatewiseError::Config(
                "embedding.dimensions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP port for the API server.
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.ratewise/data".to_string(),
            log_level: "info".to_string(),
            port: 8010,
        }
    }
}

/// How raw similarity scores are mapped into `[0, 1]` before they feed the
/// confidence product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityNormalization {
    /// Divide by the best score among the candidates.
    #[default]
    RelativeToBest,
    /// Clamp the raw cosine score into `[0, 1]`.
    Absolute,
}

/// Hybrid resolver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Candidate documents taken from the semantic index when a hint is given.
    pub top_k: usize,
    /// Aggregate budget for the per-candidate structured queries.
    pub fanout_timeout_ms: u64,
    pub similarity_normalization: SimilarityNormalization,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            fanout_timeout_ms: 2_000,
            similarity_normalization: SimilarityNormalization::RelativeToBest,
        }
    }
}

/// Weights of the match-specificity score and the confidence formula.
///
/// `confidence = similarity^similarity_exponent * specificity^specificity_exponent`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Reward for an exact container type match.
    pub container_weight: f64,
    /// Reward for the weight falling inside a tier bracket (vs. starting rate).
    pub weight_bracket_weight: f64,
    /// Reward for a tight, recently issued validity window.
    pub validity_weight: f64,
    /// Age (days since `validFrom`) at which recency credit halves.
    pub recency_horizon_days: u32,
    /// Window length (days) at which tightness credit halves.
    pub tightness_horizon_days: u32,
    pub similarity_exponent: f64,
    pub specificity_exponent: f64,
}

impl ScoringConfig {
    /// Component weights scaled to sum to 1.
    pub fn normalized_weights(&self) -> (f64, f64, f64) {
        let total = self.container_weight + self.weight_bracket_weight + self.validity_weight;
        if total <= 0.0 {
            return (0.0, 0.0, 0.0);
        }
        (
            self.container_weight / total,
            self.weight_bracket_weight / total,
            self.validity_weight / total,
        )
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            container_weight: 0.4,
            weight_bracket_weight: 0.4,
            validity_weight: 0.2,
            recency_horizon_days: 365,
            tightness_horizon_days: 365,
            similarity_exponent: 1.0,
            specificity_exponent: 1.0,
        }
    }
}

/// Auto-send vs. review thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Minimum confidence for automatic sending.
    pub confidence_threshold: f64,
    /// A runner-up closer than this to the best match makes the result ambiguous.
    pub ambiguity_margin: f64,
    /// Send to review when the best match comes from a superseded sheet.
    pub review_superseded: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.9,
            ambiguity_margin: 0.05,
            review_superseded: true,
        }
    }
}

/// Structured-write retry queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Attempts before a task is dead-lettered.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Sleep between retry worker passes.
    pub poll_interval_ms: u64,
    /// Tasks claimed per worker pass.
    pub batch_size: usize,
    /// Budget for the inline structured write before it is handed to the
    /// retry queue.
    pub structured_write_timeout_ms: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 500,
            max_backoff_ms: 60_000,
            poll_interval_ms: 1_000,
            batch_size: 16,
            structured_write_timeout_ms: 5_000,
        }
    }
}

/// Embedding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding vector dimensions.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

/// Extra location aliases merged over the built-in table.
///
/// ```toml
/// [locations.aliases]
/// "NAVA SHEVA" = "NHAVA SHEVA"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub aliases: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = RatewiseConfig::default();
        assert_eq!(config.general.port, 8010);
        assert_eq!(config.resolver.top_k, 10);
        assert_eq!(config.resolver.fanout_timeout_ms, 2_000);
        assert_eq!(config.dispatch.confidence_threshold, 0.9);
        assert_eq!(config.dispatch.ambiguity_margin, 0.05);
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.ingestion.structured_write_timeout_ms, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_rejects_zero_write_timeout() {
        let file = create_temp_config("[ingestion]\nstructured_write_timeout_ms = 0\n");
        let err = RatewiseConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, RatewiseError::Config(_)));
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/srv/ratewise"
port = 9000

[resolver]
top_k = 5
similarity_normalization = "absolute"

[dispatch]
confidence_threshold = 0.85

[locations.aliases]
"NAVA SHEVA" = "NHAVA SHEVA"
"#;
        let file = create_temp_config(content);
        let config = RatewiseConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/srv/ratewise");
        assert_eq!(config.general.port, 9000);
        assert_eq!(config.resolver.top_k, 5);
        assert_eq!(
            config.resolver.similarity_normalization,
            SimilarityNormalization::Absolute
        );
        assert_eq!(config.dispatch.confidence_threshold, 0.85);
        assert_eq!(config.dispatch.ambiguity_margin, 0.05);
        assert_eq!(
            config.locations.aliases.get("NAVA SHEVA").map(String::as_str),
            Some("NHAVA SHEVA")
        );
    }

    #[test]
    fn test_load_rejects_invalid_threshold() {
        let file = create_temp_config("[dispatch]\nconfidence_threshold = 1.5\n");
        let err = RatewiseConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, RatewiseError::Config(_)));
    }

    #[test]
    fn test_load_rejects_zero_weights() {
        let content = r#"
[scoring]
container_weight = 0.0
weight_bracket_weight = 0.0
validity_weight = 0.0
"#;
        let file = create_temp_config(content);
        assert!(RatewiseConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = RatewiseConfig::load_or_default(Path::new("/nonexistent/ratewise.toml"));
        assert_eq!(config.general.data_dir, "~/.ratewise/data");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = RatewiseConfig::default();
        config.ingestion.max_attempts = 9;
        config.scoring.validity_weight = 0.5;
        config.save(&path).unwrap();

        let loaded = RatewiseConfig::load(&path).unwrap();
        assert_eq!(loaded.ingestion.max_attempts, 9);
        assert_eq!(loaded.scoring.validity_weight, 0.5);
    }

    #[test]
    fn test_normalized_weights_sum_to_one() {
        let scoring = ScoringConfig {
            container_weight: 2.0,
            weight_bracket_weight: 1.0,
            validity_weight: 1.0,
            ..Default::default()
        };
        let (c, w, v) = scoring.normalized_weights();
        assert!((c - 0.5).abs() < 1e-9);
        assert!((w - 0.25).abs() < 1e-9);
        assert!((v - 0.25).abs() < 1e-9);
    }
}
