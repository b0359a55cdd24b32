//! Auto-send vs. human review.

use serde::{Deserialize, Serialize};

use ratewise_core::config::DispatchConfig;
use ratewise_core::types::ResolvedMatch;

use crate::resolver::Resolution;

/// Why a resolution needs a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    NoMatches,
    /// Stored data violated an invariant while resolving.
    IntegrityIssues,
    /// The best match comes from a superseded sheet.
    SupersededBest,
    BelowThreshold,
    /// A runner-up is within the ambiguity margin of the best match.
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    AutoSend {
        best: ResolvedMatch,
        confidence: f64,
    },
    ReviewRequired {
        reason: ReviewReason,
        /// Matches within the ambiguity margin of the best one, best first.
        contenders: Vec<ResolvedMatch>,
        /// The full match set.
        matches: Vec<ResolvedMatch>,
    },
}

impl Decision {
    pub fn is_auto_send(&self) -> bool {
        matches!(self, Decision::AutoSend { .. })
    }

    pub fn review_reason(&self) -> Option<ReviewReason> {
        match self {
            Decision::AutoSend { .. } => None,
            Decision::ReviewRequired { reason, .. } => Some(*reason),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchPolicy {
    config: DispatchConfig,
}

impl DispatchPolicy {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    /// Decide on matches ordered best-first.
    pub fn decide(&self, matches: &[ResolvedMatch]) -> Decision {
        let Some(best) = matches.first() else {
            return self.review(ReviewReason::NoMatches, matches);
        };

        if self.config.review_superseded && best.superseded {
            return self.review(ReviewReason::SupersededBest, matches);
        }
        if best.confidence < self.config.confidence_threshold {
            return self.review(ReviewReason::BelowThreshold, matches);
        }
        if let Some(second) = matches.get(1) {
            if best.confidence - second.confidence < self.config.ambiguity_margin {
                return self.review(ReviewReason::Ambiguous, matches);
            }
        }

        Decision::AutoSend {
            best: best.clone(),
            confidence: best.confidence,
        }
    }

    /// Like [`decide`](Self::decide), but any integrity issue forces review.
    pub fn decide_resolution(&self, resolution: &Resolution) -> Decision {
        if !resolution.integrity_issues.is_empty() {
            return self.review(ReviewReason::IntegrityIssues, &resolution.matches);
        }
        self.decide(&resolution.matches)
    }

    fn review(&self, reason: ReviewReason, matches: &[ResolvedMatch]) -> Decision {
        let contenders = match matches.first() {
            Some(best) => std::iter::once(best)
                .chain(
                    matches[1..]
                        .iter()
                        .take_while(|m| best.confidence - m.confidence < self.config.ambiguity_margin),
                )
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        Decision::ReviewRequired {
            reason,
            contenders,
            matches: matches.to_vec(),
        }
    }
}
