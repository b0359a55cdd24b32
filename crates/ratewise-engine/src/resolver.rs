//! Hybrid resolution: semantic candidates, structured rates, ranking.
//!
//! With a free-text hint the semantic index picks the top-K candidate
//! documents of the organization; without one every visible document of the
//! organization is a candidate. Each candidate's routes are fetched
//! concurrently under one aggregate deadline. Candidates that time out or
//! fail are dropped and counted, so a slow store degrades the answer instead
//! of failing it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ratewise_core::config::{ResolverConfig, ScoringConfig};
use ratewise_core::error::RatewiseError;
use ratewise_core::types::{IntegrityIssue, QueryCriteria, ResolvedMatch, RouteRecord};
use ratewise_storage::{extract_precise_rate, RateStore, TierMatch};
use ratewise_vector::{DynEmbeddingService, SemanticIndex};

use crate::scoring::MatchScorer;

/// Semantic hits fetched per requested candidate before superseded sheets
/// are filtered out.
const OVERFETCH_FACTOR: usize = 3;

/// Counters describing how a resolution was produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionDiagnostics {
    pub candidates_searched: usize,
    /// Candidates whose structured query missed the deadline.
    pub timed_out: usize,
    /// Candidates whose structured query failed.
    pub failed: usize,
    /// The hint could not be searched; every organization document was scanned.
    pub semantic_fallback: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Best first.
    pub matches: Vec<ResolvedMatch>,
    pub integrity_issues: Vec<IntegrityIssue>,
    pub diagnostics: ResolutionDiagnostics,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    document_id: Uuid,
    similarity: Option<f64>,
}

pub struct HybridResolver {
    store: Arc<dyn RateStore>,
    index: Arc<dyn SemanticIndex>,
    embedder: Arc<dyn DynEmbeddingService>,
    scorer: MatchScorer,
    top_k: usize,
    fanout_timeout: Duration,
}

impl HybridResolver {
    pub fn new(
        store: Arc<dyn RateStore>,
        index: Arc<dyn SemanticIndex>,
        embedder: Arc<dyn DynEmbeddingService>,
        resolver: &ResolverConfig,
        scoring: &ScoringConfig,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            scorer: MatchScorer::new(scoring.clone(), resolver.similarity_normalization),
            top_k: resolver.top_k,
            fanout_timeout: Duration::from_millis(resolver.fanout_timeout_ms),
        }
    }

    /// Ranked matches for `criteria`, best first.
    ///
    /// No candidates, or candidates without a matching route, yield an empty
    /// match list rather than an error.
    pub async fn resolve(
        &self,
        criteria: &QueryCriteria,
        hint: Option<&str>,
    ) -> Result<Resolution, RatewiseError> {
        validate_criteria(criteria)?;
        let started = Instant::now();
        let mut diagnostics = ResolutionDiagnostics::default();

        let candidates = self.candidates(criteria, hint, &mut diagnostics).await?;
        diagnostics.candidates_searched = candidates.len();
        let best_similarity = candidates
            .iter()
            .filter_map(|c| c.similarity)
            .reduce(f64::max);

        let deadline = tokio::time::Instant::now() + self.fanout_timeout;
        let lookups = candidates.iter().map(|candidate| async move {
            let result = tokio::time::timeout_at(
                deadline,
                self.store.query_routes(criteria, Some(candidate.document_id)),
            )
            .await;
            (*candidate, result)
        });
        let results = join_all(lookups).await;

        let mut matches = Vec::new();
        let mut integrity_issues = Vec::new();
        for (candidate, result) in results {
            let records = match result {
                Err(_) => {
                    diagnostics.timed_out += 1;
                    warn!(
                        document_id = %candidate.document_id,
                        timeout_ms = self.fanout_timeout.as_millis() as u64,
                        "Candidate query timed out, dropped"
                    );
                    continue;
                }
                Ok(Err(e)) => {
                    diagnostics.failed += 1;
                    warn!(document_id = %candidate.document_id, error = %e, "Candidate query failed, dropped");
                    continue;
                }
                Ok(Ok(records)) => records,
            };

            for record in records {
                match extract_precise_rate(&record.route, criteria.weight) {
                    Ok(tier) => {
                        matches.push(self.build_match(criteria, record, tier, candidate, best_similarity))
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(route_id = %record.route.route_id, "No tier for weight, route skipped");
                    }
                    Err(RatewiseError::DataIntegrity(message)) => {
                        error!(
                            document_id = %record.document.document_id,
                            route_id = %record.route.route_id,
                            %message,
                            "Data integrity violation in stored route"
                        );
                        integrity_issues.push(IntegrityIssue {
                            document_id: record.document.document_id,
                            route_id: record.route.route_id,
                            message,
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        rank(&mut matches);
        diagnostics.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            organization_id = %criteria.organization_id,
            candidates = diagnostics.candidates_searched,
            matches = matches.len(),
            dropped = diagnostics.timed_out + diagnostics.failed,
            integrity_issues = integrity_issues.len(),
            elapsed_ms = diagnostics.elapsed_ms,
            "Resolution complete"
        );

        Ok(Resolution {
            matches,
            integrity_issues,
            diagnostics,
        })
    }

    async fn candidates(
        &self,
        criteria: &QueryCriteria,
        hint: Option<&str>,
        diagnostics: &mut ResolutionDiagnostics,
    ) -> Result<Vec<Candidate>, RatewiseError> {
        if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
            match self.semantic_candidates(criteria, hint).await {
                Ok(candidates) => return Ok(candidates),
                Err(e) => {
                    warn!(error = %e, "Semantic search failed, scanning the organization instead");
                    diagnostics.semantic_fallback = true;
                }
            }
        }

        let ids = self
            .store
            .document_ids(&criteria.organization_id, criteria.include_superseded)
            .await?;
        Ok(ids
            .into_iter()
            .map(|document_id| Candidate {
                document_id,
                similarity: None,
            })
            .collect())
    }

    /// Top-K hits among the documents the query may see.
    ///
    /// Superseded sheets keep their index entries, so unless history was
    /// requested the search over-fetches and widens until K visible
    /// documents are found or the organization's entries run out.
    async fn semantic_candidates(
        &self,
        criteria: &QueryCriteria,
        hint: &str,
    ) -> Result<Vec<Candidate>, RatewiseError> {
        let query = self.embedder.embed_boxed(hint).await?;
        let organization = Some(criteria.organization_id.as_str());

        if criteria.include_superseded {
            let hits = self.index.search(&query, self.top_k, organization).await?;
            debug!(hits = hits.len(), top_k = self.top_k, "Semantic candidates");
            return Ok(hits
                .into_iter()
                .map(|hit| Candidate {
                    document_id: hit.document_id,
                    similarity: Some(hit.score),
                })
                .collect());
        }

        let visible: HashSet<Uuid> = self
            .store
            .document_ids(&criteria.organization_id, false)
            .await?
            .into_iter()
            .collect();
        let wanted = self.top_k.min(visible.len());
        let mut fetch = self.top_k.saturating_mul(OVERFETCH_FACTOR).max(1);
        loop {
            let hits = self.index.search(&query, fetch, organization).await?;
            let exhausted = hits.len() < fetch;
            let candidates: Vec<Candidate> = hits
                .into_iter()
                .filter(|hit| visible.contains(&hit.document_id))
                .take(self.top_k)
                .map(|hit| Candidate {
                    document_id: hit.document_id,
                    similarity: Some(hit.score),
                })
                .collect();
            if candidates.len() >= wanted || exhausted {
                debug!(
                    hits = candidates.len(),
                    fetched = fetch,
                    top_k = self.top_k,
                    "Semantic candidates"
                );
                return Ok(candidates);
            }
            fetch = fetch.saturating_mul(2);
        }
    }

    fn build_match(
        &self,
        criteria: &QueryCriteria,
        record: RouteRecord,
        tier: TierMatch,
        candidate: Candidate,
        best_similarity: Option<f64>,
    ) -> ResolvedMatch {
        let specificity = self.scorer.specificity(criteria, &record, &tier);
        let similarity = self
            .scorer
            .normalize_similarity(candidate.similarity, best_similarity);
        let applicable_surcharges = record
            .document
            .surcharges
            .iter()
            .chain(record.route.surcharges.iter())
            .filter(|s| s.applies_on(criteria.as_of))
            .cloned()
            .collect();

        ResolvedMatch {
            document_id: record.document.document_id,
            superseded: record.document.is_superseded(),
            carrier_name: record.document.carrier_name,
            file_name: record.document.file_name,
            route: record.route,
            tier: tier.tier,
            containment: tier.containment,
            applicable_surcharges,
            similarity_score: candidate.similarity,
            match_specificity: specificity,
            confidence: self.scorer.confidence(similarity, specificity),
        }
    }
}

/// Confidence descending, then newer `valid_from` (open start last), then
/// document ID, then route ID.
fn rank(matches: &mut [ResolvedMatch]) {
    matches.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.route.valid_from.cmp(&a.route.valid_from))
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.route.route_id.cmp(&b.route.route_id))
    });
}

fn validate_criteria(criteria: &QueryCriteria) -> Result<(), RatewiseError> {
    for (field, value) in [
        ("organization_id", &criteria.organization_id),
        ("origin", &criteria.origin),
        ("destination", &criteria.destination),
    ] {
        if value.trim().is_empty() {
            return Err(RatewiseError::Validation(format!("{} must not be empty", field)));
        }
    }
    if let Some(weight) = criteria.weight {
        if !weight.is_finite() || weight < 0.0 {
            return Err(RatewiseError::Validation(format!(
                "weight {} must be a finite, non-negative number",
                weight
            )));
        }
    }
    Ok(())
}
