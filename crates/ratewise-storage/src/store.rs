//! The async seam between the engine and the structured rate store.
//!
//! `SqliteRateStore` normalizes locations on the way in and on the way out,
//! and moves every SQLite call onto the blocking pool so a fan-out timeout
//! can abandon a slow candidate without stalling the runtime.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use ratewise_core::error::RatewiseError;
use ratewise_core::location::LocationNormalizer;
use ratewise_core::types::{QueryCriteria, RateSheetDocument, Route, RouteRecord, StoredRateSheet};

use crate::repository::{RateSheetRepository, RouteQuery, WriteOutcome};

/// Structured rate store operations the engine depends on.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Atomically write a document with its routes and apply supersession.
    async fn write_sheet(
        &self,
        document: RateSheetDocument,
        routes: Vec<Route>,
    ) -> Result<WriteOutcome, RatewiseError>;

    /// Routes matching `criteria`, optionally restricted to one document.
    async fn query_routes(
        &self,
        criteria: &QueryCriteria,
        document_id: Option<Uuid>,
    ) -> Result<Vec<RouteRecord>, RatewiseError>;

    /// Every document visible to an organization, newest first.
    async fn document_ids(
        &self,
        organization_id: &str,
        include_superseded: bool,
    ) -> Result<Vec<Uuid>, RatewiseError>;

    async fn find_sheet(
        &self,
        document_id: Uuid,
        organization_id: &str,
    ) -> Result<Option<StoredRateSheet>, RatewiseError>;

    async fn list_documents(
        &self,
        organization_id: &str,
        include_superseded: bool,
        limit: u64,
    ) -> Result<Vec<RateSheetDocument>, RatewiseError>;
}

pub struct SqliteRateStore {
    repo: Arc<RateSheetRepository>,
    normalizer: Arc<LocationNormalizer>,
}

impl SqliteRateStore {
    pub fn new(repo: Arc<RateSheetRepository>, normalizer: Arc<LocationNormalizer>) -> Self {
        Self { repo, normalizer }
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, RatewiseError>
    where
        F: FnOnce(&RateSheetRepository) -> Result<T, RatewiseError> + Send + 'static,
        T: Send + 'static,
    {
        let repo = Arc::clone(&self.repo);
        tokio::task::spawn_blocking(move || f(&repo))
            .await
            .map_err(|e| RatewiseError::Storage(format!("Storage task failed: {}", e)))?
    }
}

#[async_trait]
impl RateStore for SqliteRateStore {
    async fn write_sheet(
        &self,
        document: RateSheetDocument,
        mut routes: Vec<Route>,
    ) -> Result<WriteOutcome, RatewiseError> {
        for route in &mut routes {
            route.origin = self.normalizer.normalize(&route.origin);
            route.destination = self.normalizer.normalize(&route.destination);
        }
        self.blocking(move |repo| repo.write_sheet(&document, &routes))
            .await
    }

    async fn query_routes(
        &self,
        criteria: &QueryCriteria,
        document_id: Option<Uuid>,
    ) -> Result<Vec<RouteRecord>, RatewiseError> {
        let query = RouteQuery {
            organization_id: criteria.organization_id.clone(),
            origin: self.normalizer.normalize(&criteria.origin),
            destination: self.normalizer.normalize(&criteria.destination),
            container_type: criteria.container_type.clone(),
            as_of: criteria.as_of,
            document_id,
            include_superseded: criteria.include_superseded,
        };
        debug!(
            origin = %query.origin,
            destination = %query.destination,
            document_id = ?document_id,
            "Querying routes"
        );
        self.blocking(move |repo| repo.query_routes(&query)).await
    }

    async fn document_ids(
        &self,
        organization_id: &str,
        include_superseded: bool,
    ) -> Result<Vec<Uuid>, RatewiseError> {
        let organization_id = organization_id.to_string();
        self.blocking(move |repo| repo.document_ids(&organization_id, include_superseded))
            .await
    }

    async fn find_sheet(
        &self,
        document_id: Uuid,
        organization_id: &str,
    ) -> Result<Option<StoredRateSheet>, RatewiseError> {
        let organization_id = organization_id.to_string();
        self.blocking(move |repo| repo.find_sheet(document_id, &organization_id))
            .await
    }

    async fn list_documents(
        &self,
        organization_id: &str,
        include_superseded: bool,
        limit: u64,
    ) -> Result<Vec<RateSheetDocument>, RatewiseError> {
        let organization_id = organization_id.to_string();
        self.blocking(move |repo| repo.list_documents(&organization_id, include_superseded, limit))
            .await
    }
}
