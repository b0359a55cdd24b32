//! SQLite-backed rate sheet persistence.
//!
//! `RateSheetRepository` writes a document with all of its routes, tiers,
//! and surcharges in one transaction, applies supersession in the same
//! transaction, and serves the route lookups the resolver fans out over.
//! Location names reaching this layer are already normalized.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use ratewise_core::error::RatewiseError;
use ratewise_core::types::{
    PricingTier, RateSheetDocument, RateSheetType, Route, RouteRecord, StoredRateSheet,
    Surcharge, SurchargeKind,
};
use ratewise_core::ContainerType;

use crate::db::Database;

const ROUTE_COLUMNS: &str = "r.id, r.document_id, r.origin, r.destination, r.origin_code, \
     r.destination_code, r.container_type, r.transit_time_days, r.valid_from, r.valid_to, \
     r.routing, r.free_detention_days, r.remarks";
const ROUTE_COLUMN_COUNT: usize = 13;

const DOCUMENT_COLUMNS: &str = "d.id, d.organization_id, d.uploader_id, d.file_name, \
     d.carrier_name, d.title, d.sheet_type, d.uploaded_at, d.superseded_by";

/// Filter for [`RateSheetRepository::query_routes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteQuery {
    pub organization_id: String,
    pub origin: String,
    pub destination: String,
    pub container_type: Option<ContainerType>,
    pub as_of: NaiveDate,
    /// Restrict to one document (resolver fan-out).
    pub document_id: Option<Uuid>,
    pub include_superseded: bool,
}

/// Result of a structured write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteOutcome {
    Written {
        /// Older overlapping documents now superseded by this one.
        superseded: Vec<Uuid>,
        /// Set when a newer overlapping document already existed.
        superseded_by: Option<Uuid>,
    },
    /// The document was written by an earlier attempt. Nothing changed.
    AlreadyPresent,
}

/// Repository for rate sheet documents and their routes.
pub struct RateSheetRepository {
    db: Arc<Database>,
}

impl RateSheetRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Write a document and its routes atomically, then supersede overlaps.
    ///
    /// Idempotent per `document_id`: a second call returns
    /// [`WriteOutcome::AlreadyPresent`] without touching any row.
    pub fn write_sheet(
        &self,
        document: &RateSheetDocument,
        routes: &[Route],
    ) -> Result<WriteOutcome, RatewiseError> {
        if let Some(stray) = routes
            .iter()
            .find(|r| r.document_id != document.document_id)
        {
            return Err(RatewiseError::Validation(format!(
                "route {} belongs to document {}, not {}",
                stray.route_id, stray.document_id, document.document_id
            )));
        }

        let outcome = self.db.with_transaction(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM rate_sheet_documents WHERE id = ?1)",
                    params![document.document_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(storage)?;
            if exists {
                return Ok(WriteOutcome::AlreadyPresent);
            }

            insert_document(conn, document)?;
            for (position, surcharge) in document.surcharges.iter().enumerate() {
                insert_surcharge(conn, document.document_id, None, position, surcharge)?;
            }
            for (position, route) in routes.iter().enumerate() {
                insert_route(conn, position, route)?;
            }
            supersede_overlapping(conn, document, routes)
        })?;

        match &outcome {
            WriteOutcome::Written {
                superseded,
                superseded_by,
            } => info!(
                document_id = %document.document_id,
                routes = routes.len(),
                superseded = superseded.len(),
                late = superseded_by.is_some(),
                "Rate sheet written"
            ),
            WriteOutcome::AlreadyPresent => debug!(
                document_id = %document.document_id,
                "Rate sheet already present, write skipped"
            ),
        }
        Ok(outcome)
    }

    /// Routes matching `query` whose validity window contains `as_of`.
    ///
    /// Ordered newest document first, then by position within the sheet.
    pub fn query_routes(&self, query: &RouteQuery) -> Result<Vec<RouteRecord>, RatewiseError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {}, {}
                 FROM routes r
                 JOIN rate_sheet_documents d ON d.id = r.document_id
                 WHERE d.organization_id = ?1
                   AND r.origin = ?2
                   AND r.destination = ?3
                   AND (?4 IS NULL OR r.container_type = ?4)
                   AND (r.valid_from IS NULL OR r.valid_from <= ?5)
                   AND (r.valid_to IS NULL OR r.valid_to >= ?5)
                   AND (?6 IS NULL OR r.document_id = ?6)
                   AND (?7 = 1 OR d.superseded_by IS NULL)
                 ORDER BY d.uploaded_at DESC, r.document_id ASC, r.position ASC",
                ROUTE_COLUMNS, DOCUMENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(storage)?;
            let rows = stmt
                .query_map(
                    params![
                        query.organization_id,
                        query.origin,
                        query.destination,
                        query.container_type.as_ref().map(|c| c.code().to_string()),
                        query.as_of.to_string(),
                        query.document_id.map(|id| id.to_string()),
                        query.include_superseded as i32,
                    ],
                    |row| Ok((row_to_route(row, 0), row_to_document(row, ROUTE_COLUMN_COUNT))),
                )
                .map_err(storage)?;

            let mut document_surcharges: HashMap<Uuid, Vec<Surcharge>> = HashMap::new();
            let mut records = Vec::new();
            for row in rows {
                let (route, document) = row.map_err(storage)?;
                let mut route = route?;
                let mut document = document?;
                route.tiers = load_tiers(conn, route.route_id)?;
                route.surcharges = load_route_surcharges(conn, route.route_id)?;
                document.surcharges = match document_surcharges.get(&document.document_id) {
                    Some(cached) => cached.clone(),
                    None => {
                        let loaded = load_document_surcharges(conn, document.document_id)?;
                        document_surcharges.insert(document.document_id, loaded.clone());
                        loaded
                    }
                };
                records.push(RouteRecord { document, route });
            }
            Ok(records)
        })
    }

    /// Document IDs visible to an organization, newest first.
    pub fn document_ids(
        &self,
        organization_id: &str,
        include_superseded: bool,
    ) -> Result<Vec<Uuid>, RatewiseError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM rate_sheet_documents
                     WHERE organization_id = ?1 AND (?2 = 1 OR superseded_by IS NULL)
                     ORDER BY uploaded_at DESC, id ASC",
                )
                .map_err(storage)?;
            let rows = stmt
                .query_map(params![organization_id, include_superseded as i32], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(storage)?;

            let mut ids = Vec::new();
            for row in rows {
                ids.push(parse_uuid(&row.map_err(storage)?)?);
            }
            Ok(ids)
        })
    }

    /// Document headers of an organization, newest first.
    pub fn list_documents(
        &self,
        organization_id: &str,
        include_superseded: bool,
        limit: u64,
    ) -> Result<Vec<RateSheetDocument>, RatewiseError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM rate_sheet_documents d
                 WHERE d.organization_id = ?1 AND (?2 = 1 OR d.superseded_by IS NULL)
                 ORDER BY d.uploaded_at DESC, d.id ASC
                 LIMIT ?3",
                DOCUMENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(storage)?;
            let rows = stmt
                .query_map(
                    params![organization_id, include_superseded as i32, limit as i64],
                    |row| Ok(row_to_document(row, 0)),
                )
                .map_err(storage)?;

            let mut documents = Vec::new();
            for row in rows {
                let mut document = row.map_err(storage)??;
                document.surcharges = load_document_surcharges(conn, document.document_id)?;
                documents.push(document);
            }
            Ok(documents)
        })
    }

    /// A full sheet, only if it belongs to `organization_id`.
    pub fn find_sheet(
        &self,
        document_id: Uuid,
        organization_id: &str,
    ) -> Result<Option<StoredRateSheet>, RatewiseError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM rate_sheet_documents d WHERE d.id = ?1 AND d.organization_id = ?2",
                DOCUMENT_COLUMNS
            );
            let document = conn
                .query_row(
                    &sql,
                    params![document_id.to_string(), organization_id],
                    |row| Ok(row_to_document(row, 0)),
                )
                .optional()
                .map_err(storage)?;
            let mut document = match document {
                Some(document) => document?,
                None => return Ok(None),
            };
            document.surcharges = load_document_surcharges(conn, document_id)?;

            let sql = format!(
                "SELECT {} FROM routes r WHERE r.document_id = ?1 ORDER BY r.position ASC",
                ROUTE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(storage)?;
            let rows = stmt
                .query_map(params![document_id.to_string()], |row| {
                    Ok(row_to_route(row, 0))
                })
                .map_err(storage)?;

            let mut routes = Vec::new();
            for row in rows {
                let mut route = row.map_err(storage)??;
                route.tiers = load_tiers(conn, route.route_id)?;
                route.surcharges = load_route_surcharges(conn, route.route_id)?;
                routes.push(route);
            }
            Ok(Some(StoredRateSheet { document, routes }))
        })
    }

    /// Total number of stored documents.
    pub fn count_documents(&self) -> Result<u64, RatewiseError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM rate_sheet_documents", [], |row| {
                    row.get(0)
                })
                .map_err(storage)?;
            Ok(count as u64)
        })
    }
}

// =============================================================================
// Writes
// =============================================================================

fn insert_document(conn: &Connection, document: &RateSheetDocument) -> Result<(), RatewiseError> {
    conn.execute(
        "INSERT INTO rate_sheet_documents
            (id, organization_id, uploader_id, file_name, carrier_name, title, sheet_type, uploaded_at, superseded_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            document.document_id.to_string(),
            document.organization_id,
            document.uploader_id,
            document.file_name,
            document.carrier_name,
            document.title,
            document.sheet_type.as_str(),
            document.uploaded_at.timestamp_micros(),
            document.superseded_by.map(|id| id.to_string()),
        ],
    )
    .map_err(|e| RatewiseError::Storage(format!("Failed to insert document: {}", e)))?;
    Ok(())
}

fn insert_route(conn: &Connection, position: usize, route: &Route) -> Result<(), RatewiseError> {
    conn.execute(
        "INSERT INTO routes
            (id, document_id, position, origin, destination, origin_code, destination_code,
             container_type, transit_time_days, valid_from, valid_to, routing, free_detention_days, remarks)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            route.route_id.to_string(),
            route.document_id.to_string(),
            position as i64,
            route.origin,
            route.destination,
            route.origin_code,
            route.destination_code,
            route.container_type.code(),
            route.transit_time_days,
            route.valid_from.map(|d| d.to_string()),
            route.valid_to.map(|d| d.to_string()),
            route.routing,
            route.free_detention_days,
            route.remarks,
        ],
    )
    .map_err(|e| RatewiseError::Storage(format!("Failed to insert route: {}", e)))?;

    for (position, tier) in route.tiers.iter().enumerate() {
        conn.execute(
            "INSERT INTO pricing_tiers (route_id, position, min_weight, max_weight, currency, base_rate, remarks)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                route.route_id.to_string(),
                position as i64,
                tier.min_weight,
                tier.max_weight,
                tier.currency,
                tier.base_rate,
                tier.remarks,
            ],
        )
        .map_err(|e| RatewiseError::Storage(format!("Failed to insert pricing tier: {}", e)))?;
    }

    for (position, surcharge) in route.surcharges.iter().enumerate() {
        insert_surcharge(conn, route.document_id, Some(route.route_id), position, surcharge)?;
    }
    Ok(())
}

fn insert_surcharge(
    conn: &Connection,
    document_id: Uuid,
    route_id: Option<Uuid>,
    position: usize,
    surcharge: &Surcharge,
) -> Result<(), RatewiseError> {
    conn.execute(
        "INSERT INTO surcharges
            (document_id, route_id, position, kind, amount, percentage, currency, applies_from, applies_to)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            document_id.to_string(),
            route_id.map(|id| id.to_string()),
            position as i64,
            surcharge.kind.as_str(),
            surcharge.amount,
            surcharge.percentage,
            surcharge.currency,
            surcharge.applies_from.map(|d| d.to_string()),
            surcharge.applies_to.map(|d| d.to_string()),
        ],
    )
    .map_err(|e| RatewiseError::Storage(format!("Failed to insert surcharge: {}", e)))?;
    Ok(())
}

/// Mark overlapping active documents of the same organization as superseded.
///
/// Overlap: same origin, destination, and container type with intersecting
/// validity windows. Only documents uploaded no later than `document` are
/// superseded by it; if a newer overlapping document exists (a retried write
/// landing late), `document` itself is superseded by the newest one.
fn supersede_overlapping(
    conn: &Connection,
    document: &RateSheetDocument,
    routes: &[Route],
) -> Result<WriteOutcome, RatewiseError> {
    let mut overlapping: HashMap<Uuid, i64> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT d.id, d.uploaded_at
             FROM routes r
             JOIN rate_sheet_documents d ON d.id = r.document_id
             WHERE d.organization_id = ?1
               AND d.id <> ?2
               AND d.superseded_by IS NULL
               AND r.origin = ?3
               AND r.destination = ?4
               AND r.container_type = ?5
               AND (?6 IS NULL OR r.valid_to IS NULL OR r.valid_to >= ?6)
               AND (?7 IS NULL OR r.valid_from IS NULL OR r.valid_from <= ?7)",
        )
        .map_err(storage)?;

    for route in routes {
        let rows = stmt
            .query_map(
                params![
                    document.organization_id,
                    document.document_id.to_string(),
                    route.origin,
                    route.destination,
                    route.container_type.code(),
                    route.valid_from.map(|d| d.to_string()),
                    route.valid_to.map(|d| d.to_string()),
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .map_err(storage)?;
        for row in rows {
            let (id, uploaded_at) = row.map_err(storage)?;
            overlapping.insert(parse_uuid(&id)?, uploaded_at);
        }
    }

    let mine = document.uploaded_at.timestamp_micros();
    let mut older: Vec<Uuid> = Vec::new();
    let mut newest: Option<(i64, Uuid)> = None;
    for (id, uploaded_at) in overlapping {
        if uploaded_at <= mine {
            older.push(id);
        } else if newest.map_or(true, |(at, _)| uploaded_at > at) {
            newest = Some((uploaded_at, id));
        }
    }
    older.sort();

    let now = Utc::now().timestamp_micros();
    if !older.is_empty() {
        let placeholders = (0..older.len())
            .map(|i| format!("?{}", i + 3))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE rate_sheet_documents SET superseded_by = ?1, superseded_at = ?2
             WHERE superseded_by IS NULL AND id IN ({})",
            placeholders
        );
        let mut values = vec![
            Value::Text(document.document_id.to_string()),
            Value::Integer(now),
        ];
        values.extend(older.iter().map(|id| Value::Text(id.to_string())));
        conn.execute(&sql, params_from_iter(values))
            .map_err(|e| RatewiseError::Storage(format!("Failed to supersede documents: {}", e)))?;
        info!(
            document_id = %document.document_id,
            superseded = ?older,
            "Superseded older overlapping rate sheets"
        );
    }

    let superseded_by = newest.map(|(_, id)| id);
    if let Some(newer) = superseded_by {
        conn.execute(
            "UPDATE rate_sheet_documents SET superseded_by = ?1, superseded_at = ?2 WHERE id = ?3",
            params![newer.to_string(), now, document.document_id.to_string()],
        )
        .map_err(|e| RatewiseError::Storage(format!("Failed to supersede document: {}", e)))?;
        info!(
            document_id = %document.document_id,
            superseded_by = %newer,
            "Late write superseded by a newer overlapping rate sheet"
        );
    }

    Ok(WriteOutcome::Written {
        superseded: older,
        superseded_by,
    })
}

// =============================================================================
// Reads
// =============================================================================

fn load_tiers(conn: &Connection, route_id: Uuid) -> Result<Vec<PricingTier>, RatewiseError> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT min_weight, max_weight, currency, base_rate, remarks
             FROM pricing_tiers WHERE route_id = ?1 ORDER BY position ASC",
        )
        .map_err(storage)?;
    let rows = stmt
        .query_map(params![route_id.to_string()], |row| {
            Ok(PricingTier {
                min_weight: row.get(0)?,
                max_weight: row.get(1)?,
                currency: row.get(2)?,
                base_rate: row.get(3)?,
                remarks: row.get(4)?,
            })
        })
        .map_err(storage)?;

    let mut tiers = Vec::new();
    for row in rows {
        tiers.push(row.map_err(storage)?);
    }
    Ok(tiers)
}

fn load_route_surcharges(
    conn: &Connection,
    route_id: Uuid,
) -> Result<Vec<Surcharge>, RatewiseError> {
    load_surcharges(
        conn,
        "SELECT kind, amount, percentage, currency, applies_from, applies_to
         FROM surcharges WHERE route_id = ?1 ORDER BY position ASC",
        route_id,
    )
}

fn load_document_surcharges(
    conn: &Connection,
    document_id: Uuid,
) -> Result<Vec<Surcharge>, RatewiseError> {
    load_surcharges(
        conn,
        "SELECT kind, amount, percentage, currency, applies_from, applies_to
         FROM surcharges WHERE document_id = ?1 AND route_id IS NULL ORDER BY position ASC",
        document_id,
    )
}

fn load_surcharges(
    conn: &Connection,
    sql: &str,
    key: Uuid,
) -> Result<Vec<Surcharge>, RatewiseError> {
    let mut stmt = conn.prepare_cached(sql).map_err(storage)?;
    let rows = stmt
        .query_map(params![key.to_string()], |row| Ok(row_to_surcharge(row)))
        .map_err(storage)?;

    let mut surcharges = Vec::new();
    for row in rows {
        surcharges.push(row.map_err(storage)??);
    }
    Ok(surcharges)
}

fn row_to_surcharge(row: &Row<'_>) -> Result<Surcharge, RatewiseError> {
    let kind: String = col(row, 0)?;
    Ok(Surcharge {
        kind: SurchargeKind::parse(&kind),
        amount: col(row, 1)?,
        percentage: col(row, 2)?,
        currency: col(row, 3)?,
        applies_from: parse_date(col(row, 4)?)?,
        applies_to: parse_date(col(row, 5)?)?,
    })
}

fn row_to_route(row: &Row<'_>, offset: usize) -> Result<Route, RatewiseError> {
    let id: String = col(row, offset)?;
    let document_id: String = col(row, offset + 1)?;
    let container_type: String = col(row, offset + 6)?;

    Ok(Route {
        route_id: parse_uuid(&id)?,
        document_id: parse_uuid(&document_id)?,
        origin: col(row, offset + 2)?,
        destination: col(row, offset + 3)?,
        origin_code: col(row, offset + 4)?,
        destination_code: col(row, offset + 5)?,
        container_type: ContainerType::parse(&container_type),
        transit_time_days: col(row, offset + 7)?,
        valid_from: parse_date(col(row, offset + 8)?)?,
        valid_to: parse_date(col(row, offset + 9)?)?,
        routing: col(row, offset + 10)?,
        free_detention_days: col(row, offset + 11)?,
        remarks: col(row, offset + 12)?,
        tiers: Vec::new(),
        surcharges: Vec::new(),
    })
}

fn row_to_document(row: &Row<'_>, offset: usize) -> Result<RateSheetDocument, RatewiseError> {
    let id: String = col(row, offset)?;
    let sheet_type: String = col(row, offset + 6)?;
    let uploaded_at: i64 = col(row, offset + 7)?;
    let superseded_by: Option<String> = col(row, offset + 8)?;

    Ok(RateSheetDocument {
        document_id: parse_uuid(&id)?,
        organization_id: col(row, offset + 1)?,
        uploader_id: col(row, offset + 2)?,
        file_name: col(row, offset + 3)?,
        carrier_name: col(row, offset + 4)?,
        title: col(row, offset + 5)?,
        sheet_type: RateSheetType::parse(&sheet_type),
        uploaded_at: DateTime::<Utc>::from_timestamp_micros(uploaded_at).ok_or_else(|| {
            RatewiseError::Storage(format!("Invalid uploaded_at: {}", uploaded_at))
        })?,
        superseded_by: superseded_by.as_deref().map(parse_uuid).transpose()?,
        surcharges: Vec::new(),
    })
}

fn col<T: FromSql>(row: &Row<'_>, idx: usize) -> Result<T, RatewiseError> {
    row.get(idx).map_err(storage)
}

fn parse_date(raw: Option<String>) -> Result<Option<NaiveDate>, RatewiseError> {
    raw.map(|s| {
        s.parse::<NaiveDate>()
            .map_err(|e| RatewiseError::Storage(format!("Invalid date '{}': {}", s, e)))
    })
    .transpose()
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, RatewiseError> {
    Uuid::parse_str(raw).map_err(|e| RatewiseError::Storage(format!("Invalid UUID: {}", e)))
}

pub(crate) fn storage(e: rusqlite::Error) -> RatewiseError {
    RatewiseError::Storage(e.to_string())
}
