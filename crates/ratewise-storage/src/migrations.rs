//! Database schema migrations.
//!
//! Version 1 creates the rate sheet tables (documents, routes, tiers,
//! surcharges), the structured-write retry queue, and the persisted
//! semantic records.

use rusqlite::Connection;
use tracing::info;

use ratewise_core::error::RatewiseError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), RatewiseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| RatewiseError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| RatewiseError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: rate_sheets");
    }

    Ok(())
}

/// Version 1: rate sheets, retry queue, semantic records.
///
/// Dates are `YYYY-MM-DD` text so range predicates compare lexically.
/// `uploaded_at` is unix microseconds; queue timestamps are unix millis.
fn apply_v1(conn: &Connection) -> Result<(), RatewiseError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS rate_sheet_documents (
            id              TEXT PRIMARY KEY NOT NULL,
            organization_id TEXT NOT NULL,
            uploader_id     TEXT NOT NULL,
            file_name       TEXT NOT NULL,
            carrier_name    TEXT NOT NULL,
            title           TEXT,
            sheet_type      TEXT NOT NULL DEFAULT 'ocean'
                            CHECK (sheet_type IN ('ocean', 'air', 'land', 'multimodal')),
            uploaded_at     INTEGER NOT NULL,
            superseded_by   TEXT,
            superseded_at   INTEGER,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_documents_org_uploaded
            ON rate_sheet_documents (organization_id, uploaded_at DESC);

        CREATE INDEX IF NOT EXISTS idx_documents_org_active
            ON rate_sheet_documents (organization_id)
            WHERE superseded_by IS NULL;

        CREATE TABLE IF NOT EXISTS routes (
            id                  TEXT PRIMARY KEY NOT NULL,
            document_id         TEXT NOT NULL,
            position            INTEGER NOT NULL,
            origin              TEXT NOT NULL,
            destination         TEXT NOT NULL,
            origin_code         TEXT,
            destination_code    TEXT,
            container_type      TEXT NOT NULL,
            transit_time_days   INTEGER,
            valid_from          TEXT,
            valid_to            TEXT,
            routing             TEXT,
            free_detention_days INTEGER,
            remarks             TEXT,
            FOREIGN KEY (document_id) REFERENCES rate_sheet_documents(id) ON DELETE CASCADE
        );

        -- Idempotency key for structured-write retries.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_routes_identity
            ON routes (document_id, origin, destination, container_type, COALESCE(valid_from, ''));

        CREATE INDEX IF NOT EXISTS idx_routes_lookup
            ON routes (origin, destination, container_type);

        CREATE TABLE IF NOT EXISTS pricing_tiers (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            route_id    TEXT NOT NULL,
            position    INTEGER NOT NULL,
            min_weight  REAL NOT NULL CHECK (min_weight >= 0),
            max_weight  REAL CHECK (max_weight IS NULL OR max_weight > min_weight),
            currency    TEXT NOT NULL,
            base_rate   REAL NOT NULL,
            remarks     TEXT,
            FOREIGN KEY (route_id) REFERENCES routes(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_tiers_route
            ON pricing_tiers (route_id, position);

        -- route_id NULL means the surcharge applies to the whole document.
        CREATE TABLE IF NOT EXISTS surcharges (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id  TEXT NOT NULL,
            route_id     TEXT,
            position     INTEGER NOT NULL,
            kind         TEXT NOT NULL,
            amount       REAL,
            percentage   REAL,
            currency     TEXT,
            applies_from TEXT,
            applies_to   TEXT,
            CHECK ((amount IS NULL) <> (percentage IS NULL)),
            FOREIGN KEY (document_id) REFERENCES rate_sheet_documents(id) ON DELETE CASCADE,
            FOREIGN KEY (route_id) REFERENCES routes(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_surcharges_route
            ON surcharges (route_id, position);

        CREATE INDEX IF NOT EXISTS idx_surcharges_document
            ON surcharges (document_id, position)
            WHERE route_id IS NULL;

        CREATE TABLE IF NOT EXISTS retry_tasks (
            id              TEXT PRIMARY KEY NOT NULL,
            document_id     TEXT NOT NULL UNIQUE,
            payload         TEXT NOT NULL,
            attempts        INTEGER NOT NULL DEFAULT 0,
            status          TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending', 'dead')),
            next_attempt_at INTEGER NOT NULL,
            last_error      TEXT,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_retry_tasks_due
            ON retry_tasks (status, next_attempt_at ASC);

        -- No foreign key: the semantic record is written before the document row.
        CREATE TABLE IF NOT EXISTS semantic_records (
            document_id     TEXT PRIMARY KEY NOT NULL,
            organization_id TEXT NOT NULL,
            embedding       BLOB NOT NULL,
            raw_text        TEXT NOT NULL,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_semantic_records_org
            ON semantic_records (organization_id);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'rate_sheets');
        ",
    )
    .map_err(|e| RatewiseError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn insert_document(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO rate_sheet_documents (id, organization_id, uploader_id, file_name, carrier_name, uploaded_at)
             VALUES (?1, 'org-1', 'user-1', 'rates.xlsx', 'Maersk', 0)",
            [id],
        )
        .unwrap();
    }

    #[test]
    fn test_migrations_run_once() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_route_identity_is_unique() {
        let conn = open_test_conn();
        insert_document(&conn, "doc-1");
        let insert = "INSERT INTO routes (id, document_id, position, origin, destination, container_type, valid_from)
                      VALUES (?1, 'doc-1', 0, 'MUMBAI', 'CHENNAI', 'FCL-40ft', NULL)";
        conn.execute(insert, ["r-1"]).unwrap();
        // NULL valid_from still collides through the COALESCE index.
        assert!(conn.execute(insert, ["r-2"]).is_err());
    }

    #[test]
    fn test_tier_bracket_check() {
        let conn = open_test_conn();
        insert_document(&conn, "doc-1");
        conn.execute(
            "INSERT INTO routes (id, document_id, position, origin, destination, container_type)
             VALUES ('r-1', 'doc-1', 0, 'MUMBAI', 'CHENNAI', 'FCL-40ft')",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO pricing_tiers (route_id, position, min_weight, max_weight, currency, base_rate)
             VALUES ('r-1', 0, 100.0, 50.0, 'USD', 10.0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_surcharge_amount_xor_percentage() {
        let conn = open_test_conn();
        insert_document(&conn, "doc-1");
        let result = conn.execute(
            "INSERT INTO surcharges (document_id, position, kind, amount, percentage)
             VALUES ('doc-1', 0, 'fuel', 10.0, 5.0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_sheet_type_check() {
        let conn = open_test_conn();
        let result = conn.execute(
            "INSERT INTO rate_sheet_documents (id, organization_id, uploader_id, file_name, carrier_name, sheet_type, uploaded_at)
             VALUES ('bad', 'org', 'u', 'f', 'c', 'rocket', 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_status_check() {
        let conn = open_test_conn();
        let result = conn.execute(
            "INSERT INTO retry_tasks (id, document_id, payload, status, next_attempt_at, created_at, updated_at)
             VALUES ('t', 'd', '{}', 'sleeping', 0, 0, 0)",
            [],
        );
        assert!(result.is_err());
    }
}
