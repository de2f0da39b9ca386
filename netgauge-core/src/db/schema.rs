//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- ============================================
    -- Reference entities, managed externally
    -- ============================================

    CREATE TABLE IF NOT EXISTS domains (
        id               TEXT PRIMARY KEY,
        name             TEXT NOT NULL,
        slug             TEXT NOT NULL UNIQUE,
        is_active        INTEGER NOT NULL DEFAULT 1,
        created_at       DATETIME NOT NULL,
        metadata         JSON
    );

    CREATE TABLE IF NOT EXISTS providers (
        id               TEXT PRIMARY KEY,
        name             TEXT NOT NULL,
        slug             TEXT NOT NULL UNIQUE,
        is_active        INTEGER NOT NULL DEFAULT 1,
        technologies     JSON,
        created_at       DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS states (
        id               TEXT PRIMARY KEY,
        name             TEXT NOT NULL,
        code             TEXT NOT NULL UNIQUE
    );

    -- ============================================
    -- Reports, written once at ingestion
    -- ============================================

    CREATE TABLE IF NOT EXISTS reports (
        id               TEXT PRIMARY KEY,
        domain_id        TEXT NOT NULL REFERENCES domains(id),
        report_date      DATE NOT NULL,
        status           TEXT NOT NULL DEFAULT 'pending',

        -- Resolved from the payload's speed_metrics.overall.avg at ingestion;
        -- NULL when the snapshot carried no speed metrics
        avg_speed        REAL,

        -- Dedup lineage
        source_hash      TEXT UNIQUE,
        ingested_at      DATETIME NOT NULL,

        -- Lossless capture of the ingested snapshot
        payload          JSON NOT NULL
    );

    CREATE TABLE IF NOT EXISTS report_summaries (
        report_id        TEXT PRIMARY KEY REFERENCES reports(id),
        total_requests   INTEGER NOT NULL,
        success_rate     REAL NOT NULL,
        failed_requests  INTEGER NOT NULL,

        -- Per-report approximations, never summed across reports
        unique_providers INTEGER NOT NULL,
        unique_states    INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS report_providers (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        report_id        TEXT NOT NULL REFERENCES reports(id),
        provider_id      TEXT NOT NULL REFERENCES providers(id),
        technology       TEXT NOT NULL DEFAULT '',
        total_count      INTEGER NOT NULL,
        success_rate     REAL NOT NULL,
        avg_speed        REAL NOT NULL,
        rank_position    INTEGER
    );

    CREATE TABLE IF NOT EXISTS report_states (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        report_id        TEXT NOT NULL REFERENCES reports(id),
        state_id         TEXT NOT NULL REFERENCES states(id),
        request_count    INTEGER NOT NULL,
        success_rate     REAL NOT NULL,
        avg_speed        REAL NOT NULL
    );

    -- ============================================
    -- Indexes
    -- ============================================

    CREATE INDEX IF NOT EXISTS idx_reports_domain ON reports(domain_id);
    CREATE INDEX IF NOT EXISTS idx_reports_status ON reports(status);
    CREATE INDEX IF NOT EXISTS idx_reports_domain_date ON reports(domain_id, report_date);
    CREATE INDEX IF NOT EXISTS idx_report_providers_report ON report_providers(report_id);
    CREATE INDEX IF NOT EXISTS idx_report_providers_provider ON report_providers(provider_id);
    CREATE INDEX IF NOT EXISTS idx_report_states_report ON report_states(report_id);
    CREATE INDEX IF NOT EXISTS idx_report_states_state ON report_states(state_id);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "domains",
            "providers",
            "states",
            "reports",
            "report_summaries",
            "report_providers",
            "report_states",
        ];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_foreign_keys() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        run_migrations(&conn).unwrap();

        let fk_list: Vec<(String, String)> = conn
            .prepare("PRAGMA foreign_key_list(report_providers)")
            .unwrap()
            .query_map([], |row| {
                Ok((row.get::<_, String>(2)?, row.get::<_, String>(3)?))
            })
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(
            fk_list.iter().any(|(table, _)| table == "reports"),
            "report_providers should reference reports"
        );
        assert!(
            fk_list.iter().any(|(table, _)| table == "providers"),
            "report_providers should reference providers"
        );
    }
}
