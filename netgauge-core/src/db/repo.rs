//! Database repository layer
//!
//! Provides the collaborator contract the analytics services are built on
//! (read-only queries over domains, reports, and their breakdown rows) plus
//! the write path used by snapshot ingestion and tests.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Mutex;

/// One raw provider-usage row: a `report_providers` row joined with its
/// report, domain, and provider, restricted to processed reports and active
/// domains.
///
/// The provider ranking service groups these in memory so that rate/speed
/// averaging stays unweighted across constituent report-level rows.
#[derive(Debug, Clone)]
pub struct ProviderUsageRow {
    /// Domain identity
    pub domain_id: String,
    /// Domain display name
    pub domain_name: String,
    /// Domain slug
    pub domain_slug: String,
    /// Provider identity
    pub provider_id: String,
    /// Provider display name
    pub provider_name: String,
    /// Provider slug
    pub provider_slug: String,
    /// Technology label; empty when the snapshot carried none
    pub technology: String,
    /// Requests for this row
    pub total_count: i64,
    /// Success rate in percent
    pub success_rate: f64,
    /// Average speed for this row
    pub avg_speed: f64,
    /// Contributing report
    pub report_id: String,
    /// Date of the contributing report
    pub report_date: NaiveDate,
}

/// Composable predicates for provider-usage queries.
///
/// All fields are optional; `None` means unrestricted. `domain_ids` carries
/// the externally-owned access-control allowlist as a plain value.
#[derive(Debug, Clone, Default)]
pub struct ProviderUsageFilter {
    /// Restrict to one provider
    pub provider_id: Option<String>,
    /// Restrict to one technology label
    pub technology: Option<String>,
    /// Inclusive lower bound on report date
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on report date
    pub date_to: Option<NaiveDate>,
    /// Restrict to a domain-id set (access-control allowlist)
    pub domain_ids: Option<Vec<String>>,
}

/// Aggregate totals over a set of report summaries.
#[derive(Debug, Clone, Default)]
pub struct SummaryTotals {
    /// Sum of per-report total_requests
    pub total_requests: i64,
    /// Sum of per-report failed_requests
    pub total_failed: i64,
    /// Unweighted mean of per-report success rates
    pub success_rate: f64,
}

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode for better concurrency
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Build a `?,?,...` placeholder list for an IN clause.
    fn placeholders(n: usize) -> String {
        let mut s = String::with_capacity(n * 2);
        for i in 0..n {
            if i > 0 {
                s.push(',');
            }
            s.push('?');
        }
        s
    }

    // ============================================
    // Domain operations
    // ============================================

    /// Insert or update a domain
    pub fn upsert_domain(&self, domain: &Domain) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO domains (id, name, slug, is_active, created_at, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                is_active = excluded.is_active,
                metadata = excluded.metadata
            "#,
            params![
                domain.id,
                domain.name,
                domain.slug,
                domain.is_active as i64,
                domain.created_at.to_rfc3339(),
                domain.metadata.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Get a domain by ID
    pub fn get_domain(&self, id: &str) -> Result<Option<Domain>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM domains WHERE id = ?", [id], |row| {
            Self::row_to_domain(row)
        })
        .optional()
        .map_err(Error::from)
    }

    /// Get a domain by ID, failing when it does not exist
    pub fn require_domain(&self, id: &str) -> Result<Domain> {
        self.get_domain(id)?
            .ok_or_else(|| Error::DomainNotFound(id.to_string()))
    }

    /// Get a domain by slug
    pub fn get_domain_by_slug(&self, slug: &str) -> Result<Option<Domain>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM domains WHERE slug = ?",
            [slug],
            Self::row_to_domain,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List active domains, optionally restricted to an id allowlist.
    ///
    /// A `None` allowlist means unrestricted; an empty allowlist matches
    /// nothing.
    pub fn list_active_domains(&self, allowlist: Option<&[String]>) -> Result<Vec<Domain>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from("SELECT * FROM domains WHERE is_active = 1");
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(ids) = allowlist {
            if ids.is_empty() {
                // An empty allowlist matches nothing
                sql.push_str(" AND 1 = 0");
            } else {
                sql.push_str(&format!(" AND id IN ({})", Self::placeholders(ids.len())));
                for id in ids {
                    bound.push(Box::new(id.clone()));
                }
            }
        }

        sql.push_str(" ORDER BY name");

        let params_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let domains = stmt
            .query_map(params_refs.as_slice(), Self::row_to_domain)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(domains)
    }

    fn row_to_domain(row: &Row) -> rusqlite::Result<Domain> {
        let created_at_str: String = row.get("created_at")?;
        let metadata_str: Option<String> = row.get("metadata")?;

        Ok(Domain {
            id: row.get("id")?,
            name: row.get("name")?,
            slug: row.get("slug")?,
            is_active: row.get::<_, i64>("is_active")? != 0,
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            metadata: metadata_str
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::json!({})),
        })
    }

    // ============================================
    // Provider operations
    // ============================================

    /// Insert or update a provider
    pub fn upsert_provider(&self, provider: &Provider) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO providers (id, name, slug, is_active, technologies, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                is_active = excluded.is_active,
                technologies = excluded.technologies
            "#,
            params![
                provider.id,
                provider.name,
                provider.slug,
                provider.is_active as i64,
                serde_json::to_string(&provider.technologies)?,
                provider.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a provider by ID
    pub fn get_provider(&self, id: &str) -> Result<Option<Provider>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM providers WHERE id = ?",
            [id],
            Self::row_to_provider,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Get a provider by slug
    pub fn get_provider_by_slug(&self, slug: &str) -> Result<Option<Provider>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM providers WHERE slug = ?",
            [slug],
            Self::row_to_provider,
        )
        .optional()
        .map_err(Error::from)
    }

    fn row_to_provider(row: &Row) -> rusqlite::Result<Provider> {
        let created_at_str: String = row.get("created_at")?;
        let technologies_str: Option<String> = row.get("technologies")?;

        Ok(Provider {
            id: row.get("id")?,
            name: row.get("name")?,
            slug: row.get("slug")?,
            is_active: row.get::<_, i64>("is_active")? != 0,
            technologies: technologies_str
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            created_at: DateTime::parse_from_rfc3339(&created_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    // ============================================
    // State operations
    // ============================================

    /// Insert or update a state
    pub fn upsert_state(&self, state: &State) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO states (id, name, code)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name
            "#,
            params![state.id, state.name, state.code],
        )?;
        Ok(())
    }

    /// Get a state by code
    pub fn get_state_by_code(&self, code: &str) -> Result<Option<State>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM states WHERE code = ?",
            [code],
            Self::row_to_state,
        )
        .optional()
        .map_err(Error::from)
    }

    fn row_to_state(row: &Row) -> rusqlite::Result<State> {
        Ok(State {
            id: row.get("id")?,
            name: row.get("name")?,
            code: row.get("code")?,
        })
    }

    // ============================================
    // Report operations
    // ============================================

    /// Insert a report together with its raw payload
    pub fn insert_report(&self, report: &Report, payload: &serde_json::Value) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO reports (id, domain_id, report_date, status, avg_speed,
                                 source_hash, ingested_at, payload)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                report.id,
                report.domain_id,
                report.report_date.format("%Y-%m-%d").to_string(),
                report.status.as_str(),
                report.avg_speed,
                report.source_hash,
                report.ingested_at.to_rfc3339(),
                payload.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Update a report's lifecycle status
    pub fn set_report_status(&self, report_id: &str, status: ReportStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE reports SET status = ?1 WHERE id = ?2",
            params![status.as_str(), report_id],
        )?;
        if updated == 0 {
            return Err(Error::ReportNotFound(report_id.to_string()));
        }
        Ok(())
    }

    /// Get a report by ID
    pub fn get_report(&self, id: &str) -> Result<Option<Report>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM reports WHERE id = ?", [id], |row| {
            Self::row_to_report(row)
        })
        .optional()
        .map_err(Error::from)
    }

    /// Check whether a snapshot with this content hash was already ingested
    pub fn report_exists_by_hash(&self, source_hash: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM reports WHERE source_hash = ?",
            [source_hash],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Get a report's retained raw payload
    pub fn get_report_payload(&self, report_id: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock().unwrap();
        let payload_str: Option<String> = conn
            .query_row(
                "SELECT payload FROM reports WHERE id = ?",
                [report_id],
                |r| r.get(0),
            )
            .optional()?;
        match payload_str {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    /// List `processed` reports for a domain within an inclusive date
    /// window, ordered by report date ascending.
    pub fn list_processed_reports(
        &self,
        domain_id: &str,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> Result<Vec<Report>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from(
            "SELECT * FROM reports WHERE domain_id = ? AND status = 'processed'",
        );
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(domain_id.to_string())];

        if let Some(from) = date_from {
            sql.push_str(" AND report_date >= ?");
            bound.push(Box::new(from.format("%Y-%m-%d").to_string()));
        }

        if let Some(to) = date_to {
            sql.push_str(" AND report_date <= ?");
            bound.push(Box::new(to.format("%Y-%m-%d").to_string()));
        }

        sql.push_str(" ORDER BY report_date ASC");

        let params_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let reports = stmt
            .query_map(params_refs.as_slice(), Self::row_to_report)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(reports)
    }

    fn row_to_report(row: &Row) -> rusqlite::Result<Report> {
        let date_str: String = row.get("report_date")?;
        let status_str: String = row.get("status")?;
        let ingested_at_str: String = row.get("ingested_at")?;

        Ok(Report {
            id: row.get("id")?,
            domain_id: row.get("domain_id")?,
            report_date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                .unwrap_or_else(|_| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()),
            status: status_str.parse().unwrap_or(ReportStatus::Failed),
            avg_speed: row.get("avg_speed")?,
            source_hash: row.get("source_hash")?,
            ingested_at: DateTime::parse_from_rfc3339(&ingested_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    // ============================================
    // Summary operations
    // ============================================

    /// Insert a report summary
    pub fn insert_report_summary(&self, summary: &ReportSummary) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO report_summaries (report_id, total_requests, success_rate,
                                          failed_requests, unique_providers, unique_states)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                summary.report_id,
                summary.total_requests,
                summary.success_rate,
                summary.failed_requests,
                summary.unique_providers,
                summary.unique_states,
            ],
        )?;
        Ok(())
    }

    /// Get the summary row for a report
    pub fn get_report_summary(&self, report_id: &str) -> Result<Option<ReportSummary>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM report_summaries WHERE report_id = ?",
            [report_id],
            |row| {
                Ok(ReportSummary {
                    report_id: row.get("report_id")?,
                    total_requests: row.get("total_requests")?,
                    success_rate: row.get("success_rate")?,
                    failed_requests: row.get("failed_requests")?,
                    unique_providers: row.get("unique_providers")?,
                    unique_states: row.get("unique_states")?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    /// Aggregate totals over the summaries of a report set.
    ///
    /// `success_rate` is the unweighted arithmetic mean of per-report rates;
    /// it is never weighted by request volume.
    pub fn summary_totals(&self, report_ids: &[String]) -> Result<SummaryTotals> {
        if report_ids.is_empty() {
            return Ok(SummaryTotals::default());
        }

        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"
            SELECT
                COALESCE(SUM(total_requests), 0),
                COALESCE(SUM(failed_requests), 0),
                AVG(success_rate)
            FROM report_summaries
            WHERE report_id IN ({})
            "#,
            Self::placeholders(report_ids.len())
        );

        let (total_requests, total_failed, success_rate): (i64, i64, Option<f64>) = conn
            .query_row(&sql, rusqlite::params_from_iter(report_ids), |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })?;

        Ok(SummaryTotals {
            total_requests,
            total_failed,
            success_rate: success_rate.unwrap_or(0.0),
        })
    }

    /// Mean of the ingestion-resolved overall speeds over a report set.
    ///
    /// Reports without speed metrics are skipped; returns 0.0 when no report
    /// in the set carries one.
    pub fn report_speed_average(&self, report_ids: &[String]) -> Result<f64> {
        if report_ids.is_empty() {
            return Ok(0.0);
        }

        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT AVG(avg_speed) FROM reports WHERE id IN ({}) AND avg_speed IS NOT NULL",
            Self::placeholders(report_ids.len())
        );

        let avg: Option<f64> =
            conn.query_row(&sql, rusqlite::params_from_iter(report_ids), |r| r.get(0))?;

        Ok(avg.unwrap_or(0.0))
    }

    // ============================================
    // Breakdown-row operations
    // ============================================

    /// Insert provider breakdown rows for a report
    pub fn insert_report_providers(&self, rows: &[ReportProviderRow]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO report_providers (report_id, provider_id, technology,
                                              total_count, success_rate, avg_speed, rank_position)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for row in rows {
                stmt.execute(params![
                    row.report_id,
                    row.provider_id,
                    row.technology,
                    row.total_count,
                    row.success_rate,
                    row.avg_speed,
                    row.rank_position,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert state breakdown rows for a report
    pub fn insert_report_states(&self, rows: &[ReportStateRow]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO report_states (report_id, state_id, request_count,
                                           success_rate, avg_speed)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for row in rows {
                stmt.execute(params![
                    row.report_id,
                    row.state_id,
                    row.request_count,
                    row.success_rate,
                    row.avg_speed,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Count distinct provider identities across a report set.
    ///
    /// Computed by direct join-distinct-count, not by summing the per-report
    /// summary approximations.
    pub fn distinct_provider_count(&self, report_ids: &[String]) -> Result<i64> {
        if report_ids.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT COUNT(DISTINCT provider_id) FROM report_providers WHERE report_id IN ({})",
            Self::placeholders(report_ids.len())
        );
        let count: i64 =
            conn.query_row(&sql, rusqlite::params_from_iter(report_ids), |r| r.get(0))?;
        Ok(count)
    }

    /// Count distinct state identities across a report set.
    pub fn distinct_state_count(&self, report_ids: &[String]) -> Result<i64> {
        if report_ids.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT COUNT(DISTINCT state_id) FROM report_states WHERE report_id IN ({})",
            Self::placeholders(report_ids.len())
        );
        let count: i64 =
            conn.query_row(&sql, rusqlite::params_from_iter(report_ids), |r| r.get(0))?;
        Ok(count)
    }

    /// Top states by summed request count over a report set.
    ///
    /// No secondary sort key; ties keep whatever order SQLite produces.
    pub fn top_states(
        &self,
        report_ids: &[String],
        limit: usize,
    ) -> Result<Vec<crate::analytics::StateBreakdown>> {
        if report_ids.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"
            SELECT
                s.id,
                s.name,
                s.code,
                SUM(rs.request_count) as requests,
                AVG(rs.success_rate) as success_rate,
                AVG(rs.avg_speed) as avg_speed
            FROM report_states rs
            JOIN states s ON s.id = rs.state_id
            WHERE rs.report_id IN ({})
            GROUP BY s.id
            ORDER BY requests DESC
            LIMIT {}
            "#,
            Self::placeholders(report_ids.len()),
            limit
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(report_ids), |row| {
                Ok(crate::analytics::StateBreakdown {
                    state_id: row.get(0)?,
                    name: row.get(1)?,
                    code: row.get(2)?,
                    request_count: row.get(3)?,
                    success_rate: row.get(4)?,
                    avg_speed: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Top providers by summed total count over a report set.
    pub fn top_providers(
        &self,
        report_ids: &[String],
        limit: usize,
    ) -> Result<Vec<crate::analytics::ProviderBreakdown>> {
        if report_ids.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"
            SELECT
                p.id,
                p.name,
                p.slug,
                SUM(rp.total_count) as requests,
                AVG(rp.success_rate) as success_rate,
                AVG(rp.avg_speed) as avg_speed
            FROM report_providers rp
            JOIN providers p ON p.id = rp.provider_id
            WHERE rp.report_id IN ({})
            GROUP BY p.id
            ORDER BY requests DESC
            LIMIT {}
            "#,
            Self::placeholders(report_ids.len()),
            limit
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(report_ids), |row| {
                Ok(crate::analytics::ProviderBreakdown {
                    provider_id: row.get(0)?,
                    name: row.get(1)?,
                    slug: row.get(2)?,
                    total_count: row.get(3)?,
                    success_rate: row.get(4)?,
                    avg_speed: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Summed request counts per technology label over a report set.
    ///
    /// Missing and empty labels are reported as "Unknown". Percentages of
    /// the grand total are computed by the caller.
    pub fn technology_totals(&self, report_ids: &[String]) -> Result<Vec<(String, i64)>> {
        if report_ids.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"
            SELECT
                COALESCE(NULLIF(technology, ''), 'Unknown') as label,
                SUM(total_count) as requests
            FROM report_providers
            WHERE report_id IN ({})
            GROUP BY label
            ORDER BY requests DESC
            "#,
            Self::placeholders(report_ids.len())
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(report_ids), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    // ============================================
    // Provider-usage queries (provider ranking)
    // ============================================

    fn usage_where_clause(
        filter: &ProviderUsageFilter,
        include_provider: bool,
        sql: &mut String,
        bound: &mut Vec<Box<dyn rusqlite::ToSql>>,
    ) {
        if include_provider {
            if let Some(provider_id) = &filter.provider_id {
                sql.push_str(" AND rp.provider_id = ?");
                bound.push(Box::new(provider_id.clone()));
            }
        }

        if let Some(technology) = &filter.technology {
            sql.push_str(" AND rp.technology = ?");
            bound.push(Box::new(technology.clone()));
        }

        if let Some(from) = filter.date_from {
            sql.push_str(" AND r.report_date >= ?");
            bound.push(Box::new(from.format("%Y-%m-%d").to_string()));
        }

        if let Some(to) = filter.date_to {
            sql.push_str(" AND r.report_date <= ?");
            bound.push(Box::new(to.format("%Y-%m-%d").to_string()));
        }

        if let Some(ids) = &filter.domain_ids {
            if ids.is_empty() {
                sql.push_str(" AND 1 = 0");
            } else {
                sql.push_str(&format!(" AND d.id IN ({})", Self::placeholders(ids.len())));
                for id in ids {
                    bound.push(Box::new(id.clone()));
                }
            }
        }
    }

    /// List raw provider-usage rows matching a filter.
    ///
    /// Always restricted to processed reports and active domains. Row order
    /// is whatever the store produces; callers must not rely on it beyond
    /// tie-breaking.
    pub fn list_provider_usage(
        &self,
        filter: &ProviderUsageFilter,
    ) -> Result<Vec<ProviderUsageRow>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from(
            r#"
            SELECT
                d.id, d.name, d.slug,
                p.id, p.name, p.slug,
                rp.technology, rp.total_count, rp.success_rate, rp.avg_speed,
                r.id, r.report_date
            FROM report_providers rp
            JOIN reports r ON r.id = rp.report_id
            JOIN domains d ON d.id = r.domain_id
            JOIN providers p ON p.id = rp.provider_id
            WHERE r.status = 'processed' AND d.is_active = 1
            "#,
        );
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = vec![];
        Self::usage_where_clause(filter, true, &mut sql, &mut bound);

        let params_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_refs.as_slice(), |row| {
                let date_str: String = row.get(11)?;
                Ok(ProviderUsageRow {
                    domain_id: row.get(0)?,
                    domain_name: row.get(1)?,
                    domain_slug: row.get(2)?,
                    provider_id: row.get(3)?,
                    provider_name: row.get(4)?,
                    provider_slug: row.get(5)?,
                    technology: row.get(6)?,
                    total_count: row.get(7)?,
                    success_rate: row.get(8)?,
                    avg_speed: row.get(9)?,
                    report_id: row.get(10)?,
                    report_date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                        .unwrap_or_else(|_| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Summed request counts per domain under a filter, across all
    /// providers.
    ///
    /// The provider predicate is deliberately not applied: this is the
    /// denominator for percentage-of-domain enrichment.
    pub fn domain_request_totals(
        &self,
        filter: &ProviderUsageFilter,
    ) -> Result<Vec<(String, i64)>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from(
            r#"
            SELECT d.id, COALESCE(SUM(rp.total_count), 0) as requests
            FROM report_providers rp
            JOIN reports r ON r.id = rp.report_id
            JOIN domains d ON d.id = r.domain_id
            WHERE r.status = 'processed' AND d.is_active = 1
            "#,
        );
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = vec![];
        Self::usage_where_clause(filter, false, &mut sql, &mut bound);
        sql.push_str(" GROUP BY d.id");

        let params_refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_refs.as_slice(), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_domain(id: &str, name: &str) -> Domain {
        Domain {
            id: id.to_string(),
            name: name.to_string(),
            slug: name.to_lowercase().replace(' ', "-"),
            is_active: true,
            created_at: Utc::now(),
            metadata: json!({}),
        }
    }

    fn test_provider(id: &str, name: &str) -> Provider {
        Provider {
            id: id.to_string(),
            name: name.to_string(),
            slug: name.to_lowercase().replace(' ', "-"),
            is_active: true,
            technologies: vec!["fiber".to_string()],
            created_at: Utc::now(),
        }
    }

    fn test_report(id: &str, domain_id: &str, date: &str) -> Report {
        Report {
            id: id.to_string(),
            domain_id: domain_id.to_string(),
            report_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            status: ReportStatus::Processed,
            avg_speed: Some(20.0),
            source_hash: None,
            ingested_at: Utc::now(),
        }
    }

    fn open_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_domain_crud() {
        let db = open_db();

        let domain = test_domain("d1", "Example Site");
        db.upsert_domain(&domain).unwrap();

        let retrieved = db.get_domain("d1").unwrap().unwrap();
        assert_eq!(retrieved.name, "Example Site");
        assert_eq!(retrieved.slug, "example-site");
        assert!(retrieved.is_active);

        let by_slug = db.get_domain_by_slug("example-site").unwrap().unwrap();
        assert_eq!(by_slug.id, "d1");
    }

    #[test]
    fn test_list_active_domains_respects_allowlist() {
        let db = open_db();

        db.upsert_domain(&test_domain("d1", "Alpha")).unwrap();
        db.upsert_domain(&test_domain("d2", "Beta")).unwrap();
        let mut inactive = test_domain("d3", "Gamma");
        inactive.is_active = false;
        db.upsert_domain(&inactive).unwrap();

        let all = db.list_active_domains(None).unwrap();
        assert_eq!(all.len(), 2);

        let restricted = db
            .list_active_domains(Some(&["d2".to_string()]))
            .unwrap();
        assert_eq!(restricted.len(), 1);
        assert_eq!(restricted[0].id, "d2");

        let empty = db.list_active_domains(Some(&[])).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_report_lifecycle_and_window() {
        let db = open_db();

        db.upsert_domain(&test_domain("d1", "Alpha")).unwrap();

        let mut pending = test_report("r1", "d1", "2026-07-01");
        pending.status = ReportStatus::Pending;
        db.insert_report(&pending, &json!({"summary": {}})).unwrap();
        db.insert_report(&test_report("r2", "d1", "2026-07-02"), &json!({}))
            .unwrap();
        db.insert_report(&test_report("r3", "d1", "2026-07-10"), &json!({}))
            .unwrap();

        // Pending report invisible
        let reports = db.list_processed_reports("d1", None, None).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].id, "r2");

        // Promote and recheck
        db.set_report_status("r1", ReportStatus::Processed).unwrap();
        let reports = db.list_processed_reports("d1", None, None).unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].id, "r1");

        // Window is inclusive on both ends
        let windowed = db
            .list_processed_reports(
                "d1",
                Some(NaiveDate::from_ymd_opt(2026, 7, 2).unwrap()),
                Some(NaiveDate::from_ymd_opt(2026, 7, 10).unwrap()),
            )
            .unwrap();
        assert_eq!(windowed.len(), 2);

        assert!(matches!(
            db.set_report_status("missing", ReportStatus::Failed),
            Err(Error::ReportNotFound(_))
        ));
    }

    #[test]
    fn test_summary_totals_unweighted_mean() {
        let db = open_db();

        db.upsert_domain(&test_domain("d1", "Alpha")).unwrap();
        db.insert_report(&test_report("r1", "d1", "2026-07-01"), &json!({}))
            .unwrap();
        db.insert_report(&test_report("r2", "d1", "2026-07-02"), &json!({}))
            .unwrap();

        db.insert_report_summary(&ReportSummary {
            report_id: "r1".to_string(),
            total_requests: 10,
            success_rate: 50.0,
            failed_requests: 5,
            unique_providers: 1,
            unique_states: 1,
        })
        .unwrap();
        db.insert_report_summary(&ReportSummary {
            report_id: "r2".to_string(),
            total_requests: 10_000,
            success_rate: 90.0,
            failed_requests: 1_000,
            unique_providers: 3,
            unique_states: 2,
        })
        .unwrap();

        let totals = db
            .summary_totals(&["r1".to_string(), "r2".to_string()])
            .unwrap();
        assert_eq!(totals.total_requests, 10_010);
        assert_eq!(totals.total_failed, 1_005);
        // Unweighted mean of 50 and 90, not the volume-weighted value
        assert!((totals.success_rate - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_speed_average_skips_missing() {
        let db = open_db();

        db.upsert_domain(&test_domain("d1", "Alpha")).unwrap();
        let mut with_speed = test_report("r1", "d1", "2026-07-01");
        with_speed.avg_speed = Some(30.0);
        let mut without_speed = test_report("r2", "d1", "2026-07-02");
        without_speed.avg_speed = None;
        db.insert_report(&with_speed, &json!({})).unwrap();
        db.insert_report(&without_speed, &json!({})).unwrap();

        let ids = vec!["r1".to_string(), "r2".to_string()];
        let avg = db.report_speed_average(&ids).unwrap();
        assert!((avg - 30.0).abs() < 1e-9);

        let none = db.report_speed_average(&["r2".to_string()]).unwrap();
        assert_eq!(none, 0.0);
    }

    #[test]
    fn test_distinct_counts_dedupe_across_reports() {
        let db = open_db();

        db.upsert_domain(&test_domain("d1", "Alpha")).unwrap();
        db.upsert_provider(&test_provider("p1", "Comcast")).unwrap();
        db.upsert_provider(&test_provider("p2", "Verizon")).unwrap();
        db.insert_report(&test_report("r1", "d1", "2026-07-01"), &json!({}))
            .unwrap();
        db.insert_report(&test_report("r2", "d1", "2026-07-02"), &json!({}))
            .unwrap();

        let row = |report_id: &str, provider_id: &str| ReportProviderRow {
            report_id: report_id.to_string(),
            provider_id: provider_id.to_string(),
            technology: "fiber".to_string(),
            total_count: 100,
            success_rate: 90.0,
            avg_speed: 25.0,
            rank_position: None,
        };

        // p1 appears in both reports; the distinct count must not double it
        db.insert_report_providers(&[row("r1", "p1"), row("r1", "p2"), row("r2", "p1")])
            .unwrap();

        let ids = vec!["r1".to_string(), "r2".to_string()];
        assert_eq!(db.distinct_provider_count(&ids).unwrap(), 2);
    }

    #[test]
    fn test_technology_totals_unknown_label() {
        let db = open_db();

        db.upsert_domain(&test_domain("d1", "Alpha")).unwrap();
        db.upsert_provider(&test_provider("p1", "Comcast")).unwrap();
        db.insert_report(&test_report("r1", "d1", "2026-07-01"), &json!({}))
            .unwrap();

        db.insert_report_providers(&[
            ReportProviderRow {
                report_id: "r1".to_string(),
                provider_id: "p1".to_string(),
                technology: "fiber".to_string(),
                total_count: 300,
                success_rate: 90.0,
                avg_speed: 25.0,
                rank_position: None,
            },
            ReportProviderRow {
                report_id: "r1".to_string(),
                provider_id: "p1".to_string(),
                technology: "".to_string(),
                total_count: 100,
                success_rate: 80.0,
                avg_speed: 15.0,
                rank_position: None,
            },
        ])
        .unwrap();

        let totals = db.technology_totals(&["r1".to_string()]).unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0], ("fiber".to_string(), 300));
        assert_eq!(totals[1], ("Unknown".to_string(), 100));
    }
}
