//! Snapshot importer
//!
//! Loads report snapshot JSON files into the normalized store. Each file
//! holds one [`ReportPayload`]: a domain block, a report date, precomputed
//! summary totals, free-form speed metrics, and per-provider / per-state
//! breakdown rows.
//!
//! ```text
//! snapshot.json ──► Importer ──► Database
//!                     │            domains / providers / states (upsert by slug)
//!                     │            reports (pending ──► processed | failed)
//!                     └──────────► report_summaries / report_providers / report_states
//! ```
//!
//! The raw JSON is retained verbatim in `reports.payload`; the only field
//! the importer resolves out of the nested structure is
//! `speed_metrics.overall.avg`, which lands in the nullable
//! `reports.avg_speed` column so aggregation never re-parses payloads.
//! Files are deduplicated by a sha256 content hash.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::*;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Result of importing a single snapshot file.
#[derive(Debug)]
pub enum ImportOutcome {
    /// Report ingested and marked processed
    Imported {
        report_id: String,
        domain_slug: String,
    },
    /// A report with the same content hash already exists
    Duplicate,
}

/// Result of importing a set of snapshot files.
#[derive(Debug, Default)]
pub struct ImportSummary {
    /// Number of reports ingested
    pub imported: usize,
    /// Number of files skipped as duplicates
    pub duplicates: usize,
    /// Errors encountered (file path, error message)
    pub errors: Vec<(PathBuf, String)>,
}

/// Import every snapshot matching a glob pattern.
///
/// A file that fails to parse or store is recorded in `errors` and does not
/// stop the remaining files.
pub fn import_glob(db: &Database, pattern: &str) -> Result<ImportSummary> {
    let paths = glob::glob(pattern)
        .map_err(|e| Error::Config(format!("bad snapshot pattern {}: {}", pattern, e)))?;

    let mut summary = ImportSummary::default();

    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                summary.errors.push((e.path().to_path_buf(), e.to_string()));
                continue;
            }
        };

        match import_snapshot(db, &path) {
            Ok(ImportOutcome::Imported { report_id, domain_slug }) => {
                tracing::info!(path = %path.display(), report_id, domain_slug, "Imported snapshot");
                summary.imported += 1;
            }
            Ok(ImportOutcome::Duplicate) => {
                tracing::debug!(path = %path.display(), "Skipping duplicate snapshot");
                summary.duplicates += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to import snapshot");
                summary.errors.push((path, e.to_string()));
            }
        }
    }

    Ok(summary)
}

/// Import one snapshot file.
pub fn import_snapshot(db: &Database, path: &Path) -> Result<ImportOutcome> {
    let raw = std::fs::read(path)?;

    let source_hash = hex::encode(Sha256::digest(&raw));
    if db.report_exists_by_hash(&source_hash)? {
        return Ok(ImportOutcome::Duplicate);
    }

    let payload_value: serde_json::Value = serde_json::from_slice(&raw)?;
    let payload: ReportPayload =
        serde_json::from_value(payload_value.clone()).map_err(|e| Error::Ingest {
            path: path.display().to_string(),
            message: format!("invalid snapshot: {}", e),
        })?;

    let domain = resolve_domain(db, &payload.domain)?;

    let report = Report {
        id: uuid::Uuid::new_v4().to_string(),
        domain_id: domain.id.clone(),
        report_date: payload.report_date,
        status: ReportStatus::Pending,
        avg_speed: payload.overall_avg_speed(),
        source_hash: Some(source_hash),
        ingested_at: Utc::now(),
    };
    db.insert_report(&report, &payload_value)?;

    match store_breakdown(db, &report.id, &payload) {
        Ok(()) => {
            db.set_report_status(&report.id, ReportStatus::Processed)?;
            Ok(ImportOutcome::Imported {
                report_id: report.id,
                domain_slug: domain.slug,
            })
        }
        Err(e) => {
            // Leave the report behind as failed so the hash still dedupes
            db.set_report_status(&report.id, ReportStatus::Failed)?;
            Err(e)
        }
    }
}

/// Write the summary and breakdown rows for a freshly inserted report.
fn store_breakdown(db: &Database, report_id: &str, payload: &ReportPayload) -> Result<()> {
    db.set_report_status(report_id, ReportStatus::Processing)?;

    db.insert_report_summary(&ReportSummary {
        report_id: report_id.to_string(),
        total_requests: payload.summary.total_requests,
        success_rate: payload.summary.success_rate,
        failed_requests: payload.summary.failed_requests,
        // Per-report approximations: the snapshot's own row counts
        unique_providers: payload.providers.len() as i64,
        unique_states: payload.states.len() as i64,
    })?;

    let mut provider_rows = Vec::with_capacity(payload.providers.len());
    for entry in &payload.providers {
        let provider = resolve_provider(db, entry)?;
        provider_rows.push(ReportProviderRow {
            report_id: report_id.to_string(),
            provider_id: provider.id,
            technology: entry.technology.clone(),
            total_count: entry.total_count,
            success_rate: entry.success_rate,
            avg_speed: entry.avg_speed,
            rank_position: entry.rank_position,
        });
    }
    db.insert_report_providers(&provider_rows)?;

    let mut state_rows = Vec::with_capacity(payload.states.len());
    for entry in &payload.states {
        let state = resolve_state(db, entry)?;
        state_rows.push(ReportStateRow {
            report_id: report_id.to_string(),
            state_id: state.id,
            request_count: entry.request_count,
            success_rate: entry.success_rate,
            avg_speed: entry.avg_speed,
        });
    }
    db.insert_report_states(&state_rows)?;

    Ok(())
}

/// Look up a domain by slug, creating it on first sight.
fn resolve_domain(db: &Database, block: &PayloadDomain) -> Result<Domain> {
    if let Some(existing) = db.get_domain_by_slug(&block.slug)? {
        return Ok(existing);
    }

    let domain = Domain {
        id: uuid::Uuid::new_v4().to_string(),
        name: block.name.clone(),
        slug: block.slug.clone(),
        is_active: true,
        created_at: Utc::now(),
        metadata: serde_json::json!({}),
    };
    db.upsert_domain(&domain)?;
    Ok(domain)
}

/// Look up a provider by slug, creating it on first sight and folding in
/// newly seen technology tags.
fn resolve_provider(db: &Database, entry: &PayloadProvider) -> Result<Provider> {
    if let Some(mut existing) = db.get_provider_by_slug(&entry.slug)? {
        if !entry.technology.is_empty()
            && !existing.technologies.contains(&entry.technology)
        {
            existing.technologies.push(entry.technology.clone());
            existing.technologies.sort();
            db.upsert_provider(&existing)?;
        }
        return Ok(existing);
    }

    let mut technologies = Vec::new();
    if !entry.technology.is_empty() {
        technologies.push(entry.technology.clone());
    }
    let provider = Provider {
        id: uuid::Uuid::new_v4().to_string(),
        name: entry.name.clone(),
        slug: entry.slug.clone(),
        is_active: true,
        technologies,
        created_at: Utc::now(),
    };
    db.upsert_provider(&provider)?;
    Ok(provider)
}

/// Look up a state by code, creating it on first sight.
fn resolve_state(db: &Database, entry: &PayloadState) -> Result<State> {
    if let Some(existing) = db.get_state_by_code(&entry.code)? {
        return Ok(existing);
    }

    let state = State {
        id: uuid::Uuid::new_v4().to_string(),
        name: entry.name.clone(),
        code: entry.code.clone(),
    };
    db.upsert_state(&state)?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn snapshot_json() -> serde_json::Value {
        json!({
            "domain": {"name": "Example Site", "slug": "example-site"},
            "report_date": "2026-07-01",
            "summary": {"total_requests": 5000, "success_rate": 92.5, "failed_requests": 375},
            "speed_metrics": {"overall": {"avg": 28.4, "p95": 55.0}},
            "providers": [
                {"name": "Comcast", "slug": "comcast", "technology": "cable",
                 "total_count": 3000, "success_rate": 91.0, "avg_speed": 25.0, "rank_position": 1},
                {"name": "Verizon", "slug": "verizon", "technology": "fiber",
                 "total_count": 2000, "success_rate": 94.0, "avg_speed": 32.0}
            ],
            "states": [
                {"name": "California", "code": "CA", "request_count": 3500,
                 "success_rate": 93.0, "avg_speed": 29.0},
                {"name": "Texas", "code": "TX", "request_count": 1500,
                 "success_rate": 91.5, "avg_speed": 27.0}
            ]
        })
    }

    fn write_snapshot(dir: &tempfile::TempDir, name: &str, value: &serde_json::Value) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(value.to_string().as_bytes()).unwrap();
        path
    }

    fn open_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_import_snapshot_end_to_end() {
        let db = open_db();
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(&dir, "report.json", &snapshot_json());

        let outcome = import_snapshot(&db, &path).unwrap();
        let ImportOutcome::Imported { report_id, domain_slug } = outcome else {
            panic!("expected an import");
        };
        assert_eq!(domain_slug, "example-site");

        let report = db.get_report(&report_id).unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Processed);
        assert_eq!(report.avg_speed, Some(28.4));

        let summary = db.get_report_summary(&report_id).unwrap().unwrap();
        assert_eq!(summary.total_requests, 5000);
        assert_eq!(summary.unique_providers, 2);
        assert_eq!(summary.unique_states, 2);

        // Payload retained verbatim
        let payload = db.get_report_payload(&report_id).unwrap().unwrap();
        assert_eq!(payload["speed_metrics"]["overall"]["p95"], json!(55.0));

        // Providers and states normalized by slug/code
        assert!(db.get_provider_by_slug("comcast").unwrap().is_some());
        assert!(db.get_state_by_code("TX").unwrap().is_some());
    }

    #[test]
    fn test_import_deduplicates_by_hash() {
        let db = open_db();
        let dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(&dir, "report.json", &snapshot_json());

        assert!(matches!(
            import_snapshot(&db, &path).unwrap(),
            ImportOutcome::Imported { .. }
        ));
        assert!(matches!(
            import_snapshot(&db, &path).unwrap(),
            ImportOutcome::Duplicate
        ));
    }

    #[test]
    fn test_import_glob_collects_errors() {
        let db = open_db();
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(&dir, "good.json", &snapshot_json());
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, b"{ not json").unwrap();

        let pattern = format!("{}/*.json", dir.path().display());
        let summary = import_glob(&db, &pattern).unwrap();
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].0, bad);
    }

    #[test]
    fn test_import_without_speed_metrics() {
        let db = open_db();
        let dir = tempfile::tempdir().unwrap();
        let mut value = snapshot_json();
        value.as_object_mut().unwrap().remove("speed_metrics");
        let path = write_snapshot(&dir, "no-speed.json", &value);

        let ImportOutcome::Imported { report_id, .. } = import_snapshot(&db, &path).unwrap()
        else {
            panic!("expected an import");
        };
        let report = db.get_report(&report_id).unwrap().unwrap();
        assert_eq!(report.avg_speed, None);
    }

    #[test]
    fn test_reimport_grows_provider_technologies() {
        let db = open_db();
        let dir = tempfile::tempdir().unwrap();

        write_snapshot(&dir, "day1.json", &snapshot_json());
        let mut day2 = snapshot_json();
        day2["report_date"] = json!("2026-07-02");
        day2["providers"][0]["technology"] = json!("fiber");
        write_snapshot(&dir, "day2.json", &day2);

        let pattern = format!("{}/day*.json", dir.path().display());
        let summary = import_glob(&db, &pattern).unwrap();
        assert_eq!(summary.imported, 2);

        let comcast = db.get_provider_by_slug("comcast").unwrap().unwrap();
        assert_eq!(comcast.technologies, vec!["cable", "fiber"]);
    }
}
