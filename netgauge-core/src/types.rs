//! Core domain types for netgauge
//!
//! These types represent the canonical data model that normalizes ingested
//! network-quality reports from client sites.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Domain** | A monitored site/property whose traffic reports are analyzed |
//! | **Provider** | A normalized ISP/connectivity provider identity, shared across all reports that mention it |
//! | **State** | A geographic region identity, shared across all reports |
//! | **Report** | One ingested snapshot for a Domain over a date, with lifecycle status |
//! | **ReportSummary** | Precomputed per-report totals, one per Report |
//! | **Score** | Composite ranking value: volume factor x quality factor x log-dampened speed factor |
//!
//! Only reports with status [`ReportStatus::Processed`] are visible to the
//! analytics services. Reports and their child rows are written once at
//! ingestion and never mutated except for the status field.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Domain
// ============================================

/// A monitored site whose traffic reports are analyzed.
///
/// Domains are created and deactivated by an external management layer;
/// only active domains are ever aggregated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    /// Unique identifier
    pub id: String,
    /// Human-friendly name
    pub name: String,
    /// URL-safe identifier, unique across domains
    pub slug: String,
    /// Inactive domains are invisible to all analytics
    pub is_active: bool,
    /// When this domain was first seen
    pub created_at: DateTime<Utc>,
    /// Extensible metadata
    pub metadata: serde_json::Value,
}

// ============================================
// Provider
// ============================================

/// A normalized ISP/connectivity provider identity.
///
/// Provider identity is shared across all reports referencing it, which is
/// what enables cross-domain and cross-report aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    /// Unique identifier
    pub id: String,
    /// Provider name (e.g., "Comcast")
    pub name: String,
    /// URL-safe identifier, unique across providers
    pub slug: String,
    /// Inactive providers are kept for historical rows
    pub is_active: bool,
    /// Technology tags seen for this provider (e.g., ["fiber", "cable"])
    pub technologies: Vec<String>,
    /// When this provider was first seen
    pub created_at: DateTime<Utc>,
}

// ============================================
// State
// ============================================

/// A geographic region identity, shared across all reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// Unique identifier
    pub id: String,
    /// Region name (e.g., "California")
    pub name: String,
    /// Short code, unique across states (e.g., "CA")
    pub code: String,
}

// ============================================
// Report
// ============================================

/// Lifecycle status of an ingested report.
///
/// Only `Processed` reports participate in analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl ReportStatus {
    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Processing => "processing",
            ReportStatus::Processed => "processed",
            ReportStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReportStatus::Pending),
            "processing" => Ok(ReportStatus::Processing),
            "processed" => Ok(ReportStatus::Processed),
            "failed" => Ok(ReportStatus::Failed),
            _ => Err(format!("unknown report status: {}", s)),
        }
    }
}

/// One ingested snapshot for a domain over a date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Unique identifier
    pub id: String,
    /// Domain this report belongs to
    pub domain_id: String,
    /// The date this snapshot covers
    pub report_date: NaiveDate,
    /// Lifecycle status
    pub status: ReportStatus,
    /// Overall average speed, resolved once at ingestion from the nested
    /// payload (`speed_metrics.overall.avg`). Absent when the payload
    /// carried no speed metrics.
    pub avg_speed: Option<f64>,
    /// Content hash of the ingested snapshot, for dedup
    pub source_hash: Option<String>,
    /// When this report was ingested
    pub ingested_at: DateTime<Utc>,
}

/// Precomputed per-report totals, one-to-one with [`Report`].
///
/// `unique_providers` / `unique_states` are per-report approximations; the
/// analytics layer never sums them across reports, it recounts distinct
/// identities through the join tables instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Report this summary belongs to
    pub report_id: String,
    /// Total requests observed in the snapshot
    pub total_requests: i64,
    /// Success rate in percent (0-100)
    pub success_rate: f64,
    /// Failed request count
    pub failed_requests: i64,
    /// Distinct providers within this one report
    pub unique_providers: i64,
    /// Distinct states within this one report
    pub unique_states: i64,
}

/// Per-report provider breakdown row. Many rows per report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportProviderRow {
    /// Report this row belongs to
    pub report_id: String,
    /// Normalized provider identity
    pub provider_id: String,
    /// Technology label for this row (e.g., "fiber"); may be empty
    pub technology: String,
    /// Requests attributed to this provider/technology in the snapshot
    pub total_count: i64,
    /// Success rate in percent (0-100)
    pub success_rate: f64,
    /// Average speed for this row
    pub avg_speed: f64,
    /// Rank position within the snapshot, when the source supplied one
    pub rank_position: Option<i64>,
}

/// Per-report state breakdown row. Many rows per report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportStateRow {
    /// Report this row belongs to
    pub report_id: String,
    /// Normalized state identity
    pub state_id: String,
    /// Requests attributed to this state in the snapshot
    pub request_count: i64,
    /// Success rate in percent (0-100)
    pub success_rate: f64,
    /// Average speed for this row
    pub avg_speed: f64,
}

// ============================================
// Ingested snapshot payload
// ============================================

/// The snapshot format produced by client sites.
///
/// The raw JSON is retained verbatim in `reports.payload`; this type is the
/// parsed view the importer works with. `speed_metrics` stays free-form
/// because client versions disagree on its inner shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPayload {
    /// Domain the snapshot was captured for
    pub domain: PayloadDomain,
    /// The date the snapshot covers
    pub report_date: NaiveDate,
    /// Precomputed totals
    pub summary: PayloadSummary,
    /// Free-form speed metrics; `overall.avg` is the only field netgauge reads
    #[serde(default)]
    pub speed_metrics: serde_json::Value,
    /// Per-provider breakdown
    #[serde(default)]
    pub providers: Vec<PayloadProvider>,
    /// Per-state breakdown
    #[serde(default)]
    pub states: Vec<PayloadState>,
}

impl ReportPayload {
    /// Extract `speed_metrics.overall.avg` if present.
    pub fn overall_avg_speed(&self) -> Option<f64> {
        self.speed_metrics
            .get("overall")
            .and_then(|o| o.get("avg"))
            .and_then(|v| v.as_f64())
    }
}

/// Domain block of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadDomain {
    pub name: String,
    pub slug: String,
}

/// Summary block of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSummary {
    pub total_requests: i64,
    pub success_rate: f64,
    #[serde(default)]
    pub failed_requests: i64,
}

/// Provider row of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadProvider {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub technology: String,
    pub total_count: i64,
    pub success_rate: f64,
    pub avg_speed: f64,
    #[serde(default)]
    pub rank_position: Option<i64>,
}

/// State row of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadState {
    pub name: String,
    pub code: String,
    pub request_count: i64,
    pub success_rate: f64,
    pub avg_speed: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_status_roundtrip() {
        for status in [
            ReportStatus::Pending,
            ReportStatus::Processing,
            ReportStatus::Processed,
            ReportStatus::Failed,
        ] {
            let parsed: ReportStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("committed".parse::<ReportStatus>().is_err());
    }

    #[test]
    fn test_overall_avg_speed_lookup() {
        let payload: ReportPayload = serde_json::from_value(serde_json::json!({
            "domain": {"name": "Example", "slug": "example"},
            "report_date": "2026-07-01",
            "summary": {"total_requests": 100, "success_rate": 95.0, "failed_requests": 5},
            "speed_metrics": {"overall": {"avg": 23.4, "p95": 41.0}},
        }))
        .unwrap();
        assert_eq!(payload.overall_avg_speed(), Some(23.4));

        let no_speed: ReportPayload = serde_json::from_value(serde_json::json!({
            "domain": {"name": "Example", "slug": "example"},
            "report_date": "2026-07-01",
            "summary": {"total_requests": 100, "success_rate": 95.0},
        }))
        .unwrap();
        assert_eq!(no_speed.overall_avg_speed(), None);
    }
}
