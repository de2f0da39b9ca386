//! Domain ranking
//!
//! Ranks active domains by a chosen metric over a date window. For each
//! surviving domain the service aggregates its processed reports, computes
//! the composite score, and derives a coverage window from the first and
//! last report dates.
//!
//! Domains with no qualifying reports (or fewer than `min_reports`) are
//! excluded entirely rather than emitted with zero metrics. The sort is
//! stable and carries no secondary key; ties keep store order.

use crate::analytics::metrics::{self, BreakdownRequest};
use crate::analytics::scoring::composite_score;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::Domain;
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;

/// Metric a domain ranking is sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DomainSortKey {
    /// Composite score (default)
    #[default]
    Score,
    /// Total requests
    Volume,
    /// Mean success rate
    Success,
    /// Mean overall speed
    Speed,
}

impl DomainSortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainSortKey::Score => "score",
            DomainSortKey::Volume => "volume",
            DomainSortKey::Success => "success",
            DomainSortKey::Speed => "speed",
        }
    }
}

impl std::str::FromStr for DomainSortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "score" => Ok(DomainSortKey::Score),
            "volume" => Ok(DomainSortKey::Volume),
            "success" => Ok(DomainSortKey::Success),
            "speed" => Ok(DomainSortKey::Speed),
            other => Err(Error::Validation(format!(
                "unknown domain sort key: {}",
                other
            ))),
        }
    }
}

/// Parameters for a domain ranking run.
#[derive(Debug, Clone, Default)]
pub struct DomainRankingRequest {
    /// Metric to sort by
    pub sort_by: DomainSortKey,
    /// Inclusive lower bound on report date
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on report date
    pub date_to: Option<NaiveDate>,
    /// Exclude domains with fewer qualifying reports than this
    pub min_reports: Option<i64>,
    /// Access-control allowlist of domain ids; `None` = unrestricted
    pub accessible_domains: Option<Vec<String>>,
}

/// Aggregated metrics plus composite score for one ranked domain.
#[derive(Debug, Clone, Serialize)]
pub struct DomainMetrics {
    pub total_requests: i64,
    pub success_rate: f64,
    pub avg_speed: f64,
    pub score: f64,
    pub unique_providers: i64,
    pub unique_states: i64,
}

/// Date coverage of the reports behind one ranked domain.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageWindow {
    /// Number of qualifying reports
    pub total_reports: i64,
    /// Date of the first qualifying report
    pub period_start: NaiveDate,
    /// Date of the last qualifying report
    pub period_end: NaiveDate,
    /// Inclusive day span between first and last report
    pub days_covered: i64,
}

/// One entry in the ranking output.
#[derive(Debug, Clone, Serialize)]
pub struct RankedDomain {
    /// 1-based position after sorting
    pub rank: i64,
    pub domain: Domain,
    pub metrics: DomainMetrics,
    pub coverage: CoverageWindow,
}

/// Rank active domains by the requested metric.
///
/// Returns the empty list when there are no active domains or none survive
/// filtering.
pub fn rank_domains(db: &Database, request: &DomainRankingRequest) -> Result<Vec<RankedDomain>> {
    let domains = db.list_active_domains(request.accessible_domains.as_deref())?;

    let mut ranked: Vec<RankedDomain> = Vec::new();

    for domain in domains {
        let reports =
            db.list_processed_reports(&domain.id, request.date_from, request.date_to)?;
        if reports.is_empty() {
            continue;
        }
        if let Some(min_reports) = request.min_reports {
            if (reports.len() as i64) < min_reports {
                tracing::debug!(
                    domain = %domain.slug,
                    reports = reports.len(),
                    min_reports,
                    "Excluding domain below report threshold"
                );
                continue;
            }
        }

        let report_ids: Vec<String> = reports.iter().map(|r| r.id.clone()).collect();
        let aggregated = metrics::aggregate(db, &report_ids, &BreakdownRequest::default())?;
        let score = composite_score(
            aggregated.total_requests,
            aggregated.success_rate,
            aggregated.avg_speed,
        );

        // Reports come back ordered by date ascending
        let period_start = reports[0].report_date;
        let period_end = reports[reports.len() - 1].report_date;
        let days_covered = (period_end - period_start).num_days() + 1;

        ranked.push(RankedDomain {
            rank: 0,
            domain,
            metrics: DomainMetrics {
                total_requests: aggregated.total_requests,
                success_rate: aggregated.success_rate,
                avg_speed: aggregated.avg_speed,
                score,
                unique_providers: aggregated.unique_providers,
                unique_states: aggregated.unique_states,
            },
            coverage: CoverageWindow {
                total_reports: aggregated.total_reports,
                period_start,
                period_end,
                days_covered,
            },
        });
    }

    // Stable descending sort; ties keep store order
    let sort_by = request.sort_by;
    ranked.sort_by(|a, b| {
        sort_value(b, sort_by)
            .partial_cmp(&sort_value(a, sort_by))
            .unwrap_or(Ordering::Equal)
    });

    for (i, entry) in ranked.iter_mut().enumerate() {
        entry.rank = (i + 1) as i64;
    }

    tracing::debug!(domains = ranked.len(), sort_by = sort_by.as_str(), "Ranked domains");

    Ok(ranked)
}

fn sort_value(entry: &RankedDomain, key: DomainSortKey) -> f64 {
    match key {
        DomainSortKey::Score => entry.metrics.score,
        DomainSortKey::Volume => entry.metrics.total_requests as f64,
        DomainSortKey::Success => entry.metrics.success_rate,
        DomainSortKey::Speed => entry.metrics.avg_speed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_key_parsing() {
        assert_eq!("score".parse::<DomainSortKey>().unwrap(), DomainSortKey::Score);
        assert_eq!("volume".parse::<DomainSortKey>().unwrap(), DomainSortKey::Volume);
        assert_eq!("success".parse::<DomainSortKey>().unwrap(), DomainSortKey::Success);
        assert_eq!("speed".parse::<DomainSortKey>().unwrap(), DomainSortKey::Speed);

        let err = "requests".parse::<DomainSortKey>().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_empty_database_ranks_nothing() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();

        let ranked = rank_domains(&db, &DomainRankingRequest::default()).unwrap();
        assert!(ranked.is_empty());
    }
}
