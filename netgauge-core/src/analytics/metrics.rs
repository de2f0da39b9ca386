//! Metrics aggregation
//!
//! Given a set of report identifiers (already filtered to `processed` and
//! date-scoped by the caller), produces aggregate totals/averages and
//! optional breakdowns. This is the shared computation underneath domain
//! ranking and domain comparison.
//!
//! Averaging is deliberately unweighted: `success_rate` is the arithmetic
//! mean of per-report rates, and `avg_speed` the mean of per-report overall
//! speeds, regardless of how many requests each report carried. A
//! volume-weighted version would change results and must not be substituted.

use crate::db::Database;
use crate::error::Result;
use serde::Serialize;

/// Default breakdown size when none is requested.
pub const DEFAULT_TOP_N: usize = 5;

/// Which optional breakdowns to compute alongside the totals.
///
/// Each breakdown is independently requestable; computing none keeps the
/// aggregation to four queries.
#[derive(Debug, Clone)]
pub struct BreakdownRequest {
    /// Top states by summed request count
    pub top_states: bool,
    /// Top providers by summed total count
    pub top_providers: bool,
    /// Request distribution per technology label
    pub technologies: bool,
    /// Breakdown size for the top-N lists
    pub top_n: usize,
}

impl Default for BreakdownRequest {
    fn default() -> Self {
        Self {
            top_states: false,
            top_providers: false,
            technologies: false,
            top_n: DEFAULT_TOP_N,
        }
    }
}

impl BreakdownRequest {
    /// Request every breakdown at the default size.
    pub fn all() -> Self {
        Self {
            top_states: true,
            top_providers: true,
            technologies: true,
            top_n: DEFAULT_TOP_N,
        }
    }
}

/// One state entry in the geographic breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct StateBreakdown {
    /// State identity
    pub state_id: String,
    /// State name
    pub name: String,
    /// State code
    pub code: String,
    /// Summed request count over the report set
    pub request_count: i64,
    /// Unweighted mean success rate over the contributing rows
    pub success_rate: f64,
    /// Unweighted mean speed over the contributing rows
    pub avg_speed: f64,
}

/// One provider entry in the provider breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderBreakdown {
    /// Provider identity
    pub provider_id: String,
    /// Provider name
    pub name: String,
    /// Provider slug
    pub slug: String,
    /// Summed request count over the report set
    pub total_count: i64,
    /// Unweighted mean success rate over the contributing rows
    pub success_rate: f64,
    /// Unweighted mean speed over the contributing rows
    pub avg_speed: f64,
}

/// One technology's share of the request volume.
#[derive(Debug, Clone, Serialize)]
pub struct TechnologyShare {
    /// Technology label; "Unknown" when the rows carried none
    pub technology: String,
    /// Summed request count for this label
    pub total_requests: i64,
    /// Share of the grand total, in percent
    pub percentage: f64,
}

/// Aggregate metrics over a report set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedMetrics {
    /// Sum of per-report summary totals
    pub total_requests: i64,
    /// Unweighted mean of per-report success rates
    pub success_rate: f64,
    /// Sum of per-report failed requests
    pub total_failed: i64,
    /// Number of reports in the set
    pub total_reports: i64,
    /// Mean of the per-report overall speeds; 0.0 when no report carried one
    pub avg_speed: f64,
    /// Distinct provider identities across the set
    pub unique_providers: i64,
    /// Distinct state identities across the set
    pub unique_states: i64,
    /// Top states, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_states: Option<Vec<StateBreakdown>>,
    /// Top providers, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_providers: Option<Vec<ProviderBreakdown>>,
    /// Technology distribution, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub technologies: Option<Vec<TechnologyShare>>,
}

/// Aggregate metrics over a set of report ids.
///
/// The caller guarantees the ids reference `processed` reports within its
/// date window; an empty set produces all-zero metrics.
pub fn aggregate(
    db: &Database,
    report_ids: &[String],
    breakdowns: &BreakdownRequest,
) -> Result<AggregatedMetrics> {
    let totals = db.summary_totals(report_ids)?;
    let avg_speed = db.report_speed_average(report_ids)?;
    let unique_providers = db.distinct_provider_count(report_ids)?;
    let unique_states = db.distinct_state_count(report_ids)?;

    let top_states = if breakdowns.top_states {
        Some(db.top_states(report_ids, breakdowns.top_n)?)
    } else {
        None
    };

    let top_providers = if breakdowns.top_providers {
        Some(db.top_providers(report_ids, breakdowns.top_n)?)
    } else {
        None
    };

    let technologies = if breakdowns.technologies {
        Some(technology_distribution(db.technology_totals(report_ids)?))
    } else {
        None
    };

    Ok(AggregatedMetrics {
        total_requests: totals.total_requests,
        success_rate: totals.success_rate,
        total_failed: totals.total_failed,
        total_reports: report_ids.len() as i64,
        avg_speed,
        unique_providers,
        unique_states,
        top_states,
        top_providers,
        technologies,
    })
}

/// Turn per-label totals into shares of the grand total.
fn technology_distribution(totals: Vec<(String, i64)>) -> Vec<TechnologyShare> {
    let grand_total: i64 = totals.iter().map(|(_, count)| count).sum();

    totals
        .into_iter()
        .map(|(technology, total_requests)| {
            let percentage = if grand_total > 0 {
                total_requests as f64 / grand_total as f64 * 100.0
            } else {
                0.0
            };
            TechnologyShare {
                technology,
                total_requests,
                percentage,
            }
        })
        .collect()
}
