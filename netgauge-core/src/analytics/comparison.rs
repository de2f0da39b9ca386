//! Domain comparison
//!
//! Compares N domains' aggregated metrics against a baseline domain, plus a
//! cross-domain provider-overlap analysis (common/unique providers).
//!
//! The baseline is the first domain in caller-given order that produces any
//! data; it carries no diff block. Domains with zero qualifying reports are
//! skipped entirely rather than emitted as placeholders, and an empty input
//! list is an empty result, not an error.

use crate::analytics::metrics::{self, AggregatedMetrics, BreakdownRequest};
use crate::db::{Database, ProviderUsageFilter};
use crate::error::{Error, Result};
use crate::types::Domain;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

/// Which optional breakdowns the comparison computes per domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComparisonFocus {
    /// All breakdowns (default, maps to an absent `metric` parameter)
    #[default]
    All,
    /// Top states only
    Geographic,
    /// Top providers only
    Providers,
    /// Technology distribution only
    Technologies,
}

impl ComparisonFocus {
    fn breakdowns(&self) -> BreakdownRequest {
        match self {
            ComparisonFocus::All => BreakdownRequest::all(),
            ComparisonFocus::Geographic => BreakdownRequest {
                top_states: true,
                ..Default::default()
            },
            ComparisonFocus::Providers => BreakdownRequest {
                top_providers: true,
                ..Default::default()
            },
            ComparisonFocus::Technologies => BreakdownRequest {
                technologies: true,
                ..Default::default()
            },
        }
    }
}

impl std::str::FromStr for ComparisonFocus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "geographic" => Ok(ComparisonFocus::Geographic),
            "providers" => Ok(ComparisonFocus::Providers),
            "technologies" => Ok(ComparisonFocus::Technologies),
            other => Err(Error::Validation(format!(
                "unknown comparison metric: {}",
                other
            ))),
        }
    }
}

/// Parameters for a domain comparison run.
#[derive(Debug, Clone, Default)]
pub struct ComparisonRequest {
    /// Domains to compare, in baseline-first order
    pub domain_ids: Vec<String>,
    /// Which breakdowns to compute
    pub focus: ComparisonFocus,
    /// Inclusive lower bound on report date
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on report date
    pub date_to: Option<NaiveDate>,
}

/// Diffs of one compared domain against the baseline.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonDiff {
    /// Request-volume diff in percent, 1 decimal; absent when the baseline
    /// had zero requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_diff: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_diff_label: Option<String>,
    /// Success-rate diff in absolute percentage points, 2 decimals
    pub success_diff: f64,
    pub success_diff_label: String,
    /// Speed diff in percent, 1 decimal; absent when the baseline speed is 0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_diff: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_diff_label: Option<String>,
}

/// One domain in the comparison output.
#[derive(Debug, Clone, Serialize)]
pub struct ComparedDomain {
    pub domain: Domain,
    pub metrics: AggregatedMetrics,
    /// Absent on the baseline domain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonDiff>,
}

/// One provider merged across the compared domains.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderOverlapEntry {
    pub provider_id: String,
    pub provider_name: String,
    /// Slugs of the compared domains this provider appears in
    pub domains: Vec<String>,
    /// Number of compared domains this provider appears in
    pub domain_count: i64,
    /// Request total summed across the contributing domains
    pub total_requests: i64,
    /// Mean of the per-domain mean success rates
    pub avg_success_rate: f64,
    /// Mean of the per-domain mean speeds
    pub avg_speed: f64,
}

/// Cross-domain provider overlap.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderOverlap {
    /// Every provider seen in any compared domain
    pub all_providers: Vec<ProviderOverlapEntry>,
    /// Providers present in at least two compared domains
    pub common_providers: Vec<ProviderOverlapEntry>,
    /// Distinct provider identities across all compared domains
    pub unique_providers_count: i64,
}

/// Full comparison output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DomainComparison {
    /// Compared domains in input order; the first entry is the baseline
    pub domains: Vec<ComparedDomain>,
    /// Number of domains that produced data
    pub total_compared: usize,
    pub provider_data: ProviderOverlap,
}

/// Per-domain provider aggregate feeding the overlap merge.
struct DomainProviderAggregate {
    provider_name: String,
    domain_slug: String,
    total_requests: i64,
    success_rate: f64,
    avg_speed: f64,
}

/// Compare the given domains against the first one that has data.
pub fn compare_domains(db: &Database, request: &ComparisonRequest) -> Result<DomainComparison> {
    let mut compared: Vec<ComparedDomain> = Vec::new();
    // provider_id -> per-domain aggregates, in first-seen order
    let mut overlap_order: Vec<String> = Vec::new();
    let mut overlap: HashMap<String, Vec<DomainProviderAggregate>> = HashMap::new();

    let breakdowns = request.focus.breakdowns();

    for domain_id in &request.domain_ids {
        let Some(domain) = db.get_domain(domain_id)? else {
            tracing::debug!(domain_id = %domain_id, "Skipping unknown domain in comparison");
            continue;
        };
        if !domain.is_active {
            continue;
        }

        let reports =
            db.list_processed_reports(&domain.id, request.date_from, request.date_to)?;
        if reports.is_empty() {
            tracing::debug!(domain = %domain.slug, "Skipping domain with no qualifying reports");
            continue;
        }

        let report_ids: Vec<String> = reports.iter().map(|r| r.id.clone()).collect();
        let aggregated = metrics::aggregate(db, &report_ids, &breakdowns)?;

        collect_domain_providers(db, &domain, request, &mut overlap_order, &mut overlap)?;

        let comparison = compared
            .first()
            .map(|baseline| diff_against(&aggregated, &baseline.metrics));

        compared.push(ComparedDomain {
            domain,
            metrics: aggregated,
            comparison,
        });
    }

    let provider_data = merge_overlap(overlap_order, overlap);
    let total_compared = compared.len();

    Ok(DomainComparison {
        domains: compared,
        total_compared,
        provider_data,
    })
}

/// Aggregate one domain's provider rows and feed them into the overlap map.
fn collect_domain_providers(
    db: &Database,
    domain: &Domain,
    request: &ComparisonRequest,
    overlap_order: &mut Vec<String>,
    overlap: &mut HashMap<String, Vec<DomainProviderAggregate>>,
) -> Result<()> {
    let filter = ProviderUsageFilter {
        date_from: request.date_from,
        date_to: request.date_to,
        domain_ids: Some(vec![domain.id.clone()]),
        ..Default::default()
    };
    let usage_rows = db.list_provider_usage(&filter)?;

    // Group this domain's rows by provider, unweighted means across rows
    struct Acc {
        name: String,
        total: i64,
        rate_sum: f64,
        speed_sum: f64,
        rows: i64,
    }
    let mut per_provider: Vec<(String, Acc)> = Vec::new();
    for row in usage_rows {
        match per_provider
            .iter()
            .position(|(id, _)| *id == row.provider_id)
        {
            Some(i) => {
                let acc = &mut per_provider[i].1;
                acc.total += row.total_count;
                acc.rate_sum += row.success_rate;
                acc.speed_sum += row.avg_speed;
                acc.rows += 1;
            }
            None => per_provider.push((
                row.provider_id.clone(),
                Acc {
                    name: row.provider_name,
                    total: row.total_count,
                    rate_sum: row.success_rate,
                    speed_sum: row.avg_speed,
                    rows: 1,
                },
            )),
        }
    }

    for (provider_id, acc) in per_provider {
        if !overlap.contains_key(&provider_id) {
            overlap_order.push(provider_id.clone());
        }
        overlap
            .entry(provider_id)
            .or_default()
            .push(DomainProviderAggregate {
                provider_name: acc.name,
                domain_slug: domain.slug.clone(),
                total_requests: acc.total,
                success_rate: acc.rate_sum / acc.rows as f64,
                avg_speed: acc.speed_sum / acc.rows as f64,
            });
    }

    Ok(())
}

/// Merge per-domain provider aggregates into the overlap summary.
fn merge_overlap(
    order: Vec<String>,
    mut overlap: HashMap<String, Vec<DomainProviderAggregate>>,
) -> ProviderOverlap {
    let mut all_providers: Vec<ProviderOverlapEntry> = Vec::new();

    for provider_id in order {
        let Some(entries) = overlap.remove(&provider_id) else {
            continue;
        };
        let domain_count = entries.len() as i64;
        let total_requests: i64 = entries.iter().map(|e| e.total_requests).sum();
        let avg_success_rate =
            entries.iter().map(|e| e.success_rate).sum::<f64>() / domain_count as f64;
        let avg_speed = entries.iter().map(|e| e.avg_speed).sum::<f64>() / domain_count as f64;

        all_providers.push(ProviderOverlapEntry {
            provider_id,
            provider_name: entries[0].provider_name.clone(),
            domains: entries.iter().map(|e| e.domain_slug.clone()).collect(),
            domain_count,
            total_requests,
            avg_success_rate,
            avg_speed,
        });
    }

    all_providers.sort_by(|a, b| b.total_requests.cmp(&a.total_requests));

    let common_providers: Vec<ProviderOverlapEntry> = all_providers
        .iter()
        .filter(|entry| entry.domain_count >= 2)
        .cloned()
        .collect();
    let unique_providers_count = all_providers.len() as i64;

    ProviderOverlap {
        all_providers,
        common_providers,
        unique_providers_count,
    }
}

/// Compute the diff block of `current` against `base`.
fn diff_against(current: &AggregatedMetrics, base: &AggregatedMetrics) -> ComparisonDiff {
    let requests_diff = percent_diff(
        current.total_requests as f64,
        base.total_requests as f64,
    );
    let speed_diff = percent_diff(current.avg_speed, base.avg_speed);

    let success_diff = round_to(current.success_rate - base.success_rate, 2);

    ComparisonDiff {
        requests_diff,
        requests_diff_label: requests_diff.map(format_diff),
        success_diff,
        success_diff_label: format_diff(success_diff),
        speed_diff,
        speed_diff_label: speed_diff.map(format_diff),
    }
}

/// Percentage change of `current` over `base`, 1 decimal; `None` when the
/// base is not positive.
fn percent_diff(current: f64, base: f64) -> Option<f64> {
    if base > 0.0 {
        Some(round_to((current - base) / base * 100.0, 1))
    } else {
        None
    }
}

/// Format a diff with an explicit sign and a trailing percent.
fn format_diff(value: f64) -> String {
    format!("{:+.1}%", value)
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
