//! Provider ranking
//!
//! Ranks domain x provider (or provider-aggregated) combinations with
//! percentage-of-domain-traffic enrichment, filtering, sorting, and
//! pagination.
//!
//! The store hands back raw report-level usage rows; grouping happens here
//! so that rate/speed averaging stays unweighted across the constituent
//! rows. A domain+provider pair appearing in two reports with very
//! different volumes still averages the two rate values equally.

use crate::db::{Database, ProviderUsageFilter, ProviderUsageRow};
use crate::error::{Error, Result};
use chrono::{Months, NaiveDate, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Default page size when none is requested.
pub const DEFAULT_PER_PAGE: i64 = 25;

/// Upper bound on page size.
pub const MAX_PER_PAGE: i64 = 100;

/// Metric a provider ranking is sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderSortKey {
    /// Summed request count (default)
    #[default]
    TotalRequests,
    /// Mean success rate
    SuccessRate,
    /// Mean speed
    AvgSpeed,
    /// Distinct contributing reports
    TotalReports,
}

impl ProviderSortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderSortKey::TotalRequests => "total_requests",
            ProviderSortKey::SuccessRate => "success_rate",
            ProviderSortKey::AvgSpeed => "avg_speed",
            ProviderSortKey::TotalReports => "total_reports",
        }
    }
}

impl std::str::FromStr for ProviderSortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "total_requests" => Ok(ProviderSortKey::TotalRequests),
            "success_rate" => Ok(ProviderSortKey::SuccessRate),
            "avg_speed" => Ok(ProviderSortKey::AvgSpeed),
            "total_reports" => Ok(ProviderSortKey::TotalReports),
            other => Err(Error::Validation(format!(
                "unknown provider sort key: {}",
                other
            ))),
        }
    }
}

/// Named convenience filter that resolves to an explicit date range,
/// overriding manually supplied bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodShortcut {
    Today,
    Yesterday,
    LastWeek,
    LastMonth,
    LastYear,
    AllTime,
}

impl PeriodShortcut {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodShortcut::Today => "today",
            PeriodShortcut::Yesterday => "yesterday",
            PeriodShortcut::LastWeek => "last_week",
            PeriodShortcut::LastMonth => "last_month",
            PeriodShortcut::LastYear => "last_year",
            PeriodShortcut::AllTime => "all_time",
        }
    }

    /// Resolve to inclusive date bounds against a reference date.
    ///
    /// Rolling windows: `last_week`/`last_month`/`last_year` end at the
    /// reference date. `all_time` clears both bounds.
    pub fn resolve(&self, reference: NaiveDate) -> (Option<NaiveDate>, Option<NaiveDate>) {
        match self {
            PeriodShortcut::Today => (Some(reference), Some(reference)),
            PeriodShortcut::Yesterday => {
                let day = reference - chrono::Days::new(1);
                (Some(day), Some(day))
            }
            PeriodShortcut::LastWeek => (Some(reference - chrono::Days::new(7)), Some(reference)),
            PeriodShortcut::LastMonth => (Some(reference - Months::new(1)), Some(reference)),
            PeriodShortcut::LastYear => (Some(reference - Months::new(12)), Some(reference)),
            PeriodShortcut::AllTime => (None, None),
        }
    }
}

impl std::str::FromStr for PeriodShortcut {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "today" => Ok(PeriodShortcut::Today),
            "yesterday" => Ok(PeriodShortcut::Yesterday),
            "last_week" => Ok(PeriodShortcut::LastWeek),
            "last_month" => Ok(PeriodShortcut::LastMonth),
            "last_year" => Ok(PeriodShortcut::LastYear),
            "all_time" => Ok(PeriodShortcut::AllTime),
            other => Err(Error::Validation(format!("unknown period: {}", other))),
        }
    }
}

/// Truncation/pagination mode for the materialized ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMode {
    /// Legacy: truncate to this many entries, no pagination metadata
    Limit(usize),
    /// Slice a page out of the full sorted list
    Page { page: i64, per_page: i64 },
}

impl Default for PageMode {
    fn default() -> Self {
        PageMode::Page {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

/// Parameters for a provider ranking run.
#[derive(Debug, Clone, Default)]
pub struct ProviderRankingRequest {
    /// Restrict to one provider
    pub provider_id: Option<String>,
    /// Restrict to one technology label
    pub technology: Option<String>,
    /// Inclusive lower bound on report date
    pub date_from: Option<NaiveDate>,
    /// Inclusive upper bound on report date
    pub date_to: Option<NaiveDate>,
    /// Named period; when given, overrides the explicit bounds
    pub period: Option<PeriodShortcut>,
    /// Access-control allowlist of domain ids; `None` = unrestricted
    pub accessible_domains: Option<Vec<String>>,
    /// Metric to sort by
    pub sort_by: ProviderSortKey,
    /// Collapse technologies into one row per (domain, provider)
    pub aggregate_by_provider: bool,
    /// Truncation/pagination mode
    pub page_mode: PageMode,
}

/// One entry in the provider ranking.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRankingRow {
    /// 1-based position after sorting
    pub rank: i64,
    pub domain_id: String,
    pub domain_name: String,
    pub domain_slug: String,
    pub provider_id: String,
    pub provider_name: String,
    pub provider_slug: String,
    /// Scalar label, or the distinct sorted comma-separated list when
    /// aggregating by provider
    pub technology: String,
    /// Summed request count over the grouped rows
    pub total_requests: i64,
    /// Unweighted mean success rate over the grouped rows
    pub avg_success_rate: f64,
    /// Unweighted mean speed over the grouped rows
    pub avg_speed: f64,
    /// Distinct contributing reports
    pub total_reports: i64,
    /// Earliest contributing report date
    pub period_start: NaiveDate,
    /// Latest contributing report date
    pub period_end: NaiveDate,
    /// Domain-wide request total under the same filters, across all providers
    pub domain_total_requests: i64,
    /// Share of the domain total, in percent
    pub percentage_of_domain: f64,
}

/// Pagination metadata for the paginated response shape.
#[derive(Debug, Clone, Serialize)]
pub struct PaginationMeta {
    /// Entries in the full sorted list
    pub total: usize,
    pub per_page: i64,
    pub current_page: i64,
    pub last_page: i64,
    /// 1-based index of the first entry on this page; `None` when empty
    pub from: Option<usize>,
    /// 1-based index of the last entry on this page; `None` when empty
    pub to: Option<usize>,
}

/// Provider ranking result, in one of two mutually distinct shapes.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ProviderRankingResponse {
    /// Page slice plus metadata
    Paginated {
        data: Vec<ProviderRankingRow>,
        pagination: PaginationMeta,
    },
    /// Legacy truncation; `total_entries` equals the truncated length
    Legacy {
        ranking: Vec<ProviderRankingRow>,
        total_entries: usize,
    },
}

/// In-memory accumulator for one (domain, provider[, technology]) group.
struct GroupAccumulator {
    domain_id: String,
    domain_name: String,
    domain_slug: String,
    provider_id: String,
    provider_name: String,
    provider_slug: String,
    scalar_technology: String,
    technologies: BTreeSet<String>,
    total_requests: i64,
    success_rate_sum: f64,
    speed_sum: f64,
    row_count: i64,
    report_ids: HashSet<String>,
    period_start: NaiveDate,
    period_end: NaiveDate,
}

impl GroupAccumulator {
    fn new(row: &ProviderUsageRow) -> Self {
        let mut technologies = BTreeSet::new();
        if !row.technology.is_empty() {
            technologies.insert(row.technology.clone());
        }
        Self {
            domain_id: row.domain_id.clone(),
            domain_name: row.domain_name.clone(),
            domain_slug: row.domain_slug.clone(),
            provider_id: row.provider_id.clone(),
            provider_name: row.provider_name.clone(),
            provider_slug: row.provider_slug.clone(),
            scalar_technology: row.technology.clone(),
            technologies,
            total_requests: row.total_count,
            success_rate_sum: row.success_rate,
            speed_sum: row.avg_speed,
            row_count: 1,
            report_ids: HashSet::from([row.report_id.clone()]),
            period_start: row.report_date,
            period_end: row.report_date,
        }
    }

    fn absorb(&mut self, row: &ProviderUsageRow) {
        if !row.technology.is_empty() {
            self.technologies.insert(row.technology.clone());
        }
        self.total_requests += row.total_count;
        self.success_rate_sum += row.success_rate;
        self.speed_sum += row.avg_speed;
        self.row_count += 1;
        self.report_ids.insert(row.report_id.clone());
        self.period_start = self.period_start.min(row.report_date);
        self.period_end = self.period_end.max(row.report_date);
    }

    fn into_row(self, aggregate_by_provider: bool) -> ProviderRankingRow {
        let technology = if aggregate_by_provider {
            self.technologies.into_iter().collect::<Vec<_>>().join(", ")
        } else {
            self.scalar_technology
        };

        ProviderRankingRow {
            rank: 0,
            domain_id: self.domain_id,
            domain_name: self.domain_name,
            domain_slug: self.domain_slug,
            provider_id: self.provider_id,
            provider_name: self.provider_name,
            provider_slug: self.provider_slug,
            technology,
            total_requests: self.total_requests,
            avg_success_rate: self.success_rate_sum / self.row_count as f64,
            avg_speed: self.speed_sum / self.row_count as f64,
            total_reports: self.report_ids.len() as i64,
            period_start: self.period_start,
            period_end: self.period_end,
            domain_total_requests: 0,
            percentage_of_domain: 0.0,
        }
    }
}

/// Rank domain x provider combinations under the requested filters.
pub fn rank_providers(
    db: &Database,
    request: &ProviderRankingRequest,
) -> Result<ProviderRankingResponse> {
    // A named period overrides explicit bounds
    let (date_from, date_to) = match request.period {
        Some(period) => period.resolve(Utc::now().date_naive()),
        None => (request.date_from, request.date_to),
    };

    let filter = ProviderUsageFilter {
        provider_id: request.provider_id.clone(),
        technology: request.technology.clone(),
        date_from,
        date_to,
        domain_ids: request.accessible_domains.clone(),
    };

    let usage_rows = db.list_provider_usage(&filter)?;
    let domain_totals: HashMap<String, i64> =
        db.domain_request_totals(&filter)?.into_iter().collect();

    // Group in first-seen order so ties keep store order
    let mut order: Vec<GroupAccumulator> = Vec::new();
    let mut index: HashMap<(String, String, String), usize> = HashMap::new();

    for row in &usage_rows {
        let technology_key = if request.aggregate_by_provider {
            String::new()
        } else {
            row.technology.clone()
        };
        let key = (row.domain_id.clone(), row.provider_id.clone(), technology_key);
        match index.get(&key) {
            Some(&i) => order[i].absorb(row),
            None => {
                index.insert(key, order.len());
                order.push(GroupAccumulator::new(row));
            }
        }
    }

    let mut rows: Vec<ProviderRankingRow> = order
        .into_iter()
        .map(|acc| {
            let mut row = acc.into_row(request.aggregate_by_provider);
            let domain_total = domain_totals.get(&row.domain_id).copied().unwrap_or(0);
            row.domain_total_requests = domain_total;
            // Zero/absent denominator degrades to the raw numerator
            let denominator = if domain_total > 0 { domain_total } else { 1 };
            row.percentage_of_domain = row.total_requests as f64 / denominator as f64 * 100.0;
            row
        })
        .collect();

    let sort_by = request.sort_by;
    rows.sort_by(|a, b| {
        sort_value(b, sort_by)
            .partial_cmp(&sort_value(a, sort_by))
            .unwrap_or(Ordering::Equal)
    });

    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = (i + 1) as i64;
    }

    tracing::debug!(
        groups = rows.len(),
        sort_by = sort_by.as_str(),
        aggregate_by_provider = request.aggregate_by_provider,
        "Ranked providers"
    );

    Ok(match request.page_mode {
        PageMode::Limit(limit) => {
            rows.truncate(limit);
            let total_entries = rows.len();
            ProviderRankingResponse::Legacy {
                ranking: rows,
                total_entries,
            }
        }
        PageMode::Page { page, per_page } => {
            let (data, pagination) = paginate(rows, page, per_page);
            ProviderRankingResponse::Paginated { data, pagination }
        }
    })
}

fn sort_value(row: &ProviderRankingRow, key: ProviderSortKey) -> f64 {
    match key {
        ProviderSortKey::TotalRequests => row.total_requests as f64,
        ProviderSortKey::SuccessRate => row.avg_success_rate,
        ProviderSortKey::AvgSpeed => row.avg_speed,
        ProviderSortKey::TotalReports => row.total_reports as f64,
    }
}

/// Slice a page out of the full sorted list.
///
/// `per_page` is clamped to [1, 100] and `page` to [1, last_page] before
/// slicing.
fn paginate(
    rows: Vec<ProviderRankingRow>,
    page: i64,
    per_page: i64,
) -> (Vec<ProviderRankingRow>, PaginationMeta) {
    let total = rows.len();
    let per_page = per_page.clamp(1, MAX_PER_PAGE);
    let last_page = ((total as i64 + per_page - 1) / per_page).max(1);
    let current_page = page.clamp(1, last_page);

    let start = ((current_page - 1) * per_page) as usize;
    let data: Vec<ProviderRankingRow> = rows
        .into_iter()
        .skip(start)
        .take(per_page as usize)
        .collect();

    let (from, to) = if data.is_empty() {
        (None, None)
    } else {
        (Some(start + 1), Some(start + data.len()))
    };

    (
        data,
        PaginationMeta {
            total,
            per_page,
            current_page,
            last_page,
            from,
            to,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dummy_row(rank: i64) -> ProviderRankingRow {
        ProviderRankingRow {
            rank,
            domain_id: "d1".to_string(),
            domain_name: "Alpha".to_string(),
            domain_slug: "alpha".to_string(),
            provider_id: format!("p{}", rank),
            provider_name: format!("Provider {}", rank),
            provider_slug: format!("provider-{}", rank),
            technology: "fiber".to_string(),
            total_requests: 1000 - rank,
            avg_success_rate: 90.0,
            avg_speed: 20.0,
            total_reports: 1,
            period_start: ymd(2026, 7, 1),
            period_end: ymd(2026, 7, 1),
            domain_total_requests: 10_000,
            percentage_of_domain: 10.0,
        }
    }

    #[test]
    fn test_sort_key_parsing() {
        assert_eq!(
            "total_requests".parse::<ProviderSortKey>().unwrap(),
            ProviderSortKey::TotalRequests
        );
        assert_eq!(
            "total_reports".parse::<ProviderSortKey>().unwrap(),
            ProviderSortKey::TotalReports
        );
        assert!(matches!(
            "requests".parse::<ProviderSortKey>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_period_parsing_and_resolution() {
        let reference = ymd(2026, 8, 6);

        let (from, to) = "today".parse::<PeriodShortcut>().unwrap().resolve(reference);
        assert_eq!(from, Some(reference));
        assert_eq!(to, Some(reference));

        let (from, to) = PeriodShortcut::Yesterday.resolve(reference);
        assert_eq!(from, Some(ymd(2026, 8, 5)));
        assert_eq!(to, Some(ymd(2026, 8, 5)));

        let (from, to) = PeriodShortcut::LastWeek.resolve(reference);
        assert_eq!(from, Some(ymd(2026, 7, 30)));
        assert_eq!(to, Some(reference));

        let (from, to) = PeriodShortcut::LastMonth.resolve(reference);
        assert_eq!(from, Some(ymd(2026, 7, 6)));
        assert_eq!(to, Some(reference));

        let (from, to) = PeriodShortcut::LastYear.resolve(reference);
        assert_eq!(from, Some(ymd(2025, 8, 6)));
        assert_eq!(to, Some(reference));

        assert_eq!(PeriodShortcut::AllTime.resolve(reference), (None, None));

        assert!(matches!(
            "fortnight".parse::<PeriodShortcut>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_paginate_clamps_and_slices() {
        let rows: Vec<ProviderRankingRow> = (1..=7).map(dummy_row).collect();

        let (data, meta) = paginate(rows.clone(), 2, 3);
        assert_eq!(data.len(), 3);
        assert_eq!(data[0].rank, 4);
        assert_eq!(meta.total, 7);
        assert_eq!(meta.last_page, 3);
        assert_eq!(meta.current_page, 2);
        assert_eq!(meta.from, Some(4));
        assert_eq!(meta.to, Some(6));

        // Page beyond the end clamps to the last page
        let (data, meta) = paginate(rows.clone(), 99, 3);
        assert_eq!(meta.current_page, 3);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].rank, 7);

        // per_page clamps into [1, 100]
        let (data, meta) = paginate(rows.clone(), 1, 0);
        assert_eq!(meta.per_page, 1);
        assert_eq!(data.len(), 1);
        let (_, meta) = paginate(rows, 1, 500);
        assert_eq!(meta.per_page, MAX_PER_PAGE);
    }

    #[test]
    fn test_paginate_empty_list() {
        let (data, meta) = paginate(vec![], 1, 25);
        assert!(data.is_empty());
        assert_eq!(meta.total, 0);
        assert_eq!(meta.last_page, 1);
        assert_eq!(meta.from, None);
        assert_eq!(meta.to, None);
    }
}
