//! Analytics services for netgauge
//!
//! Three related computations over the normalized report store:
//! - Domain ranking: active domains ranked by a chosen metric
//! - Provider ranking: domain x provider combinations with
//!   percentage-of-domain enrichment, sorting, and pagination
//! - Domain comparison: N domains diffed against a baseline, plus
//!   cross-domain provider overlap
//!
//! All services are synchronous, stateless, read-only computations: a
//! sequence of store queries followed by in-memory aggregation and sorting.
//! They share [`metrics`] for aggregation and [`scoring`] for the composite
//! score.

pub mod comparison;
pub mod domain_ranking;
pub mod metrics;
pub mod provider_ranking;
pub mod scoring;

pub use comparison::{
    compare_domains, ComparedDomain, ComparisonDiff, ComparisonFocus, ComparisonRequest,
    DomainComparison, ProviderOverlap, ProviderOverlapEntry,
};
pub use domain_ranking::{
    rank_domains, CoverageWindow, DomainMetrics, DomainRankingRequest, DomainSortKey,
    RankedDomain,
};
pub use metrics::{
    aggregate, AggregatedMetrics, BreakdownRequest, ProviderBreakdown, StateBreakdown,
    TechnologyShare, DEFAULT_TOP_N,
};
pub use provider_ranking::{
    rank_providers, PageMode, PaginationMeta, PeriodShortcut, ProviderRankingRequest,
    ProviderRankingResponse, ProviderRankingRow, ProviderSortKey, DEFAULT_PER_PAGE,
    MAX_PER_PAGE,
};
pub use scoring::composite_score;
