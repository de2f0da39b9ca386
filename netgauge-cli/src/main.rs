//! netgauge - ISP network-quality report analytics CLI
//!
//! Import report snapshots and query rankings and comparisons over them.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use netgauge_core::analytics::{
    compare_domains, rank_domains, rank_providers, ComparisonFocus, ComparisonRequest,
    DomainComparison, DomainRankingRequest, PageMode, ProviderRankingRequest,
    ProviderRankingResponse, ProviderRankingRow, RankedDomain,
};
use netgauge_core::{Config, Database};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "netgauge")]
#[command(about = "Analytics over ISP network-quality reports")]
#[command(version)]
struct Cli {
    /// Output JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Mirror log output to stderr
    #[arg(long, global = true)]
    verbose: bool,

    /// Override the database path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import report snapshot files (glob patterns)
    Import {
        /// Snapshot files or glob patterns (e.g. "reports/*.json")
        patterns: Vec<String>,
    },

    /// List active domains
    Domains,

    /// Rank active domains by a metric over a date window
    DomainRanking {
        /// Metric to sort by: score, volume, success, speed
        #[arg(long, default_value = "score")]
        sort_by: String,

        /// Inclusive start date (YYYY-MM-DD)
        #[arg(long)]
        date_from: Option<NaiveDate>,

        /// Inclusive end date (YYYY-MM-DD)
        #[arg(long)]
        date_to: Option<NaiveDate>,

        /// Exclude domains with fewer reports than this
        #[arg(long)]
        min_reports: Option<i64>,
    },

    /// Rank domain x provider combinations
    ProviderRanking {
        /// Restrict to one provider (id or slug)
        #[arg(long)]
        provider: Option<String>,

        /// Restrict to one technology label
        #[arg(long)]
        technology: Option<String>,

        /// Inclusive start date (YYYY-MM-DD)
        #[arg(long)]
        date_from: Option<NaiveDate>,

        /// Inclusive end date (YYYY-MM-DD)
        #[arg(long)]
        date_to: Option<NaiveDate>,

        /// Named period: today, yesterday, last_week, last_month,
        /// last_year, all_time (overrides explicit dates)
        #[arg(long)]
        period: Option<String>,

        /// Metric to sort by: total_requests, success_rate, avg_speed,
        /// total_reports
        #[arg(long, default_value = "total_requests")]
        sort_by: String,

        /// Page number (pagination mode)
        #[arg(long)]
        page: Option<i64>,

        /// Page size, 1-100 (pagination mode)
        #[arg(long)]
        per_page: Option<i64>,

        /// Legacy truncation: return at most this many rows, no pagination
        #[arg(long, conflicts_with_all = ["page", "per_page"])]
        limit: Option<usize>,

        /// Collapse technologies into one row per domain x provider
        #[arg(long)]
        aggregate: bool,
    },

    /// Compare domains against the first one with data
    Compare {
        /// Domains to compare (slugs or ids), baseline first
        domains: Vec<String>,

        /// Breakdown focus: geographic, providers, technologies (default all)
        #[arg(long)]
        metric: Option<String>,

        /// Inclusive start date (YYYY-MM-DD)
        #[arg(long)]
        date_from: Option<NaiveDate>,

        /// Inclusive end date (YYYY-MM-DD)
        #[arg(long)]
        date_to: Option<NaiveDate>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard = netgauge_core::logging::init(&config.logging, cli.verbose).ok();

    let db_path = cli.database.clone().unwrap_or_else(|| config.database_path());
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run migrations")?;

    match cli.command {
        Command::Import { ref patterns } => run_import(&db, patterns),
        Command::Domains => run_domains(&db, cli.json),
        Command::DomainRanking {
            ref sort_by,
            date_from,
            date_to,
            min_reports,
        } => {
            let request = DomainRankingRequest {
                sort_by: sort_by.parse()?,
                date_from,
                date_to,
                min_reports,
                accessible_domains: None,
            };
            let ranking = rank_domains(&db, &request)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&ranking)?);
            } else {
                print_domain_ranking(&ranking);
            }
            Ok(())
        }
        Command::ProviderRanking {
            ref provider,
            ref technology,
            date_from,
            date_to,
            ref period,
            ref sort_by,
            page,
            per_page,
            limit,
            aggregate,
        } => {
            let provider_id = match provider {
                Some(value) => Some(resolve_provider_id(&db, value)?),
                None => None,
            };
            let page_mode = match limit {
                Some(limit) => PageMode::Limit(limit),
                None => PageMode::Page {
                    page: page.unwrap_or(1),
                    per_page: per_page.unwrap_or(config.analytics.per_page),
                },
            };
            let request = ProviderRankingRequest {
                provider_id,
                technology: technology.clone(),
                date_from,
                date_to,
                period: period.as_deref().map(str::parse).transpose()?,
                accessible_domains: None,
                sort_by: sort_by.parse()?,
                aggregate_by_provider: aggregate,
                page_mode,
            };
            let response = rank_providers(&db, &request)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_provider_ranking(&response);
            }
            Ok(())
        }
        Command::Compare {
            ref domains,
            ref metric,
            date_from,
            date_to,
        } => {
            let domain_ids = resolve_domain_ids(&db, domains)?;
            let request = ComparisonRequest {
                domain_ids,
                focus: metric
                    .as_deref()
                    .map(str::parse)
                    .transpose()?
                    .unwrap_or(ComparisonFocus::All),
                date_from,
                date_to,
            };
            let comparison = compare_domains(&db, &request)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&comparison)?);
            } else {
                print_comparison(&comparison);
            }
            Ok(())
        }
    }
}

fn run_import(db: &Database, patterns: &[String]) -> Result<()> {
    if patterns.is_empty() {
        anyhow::bail!("No snapshot patterns given");
    }

    let mut imported = 0;
    let mut duplicates = 0;
    let mut errors = Vec::new();

    for pattern in patterns {
        let summary = netgauge_core::import_glob(db, pattern)
            .with_context(|| format!("failed to import {}", pattern))?;
        imported += summary.imported;
        duplicates += summary.duplicates;
        errors.extend(summary.errors);
    }

    println!(
        "Imported {} snapshot(s), {} duplicate(s), {} error(s)",
        imported,
        duplicates,
        errors.len()
    );
    for (path, message) in &errors {
        eprintln!("  {}: {}", path.display(), message);
    }

    if imported == 0 && !errors.is_empty() {
        anyhow::bail!("All imports failed");
    }
    Ok(())
}

fn run_domains(db: &Database, json: bool) -> Result<()> {
    let domains = db.list_active_domains(None)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&domains)?);
        return Ok(());
    }

    if domains.is_empty() {
        println!("No active domains.");
        return Ok(());
    }
    for domain in domains {
        println!("{:<24} {}", domain.slug, domain.name);
    }
    Ok(())
}

/// Resolve a provider argument that may be a slug or an id.
fn resolve_provider_id(db: &Database, value: &str) -> Result<String> {
    if let Some(provider) = db.get_provider_by_slug(value)? {
        return Ok(provider.id);
    }
    Ok(value.to_string())
}

/// Resolve domain arguments that may be slugs or ids, preserving order.
fn resolve_domain_ids(db: &Database, values: &[String]) -> Result<Vec<String>> {
    let mut ids = Vec::with_capacity(values.len());
    for value in values {
        match db.get_domain_by_slug(value)? {
            Some(domain) => ids.push(domain.id),
            None => ids.push(db.require_domain(value)?.id),
        }
    }
    Ok(ids)
}

fn print_domain_ranking(ranking: &[RankedDomain]) {
    if ranking.is_empty() {
        println!("No domains with qualifying reports.");
        return;
    }

    println!(
        "{:>4}  {:<24} {:>12} {:>9} {:>9} {:>9} {:>9} {:>8}",
        "rank", "domain", "requests", "success", "speed", "score", "reports", "days"
    );
    for entry in ranking {
        println!(
            "{:>4}  {:<24} {:>12} {:>8.1}% {:>9.1} {:>9.3} {:>9} {:>8}",
            entry.rank,
            entry.domain.slug,
            entry.metrics.total_requests,
            entry.metrics.success_rate,
            entry.metrics.avg_speed,
            entry.metrics.score,
            entry.coverage.total_reports,
            entry.coverage.days_covered,
        );
    }
}

fn print_provider_rows(rows: &[ProviderRankingRow]) {
    println!(
        "{:>4}  {:<20} {:<20} {:<18} {:>10} {:>9} {:>8} {:>8}",
        "rank", "domain", "provider", "technology", "requests", "success", "speed", "share"
    );
    for row in rows {
        println!(
            "{:>4}  {:<20} {:<20} {:<18} {:>10} {:>8.1}% {:>8.1} {:>7.1}%",
            row.rank,
            row.domain_slug,
            row.provider_slug,
            row.technology,
            row.total_requests,
            row.avg_success_rate,
            row.avg_speed,
            row.percentage_of_domain,
        );
    }
}

fn print_provider_ranking(response: &ProviderRankingResponse) {
    match response {
        ProviderRankingResponse::Paginated { data, pagination } => {
            if data.is_empty() {
                println!("No provider usage matches the filters.");
                return;
            }
            print_provider_rows(data);
            println!(
                "\nPage {}/{} ({} entries)",
                pagination.current_page, pagination.last_page, pagination.total
            );
        }
        ProviderRankingResponse::Legacy {
            ranking,
            total_entries,
        } => {
            if ranking.is_empty() {
                println!("No provider usage matches the filters.");
                return;
            }
            print_provider_rows(ranking);
            println!("\n{} entries", total_entries);
        }
    }
}

fn print_comparison(comparison: &DomainComparison) {
    if comparison.domains.is_empty() {
        println!("No compared domain has qualifying reports.");
        return;
    }

    for entry in &comparison.domains {
        let role = if entry.comparison.is_none() {
            " (baseline)"
        } else {
            ""
        };
        println!("{}{}", entry.domain.name, role);
        println!(
            "  requests: {:<12} success: {:.1}%  speed: {:.1}  reports: {}",
            entry.metrics.total_requests,
            entry.metrics.success_rate,
            entry.metrics.avg_speed,
            entry.metrics.total_reports,
        );
        if let Some(diff) = &entry.comparison {
            let requests = diff.requests_diff_label.as_deref().unwrap_or("n/a");
            let speed = diff.speed_diff_label.as_deref().unwrap_or("n/a");
            println!(
                "  vs baseline: requests {}  success {}  speed {}",
                requests, diff.success_diff_label, speed
            );
        }
        println!();
    }

    let overlap = &comparison.provider_data;
    println!(
        "Providers: {} distinct, {} common across domains",
        overlap.unique_providers_count,
        overlap.common_providers.len()
    );
    for entry in &overlap.common_providers {
        println!(
            "  {:<20} in {} domain(s)  requests: {:<10} success: {:.1}%",
            entry.provider_name,
            entry.domain_count,
            entry.total_requests,
            entry.avg_success_rate,
        );
    }
}
