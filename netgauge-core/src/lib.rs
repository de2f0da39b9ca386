//! # netgauge-core
//!
//! Core library for netgauge - analytics over ISP network-quality reports.
//!
//! This library provides:
//! - Domain types for domains, providers, states, and reports
//! - Database storage layer with SQLite
//! - Analytics services: domain ranking, provider ranking, domain comparison
//! - Snapshot importer
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Raw:** Snapshot JSON files captured at client sites (retained
//!   verbatim in the `payload` column)
//! - **Canonical:** Normalized SQLite tables - reports plus their summary,
//!   per-provider, and per-state rows, with provider/state identity shared
//!   across reports
//! - **Derived:** Rankings, comparisons, and breakdowns computed on demand
//!   by the read-only analytics services
//!
//! ## Example
//!
//! ```rust,no_run
//! use netgauge_core::{Config, Database};
//! use netgauge_core::analytics::{rank_domains, DomainRankingRequest};
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Database::open(&config.database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//!
//! let ranking = rank_domains(&db, &DomainRankingRequest::default()).expect("ranking failed");
//! for entry in ranking {
//!     println!("#{} {} score={:.3}", entry.rank, entry.domain.name, entry.metrics.score);
//! }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, ProviderUsageFilter};
pub use error::{Error, Result};
pub use ingest::{import_glob, import_snapshot, ImportOutcome, ImportSummary};
pub use types::*;

// Public modules
pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod types;
