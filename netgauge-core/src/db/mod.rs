//! Database layer for netgauge
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for queries
//! - The read-only collaborator contract the analytics services depend on

pub mod repo;
pub mod schema;

pub use repo::{Database, ProviderUsageFilter, ProviderUsageRow, SummaryTotals};
