//! Composite scoring
//!
//! Combines volume, quality, and speed into one ranking value:
//!
//! ```text
//! score = (total_requests / 1000) * (success_rate / 100) * (ln(avg_speed + 1) / 10)
//! ```
//!
//! Pure and deterministic. `avg_speed >= 0` is assumed, so the logarithm
//! argument is >= 1 and the result is always defined and >= 0. The score is
//! monotonic non-decreasing in each input holding the others fixed, and any
//! zero factor yields zero overall.

/// Compute the composite score for a domain's aggregated metrics.
pub fn composite_score(total_requests: i64, success_rate: f64, avg_speed: f64) -> f64 {
    let volume_factor = total_requests as f64 / 1000.0;
    let quality_factor = success_rate / 100.0;
    let speed_factor = (avg_speed + 1.0).ln() / 10.0;
    volume_factor * quality_factor * speed_factor
}
