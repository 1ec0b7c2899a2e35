//! Directory metrics
//!
//! Recorded through the `metrics` facade; installing an exporter is up to
//! the embedding process.

use metrics::{counter, gauge};

/// Metric names
pub mod names {
    // Pool metrics
    pub const POOLS_ACTIVE: &str = "warden_pools_active";
    pub const POOL_BORROWS_TOTAL: &str = "warden_pool_borrows_total";
    pub const POOL_RETURNS_TOTAL: &str = "warden_pool_returns_total";
    pub const POOL_CONNECT_FAILURES_TOTAL: &str = "warden_pool_connect_failures_total";

    // Query metrics
    pub const DIRECTORY_SEARCHES_TOTAL: &str = "warden_directory_searches_total";
    pub const AUTHENTICATIONS_TOTAL: &str = "warden_authentications_total";
}

pub fn record_pools_active(count: usize) {
    gauge!(names::POOLS_ACTIVE).set(count as f64);
}

/// `source` is `idle` or `new`
pub fn record_borrow(tenant: &str, source: &'static str) {
    counter!(
        names::POOL_BORROWS_TOTAL,
        "tenant" => tenant.to_string(),
        "source" => source
    )
    .increment(1);
}

pub fn record_return(tenant: &str, outcome: &'static str) {
    counter!(
        names::POOL_RETURNS_TOTAL,
        "tenant" => tenant.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_connect_failure(uri: &str) {
    counter!(names::POOL_CONNECT_FAILURES_TOTAL, "uri" => uri.to_string()).increment(1);
}

pub fn record_search(kind: &str) {
    counter!(names::DIRECTORY_SEARCHES_TOTAL, "kind" => kind.to_string()).increment(1);
}

pub fn record_authentication(success: bool) {
    counter!(
        names::AUTHENTICATIONS_TOTAL,
        "status" => if success { "success" } else { "failure" }
    )
    .increment(1);
}
