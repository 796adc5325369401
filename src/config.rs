use std::env;
use std::time::Duration;

/// How a row-level failure affects the rest of the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFailurePolicy {
    /// Record the failure on the Bronze row and keep going. The load
    /// finalizes as partially completed when any row failed.
    Isolate,
    /// Rethrow and abort the whole transaction.
    Abort,
}

pub fn database_url() -> String {
    env::var("DATABASE_URL").expect("DATABASE_URL must be set")
}

pub fn pool_size() -> u32 {
    parsed("TAXBRIDGE_POOL_SIZE").unwrap_or(4)
}

/// The node level the mapping engine selects child nodes at.
pub fn mapping_level() -> i32 {
    parsed("TAXBRIDGE_MAPPING_LEVEL").unwrap_or(0)
}

/// Upper bound for explicit hierarchy levels and placeholder chains.
pub fn max_hierarchy_depth() -> i32 {
    parsed("TAXBRIDGE_MAX_DEPTH").unwrap_or(10)
}

/// Outer deadline for one pipeline invocation, applied as a Postgres
/// statement timeout inside the transaction.
pub fn deadline() -> Duration {
    Duration::from_secs(parsed("TAXBRIDGE_DEADLINE_SECS").unwrap_or(300))
}

pub fn row_failure_policy() -> RowFailurePolicy {
    match env::var("TAXBRIDGE_ROW_FAILURE_POLICY").as_deref() {
        Ok("abort") => RowFailurePolicy::Abort,
        _ => RowFailurePolicy::Isolate,
    }
}

fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| value.parse().ok())
}
