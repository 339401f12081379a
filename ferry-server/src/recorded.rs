//! `metrics::Key` name constants for the coordinator, throttler, and
//! write path, following the same one-name-per-metric convention as
//! `replicators::recorded` and `data_iterator::recorded`.

/// Observed source replication lag, in seconds.
pub const THROTTLER_LAG_SECONDS: &str = "ferry_throttler_lag_seconds";

/// `1` while producers are throttled, `0` otherwise.
pub const THROTTLER_STATE: &str = "ferry_throttler_throttled";

/// Batches successfully committed to the target.
pub const WRITE_TARGET_BATCHES_APPLIED: &str = "ferry_write_target_batches_applied";

/// Whole-batch retry attempts against the target, including the first.
pub const WRITE_TARGET_RETRIES: &str = "ferry_write_target_retries";

/// Current `OverallState`, as its ordinal (0=Starting .. 4=Done).
pub const OVERALL_STATE: &str = "ferry_overall_state";
