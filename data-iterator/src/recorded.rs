//! `metrics::Key` name constants for the iterator, following the same
//! one-name-per-metric convention as `replicators::recorded`.

/// Rows copied from source to target across every table.
pub const ITERATOR_ROWS_COPIED: &str = "ferry_iterator_rows_copied";

/// Range-scan batches issued against the source.
pub const ITERATOR_BATCHES_READ: &str = "ferry_iterator_batches_read";

/// Tables that have finished their scan and drained from the work queue.
pub const ITERATOR_TABLES_COMPLETED: &str = "ferry_iterator_tables_completed";
