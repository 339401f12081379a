//! `metrics::Key` name constants for the streamer, mirrored after the
//! teacher's `readyset_client_metrics::recorded` convention of naming every
//! metric in one place rather than scattering string literals through the
//! call sites.

/// Binlog events decoded into an actionable `DMLEvent`.
pub const STREAMER_EVENTS_DECODED: &str = "ferry_streamer_events_decoded";

/// Binlog events that were skipped: unhandled event type, or a table not
/// present in the schema cache.
pub const STREAMER_EVENTS_SKIPPED: &str = "ferry_streamer_events_skipped";

/// Connection drops the streamer recovered from via backoff.
pub const STREAMER_RECONNECTS: &str = "ferry_streamer_reconnects";
