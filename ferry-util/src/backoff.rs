//! Bounded exponential backoff for transient source/target connectivity
//! errors, shared by the `BinlogStreamer`'s reconnect loop and
//! `WriteTarget`'s whole-batch retry.

use std::time::Duration;

use exponential_backoff::Backoff;

/// Builds the retry-delay sequence for up to `max_retries` attempts,
/// starting at `min_delay` and capping at `max_delay`.
pub fn retry_delays(
    max_retries: u32,
    min_delay: Duration,
    max_delay: Duration,
) -> impl Iterator<Item = Option<Duration>> {
    Backoff::new(max_retries, min_delay, max_delay).into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_max_retries_delays() {
        let delays: Vec<_> =
            retry_delays(3, Duration::from_millis(10), Duration::from_secs(1)).collect();
        assert_eq!(delays.len(), 3);
    }
}
