//! The `Throttler`'s background task: polls the source's replication lag
//! and updates the shared [`Throttle`] flag with hysteresis. The flag
//! itself lives in `ferry-common` so `data-iterator` and `replicators` can
//! consult it without depending back on this crate; this module is just
//! the thing that keeps it current.

use std::sync::Arc;
use std::time::Duration;

use ferry_common::Throttle;
use ferry_errors::FerryError;
use ferry_util::{with_deadline, CancellationToken, DEFAULT_QUERY_TIMEOUT};
use metrics::gauge;
use mysql_async::prelude::Queryable;
use mysql_async::Pool;
use tracing::warn;

use crate::recorded;

/// Polls `SHOW REPLICA STATUS` every `check_interval` and sets `throttle`
/// when lag crosses `lag_high_water`, clearing it once lag falls below
/// `lag_low_water`. Does not hold a connection between polls.
pub struct Throttler {
    source: Pool,
    throttle: Arc<Throttle>,
    lag_high_water: Duration,
    lag_low_water: Duration,
    check_interval: Duration,
}

impl Throttler {
    pub fn new(
        source: Pool,
        throttle: Arc<Throttle>,
        lag_high_water: Duration,
        lag_low_water: Duration,
        check_interval: Duration,
    ) -> Self {
        Throttler {
            source,
            throttle,
            lag_high_water,
            lag_low_water,
            check_interval,
        }
    }

    /// Poll until `cancel` fires. Operator pause (`ControlHandle::set_paused`)
    /// writes the same flag directly and is not overridden here except by
    /// the next lag reading.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.check_interval) => {}
            }

            match self.poll_lag().await {
                Ok(lag) => {
                    gauge!(recorded::THROTTLER_LAG_SECONDS, lag.as_secs_f64());
                    if lag >= self.lag_high_water {
                        self.throttle.set(true);
                    } else if lag <= self.lag_low_water {
                        self.throttle.set(false);
                    }
                    gauge!(
                        recorded::THROTTLER_STATE,
                        if self.throttle.is_throttled() { 1.0 } else { 0.0 }
                    );
                }
                Err(e) => warn!(error = %e, "failed to poll replication lag"),
            }
        }
    }

    async fn poll_lag(&self) -> Result<Duration, FerryError> {
        let mut conn = self
            .source
            .get_conn()
            .await
            .map_err(|e| FerryError::SourceRead(e.to_string()))?;

        let row: Option<mysql_async::Row> = with_deadline(DEFAULT_QUERY_TIMEOUT, async {
            conn.query_first("SHOW REPLICA STATUS")
                .await
                .map_err(|e| FerryError::SourceRead(e.to_string()))
        })
        .await?;

        let row = row.ok_or_else(|| {
            FerryError::SourceRead("SHOW REPLICA STATUS returned no row; is this a replica?".into())
        })?;

        // MySQL 8.0.22 renamed SHOW SLAVE STATUS to SHOW REPLICA STATUS and
        // Seconds_Behind_Master to Seconds_Behind_Source; accept either.
        let seconds_behind: Option<u64> = row
            .get::<Option<u64>, _>("Seconds_Behind_Source")
            .or_else(|| row.get::<Option<u64>, _>("Seconds_Behind_Master"))
            .flatten();

        Ok(Duration::from_secs(seconds_behind.unwrap_or(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hysteresis_thresholds_are_distinct_from_construction() {
        let throttler = Throttler::new(
            Pool::new(mysql_async::OptsBuilder::default()),
            Throttle::new(),
            Duration::from_secs(10),
            Duration::from_secs(2),
            Duration::from_secs(5),
        );
        assert!(throttler.lag_low_water < throttler.lag_high_water);
    }
}
