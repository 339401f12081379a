//! Every database round-trip in the pipeline carries a configurable
//! deadline; this wraps [`tokio::time::timeout`] so expiry converts
//! directly into the shared [`FerryError::Timeout`](ferry_errors::FerryError::Timeout).

use std::future::Future;
use std::time::Duration;

use ferry_errors::FerryError;

/// The deadline applied to schema-discovery, range-scan, and write
/// round-trips that don't have their own operator-configured timeout
/// (unlike `database_utils::CONNECT_TIMEOUT`, which governs only the
/// initial connection).
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Run `fut`, converting a timeout into `FerryError::Timeout(deadline)`.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, FerryError>
where
    F: Future<Output = Result<T, FerryError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(FerryError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn elapsed_deadline_becomes_timeout_error() {
        let result = with_deadline(Duration::from_millis(1), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, FerryError>(())
        })
        .await;
        assert!(matches!(result, Err(FerryError::Timeout(_))));
    }

    #[tokio::test]
    async fn completes_before_deadline_returns_inner_result() {
        let result = with_deadline(Duration::from_secs(1), async { Ok::<_, FerryError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
