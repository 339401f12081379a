//! A cancellation signal threaded through every suspension point in the
//! pipeline: database round-trips, throttle waits, the cutover poll, and
//! batch-listener invocations.
//!
//! This is a thin, clonable wrapper over [`tokio_util::sync::CancellationToken`]
//! rather than an ad-hoc `AtomicBool` stop flag, so every observer wakes
//! immediately instead of on its next poll interval.

/// A cheaply-clonable cancellation signal.
///
/// Cloning shares the same underlying signal: cancelling any clone cancels
/// all of them.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(tokio_util::sync::CancellationToken);

impl CancellationToken {
    /// Construct a new, uncancelled token.
    pub fn new() -> Self {
        CancellationToken(tokio_util::sync::CancellationToken::new())
    }

    /// Signal cancellation. Idempotent: cancelling an already-cancelled
    /// token is a no-op.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    /// True once [`CancellationToken::cancel`] has been called on this
    /// token or any of its clones.
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolve once cancellation is signalled. Suspension points `select!`
    /// this alongside the actual work to cancel promptly.
    pub async fn cancelled(&self) {
        self.0.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_observe_the_same_cancellation() {
        let a = CancellationToken::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        a.cancel();
        assert!(b.is_cancelled());
        b.cancelled().await;
    }
}
