//! A shared backpressure gate both producers consult before issuing a
//! batch. Lives here rather than in `ferry-server` so `data-iterator` and
//! `replicators` can depend on it without a cycle back through the
//! coordinator crate that owns the background poller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ferry_util::CancellationToken;

/// The flag half of the throttle: cheap to read, cheap to flip. The
/// background lag-poller and `ControlHandle::set_paused` both write it;
/// producers only read it.
#[derive(Debug, Default)]
pub struct Throttle {
    throttled: AtomicBool,
}

impl Throttle {
    pub fn new() -> Arc<Self> {
        Arc::new(Throttle {
            throttled: AtomicBool::new(false),
        })
    }

    pub fn set(&self, throttled: bool) {
        self.throttled.store(throttled, Ordering::SeqCst);
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled.load(Ordering::SeqCst)
    }

    /// Poll until clear, or until `cancel` fires. Cooperative: holds no
    /// database resources while waiting.
    pub async fn wait_until_clear(&self, cancel: &CancellationToken) {
        while self.is_throttled() {
            if cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_immediately_when_not_throttled() {
        let throttle = Throttle::new();
        let cancel = CancellationToken::new();
        throttle.wait_until_clear(&cancel).await;
    }

    #[tokio::test]
    async fn wait_returns_once_cleared() {
        let throttle = Throttle::new();
        throttle.set(true);
        let cancel = CancellationToken::new();

        let waiter = {
            let throttle = throttle.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { throttle.wait_until_clear(&cancel).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        throttle.set(false);
        waiter.await.unwrap();
    }
}
