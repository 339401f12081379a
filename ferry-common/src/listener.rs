//! The listener contract both producers drive their emitted batches
//! through. Listeners run in registration order; the first failure aborts
//! the batch.

use async_trait::async_trait;
use ferry_errors::FerryError;

use crate::event::DMLEvent;

/// Receives every batch a producer emits, in registration order.
///
/// `Ferry::start` appends the built-in `WriteTarget` listener after any
/// consumer-registered listeners, so consumers observe a batch before it
/// is written to the target.
#[async_trait]
pub trait BatchListener: Send + Sync {
    async fn on_batch(&self, batch: &[DMLEvent]) -> Result<(), FerryError>;
}

/// Invoked once by `DataIterator` when its table queue drains. A failing
/// done listener is fatal, exactly like a read or write failure.
#[async_trait]
pub trait DoneListener: Send + Sync {
    async fn on_done(&self) -> Result<(), FerryError>;
}
