//! Utilities and extensions shared by every crate in the ferry workspace.

pub mod backoff;
pub mod cancel;
pub mod redacted;
pub mod time;

pub use cancel::CancellationToken;
pub use redacted::Redacted;
pub use time::{with_deadline, DEFAULT_QUERY_TIMEOUT};
