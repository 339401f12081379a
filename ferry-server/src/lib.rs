//! The `Ferry` coordinator: lifecycle state machine, `Throttler`,
//! `ErrorHandler`, and the built-in `WriteTarget` listener.

pub mod config;
pub mod control;
pub mod error_handler;
pub mod ferry;
pub mod recorded;
pub mod state;
pub mod throttler;
pub mod write_target;

pub use config::FerryConfig;
pub use control::ControlHandle;
pub use error_handler::{ErrorHandle, ErrorHandler, StateDump};
pub use ferry::{Ferry, RunOutcome};
pub use state::{OverallState, StateHandle};
pub use throttler::Throttler;
pub use write_target::{MySqlTargetConnector, TargetConnector, TargetTransaction, WriteTarget};
