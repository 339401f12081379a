//! The `ErrorHandler`: collects fatal errors from any component, ensures a
//! single coordinated shutdown, and writes a post-mortem dump.
//!
//! Only the *first* reported error triggers cancellation and the dump;
//! later ones are logged at `warn` without retriggering shutdown.
//! [`ErrorHandler::stop`] must be called after both producers have
//! joined — draining the channel then, rather than racing it against live
//! producers, is what guarantees no error is lost (spec.md §4.6, §5).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ferry_errors::FerryError;
use ferry_util::CancellationToken;
use replication_offset::ChangePosition;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::state::StateHandle;

/// A single fatal condition reported by some named component.
#[derive(Debug, Serialize, Deserialize)]
pub struct StateDump {
    pub component: String,
    pub error: String,
    pub last_position: Option<ChangePosition>,
    pub timestamp: String,
}

struct ErrorReport {
    component: String,
    error: FerryError,
    last_position: Option<ChangePosition>,
}

/// The ingress side: cheap to clone, handed to every component that can
/// report a fatal condition.
#[derive(Clone)]
pub struct ErrorHandle {
    tx: mpsc::UnboundedSender<ErrorReport>,
}

impl ErrorHandle {
    /// Report a fatal condition. [`FerryError::Cancelled`] is deliberately
    /// not reportable through this path — it is a clean-shutdown signal,
    /// not a failure, and callers should check
    /// [`FerryError::is_cancellation`] before calling this.
    pub fn report(&self, component: impl Into<String>, error: FerryError, last_position: Option<ChangePosition>) {
        debug_assert!(!error.is_cancellation(), "Cancelled must not be reported as fatal");
        let _ = self.tx.send(ErrorReport {
            component: component.into(),
            error,
            last_position,
        });
    }
}

/// The handler's background task, running beside the producers for the
/// lifetime of the run.
pub struct ErrorHandler {
    handle: tokio::task::JoinHandle<Vec<(String, FerryError)>>,
}

impl ErrorHandler {
    /// Spawn the background task and return it alongside the `ErrorHandle`
    /// callers report through. `dump_path` is where the first error's
    /// `StateDump` is written.
    pub fn spawn(dump_path: PathBuf, state: Arc<StateHandle>, cancel: CancellationToken) -> (Self, ErrorHandle) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ErrorReport>();

        let handle = tokio::spawn(async move {
            let mut all = Vec::new();
            let mut primary_recorded = false;

            while let Some(report) = rx.recv().await {
                if !primary_recorded {
                    primary_recorded = true;
                    error!(
                        component = %report.component,
                        error = %report.error,
                        "first fatal error, triggering shutdown",
                    );
                    state.mark_failing();
                    cancel.cancel();
                    write_dump(&dump_path, &report);
                } else {
                    warn!(
                        component = %report.component,
                        error = %report.error,
                        "additional fatal error reported after shutdown already triggered",
                    );
                }
                all.push((report.component, report.error));
            }

            all
        });

        (ErrorHandler { handle }, ErrorHandle { tx })
    }

    /// Drain whatever is left in the channel and return every error
    /// reported, in arrival order (the first is the primary one). Callers
    /// must have already dropped every `ErrorHandle` clone (by joining the
    /// producers that held them) so the channel actually closes.
    pub async fn stop(self) -> Vec<(String, FerryError)> {
        self.handle.await.unwrap_or_default()
    }
}

fn write_dump(path: &Path, report: &ErrorReport) {
    let dump = StateDump {
        component: report.component.clone(),
        error: report.error.to_string(),
        last_position: report.last_position.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    match serde_yaml_ng::to_string(&dump) {
        Ok(yaml) => {
            if let Err(e) = std::fs::write(path, yaml) {
                warn!(error = %e, path = %path.display(), "failed to write state dump");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize state dump"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_error_triggers_cancellation_and_marks_failing() {
        let dir = tempfile::tempdir().unwrap();
        let dump_path = dir.path().join("dump.yaml");
        let state = StateHandle::new();
        let cancel = CancellationToken::new();

        let (handler, handle) = ErrorHandler::spawn(dump_path.clone(), state.clone(), cancel.clone());
        handle.report("binlog_streamer", FerryError::Binlog("connection lost".into()), None);

        // give the background task a chance to process the report
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(cancel.is_cancelled());
        assert!(state.is_failing());

        drop(handle);
        let errors = handler.stop().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "binlog_streamer");

        let dumped: StateDump = serde_yaml_ng::from_str(&std::fs::read_to_string(dump_path).unwrap()).unwrap();
        assert_eq!(dumped.component, "binlog_streamer");
    }

    #[tokio::test]
    async fn second_error_is_recorded_but_not_primary() {
        let dir = tempfile::tempdir().unwrap();
        let dump_path = dir.path().join("dump.yaml");
        let state = StateHandle::new();
        let cancel = CancellationToken::new();

        let (handler, handle) = ErrorHandler::spawn(dump_path.clone(), state.clone(), cancel.clone());
        handle.report("data_iterator", FerryError::SourceRead("boom".into()), None);
        handle.report("write_target", FerryError::TargetWrite("also boom".into()), None);

        drop(handle);
        let errors = handler.stop().await;
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].0, "data_iterator");

        let dumped: StateDump = serde_yaml_ng::from_str(&std::fs::read_to_string(dump_path).unwrap()).unwrap();
        assert_eq!(dumped.component, "data_iterator", "first error is primary");
    }
}
