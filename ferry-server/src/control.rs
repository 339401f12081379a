//! `ControlHandle`: the fixed interface to the out-of-scope control
//! collaborator (the HTTP dashboard, per spec.md §6). No HTTP listener is
//! implemented here — `ferry`'s `main.rs` wires a process-local instance
//! driven by a CLI flag and SIGTERM, and tests construct one directly to
//! drive the cutover handshake without a dashboard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ferry_common::Throttle;
use ferry_util::CancellationToken;
use tokio::sync::oneshot;

use crate::state::{OverallState, StateHandle};

/// Shared by the coordinator and whatever drives operator commands.
/// Reading `overall_state` never blocks; `set_paused` and
/// `set_automatic_cutover` take effect on the next poll by whichever
/// producer or coordinator loop checks them.
pub struct ControlHandle {
    state: Arc<StateHandle>,
    throttle: Arc<Throttle>,
    cancel: CancellationToken,
    automatic_cutover: AtomicBool,
    row_copy_complete_tx: Mutex<Option<oneshot::Sender<()>>>,
    row_copy_complete_rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl ControlHandle {
    pub fn new(state: Arc<StateHandle>, throttle: Arc<Throttle>, cancel: CancellationToken) -> Arc<Self> {
        let (tx, rx) = oneshot::channel();
        Arc::new(ControlHandle {
            state,
            throttle,
            cancel,
            automatic_cutover: AtomicBool::new(false),
            row_copy_complete_tx: Mutex::new(Some(tx)),
            row_copy_complete_rx: Mutex::new(Some(rx)),
        })
    }

    pub fn overall_state(&self) -> OverallState {
        self.state.get()
    }

    /// Pause/unpause command: independent of the lag-driven throttle, and
    /// takes priority in the sense that the `Throttler`'s next lag poll
    /// will happily re-clear it if lag has in fact fallen — pausing is a
    /// momentary override, not a separate gate.
    pub fn set_paused(&self, paused: bool) {
        self.throttle.set(paused);
    }

    pub fn automatic_cutover(&self) -> bool {
        self.automatic_cutover.load(Ordering::SeqCst)
    }

    pub fn set_automatic_cutover(&self, value: bool) {
        self.automatic_cutover.store(value, Ordering::SeqCst);
    }

    /// The one-shot "row copy complete" signal. Can only be taken once —
    /// it is not a repeatable event (spec.md §9).
    pub fn row_copy_complete(&self) -> oneshot::Receiver<()> {
        self.row_copy_complete_rx
            .lock()
            .unwrap()
            .take()
            .expect("row_copy_complete receiver already taken")
    }

    /// The "shutdown" command: invokes the same cancellation every
    /// suspension point in the pipeline observes.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn signal_row_copy_complete(&self) {
        if let Some(tx) = self.row_copy_complete_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_paused_forces_the_throttle_flag() {
        let throttle = Throttle::new();
        let control = ControlHandle::new(StateHandle::new(), throttle.clone(), CancellationToken::new());
        assert!(!throttle.is_throttled());
        control.set_paused(true);
        assert!(throttle.is_throttled());
    }

    #[tokio::test]
    async fn row_copy_complete_fires_exactly_once() {
        let control = ControlHandle::new(StateHandle::new(), Throttle::new(), CancellationToken::new());
        let rx = control.row_copy_complete();
        control.signal_row_copy_complete();
        rx.await.unwrap();
    }

    #[test]
    fn shutdown_cancels_the_shared_token() {
        let cancel = CancellationToken::new();
        let control = ControlHandle::new(StateHandle::new(), Throttle::new(), cancel.clone());
        control.shutdown();
        assert!(cancel.is_cancelled());
    }
}
