//! The coordinator's lifecycle state machine: `Starting -> Copying ->
//! WaitForCutover -> Cutover -> Done`. Transitions are monotonic by
//! construction; there is no rollback.
//!
//! `OverallState` is the value the out-of-scope control collaborator
//! reads (spec.md §6); `StateHandle` is the narrow capability the
//! coordinator advances it through, so that collaborator cannot corrupt
//! it into an invalid transition.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use metrics::gauge;

use crate::recorded;

/// The pipeline's lifecycle stage, observed by the control collaborator
/// and recorded in [`crate::ferry::RunOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum OverallState {
    Starting = 0,
    Copying = 1,
    WaitForCutover = 2,
    Cutover = 3,
    Done = 4,
}

impl OverallState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => OverallState::Starting,
            1 => OverallState::Copying,
            2 => OverallState::WaitForCutover,
            3 => OverallState::Cutover,
            _ => OverallState::Done,
        }
    }
}

/// Holds the current [`OverallState`] plus a separate "failing" flag the
/// `ErrorHandler` sets on the first fatal error — deliberately not folded
/// into `OverallState` itself, since a fatal error can arrive at any
/// stage and the state machine's transitions must stay monotonic.
#[derive(Debug, Default)]
pub struct StateHandle {
    state: AtomicU8,
    failing: AtomicBool,
}

impl StateHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(StateHandle {
            state: AtomicU8::new(OverallState::Starting as u8),
            failing: AtomicBool::new(false),
        })
    }

    pub fn get(&self) -> OverallState {
        OverallState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Advance to `next`. Panics if `next` does not strictly follow the
    /// current state: an attempted rollback is a programmer error in the
    /// coordinator, not a condition any caller can recover from.
    pub fn advance(&self, next: OverallState) {
        let current = self.get();
        assert!(
            (next as u8) > (current as u8),
            "non-monotonic OverallState transition: {current:?} -> {next:?}"
        );
        self.state.store(next as u8, Ordering::SeqCst);
        gauge!(recorded::OVERALL_STATE, next as u8 as f64);
    }

    pub fn mark_failing(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_starting() {
        let handle = StateHandle::new();
        assert_eq!(handle.get(), OverallState::Starting);
        assert!(!handle.is_failing());
    }

    #[test]
    fn advances_follow_the_fixed_prefix() {
        let handle = StateHandle::new();
        handle.advance(OverallState::Copying);
        handle.advance(OverallState::WaitForCutover);
        handle.advance(OverallState::Cutover);
        handle.advance(OverallState::Done);
        assert_eq!(handle.get(), OverallState::Done);
    }

    #[test]
    #[should_panic(expected = "non-monotonic")]
    fn advancing_backwards_panics() {
        let handle = StateHandle::new();
        handle.advance(OverallState::Copying);
        handle.advance(OverallState::Starting);
    }

    #[test]
    fn mark_failing_does_not_change_overall_state() {
        let handle = StateHandle::new();
        handle.advance(OverallState::Copying);
        handle.mark_failing();
        assert_eq!(handle.get(), OverallState::Copying);
        assert!(handle.is_failing());
    }
}
