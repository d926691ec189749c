// crates/sync-core/src/progress.rs
//
// Progress and cancellation shapes shared between the engine worker
// (sync-engine::worker) and its callers. Mirrors velocut-media::worker's
// channel-based progress model but carries analysis/stitch phases instead
// of encode phases.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// `(current, total, message)`. Consumers must treat `current >= total` as
/// completion; `total` may increase as later phases start.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressEvent {
    pub current: u64,
    pub total: u64,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(current: u64, total: u64, message: impl Into<String>) -> Self {
        ProgressEvent {
            current,
            total,
            message: message.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.total
    }
}

/// Shared cancellation handle. A single atomic flag settable by any thread;
/// the engine only observes set transitions, never clears it itself.
#[derive(Clone, Debug)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        CancelHandle(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_event_completion() {
        let ev = ProgressEvent::new(5, 5, "done");
        assert!(ev.is_complete());
        let ev = ProgressEvent::new(4, 5, "working");
        assert!(!ev.is_complete());
    }

    #[test]
    fn cancel_handle_observes_set_transition_across_clones() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_cancelled());
        handle.cancel();
        assert!(clone.is_cancelled());
    }
}
