//! Failure injection for the in-memory backends

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Counts down injected failures; clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    remaining: Arc<AtomicU32>,
}

impl FaultInjector {
    /// Fail the next `count` calls.
    pub fn arm(&self, count: u32) {
        self.remaining.store(count, Ordering::SeqCst);
    }

    /// Consume one pending failure. Returns `true` if the call must fail.
    pub fn trip(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}
