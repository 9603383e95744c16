use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheap, cloneable cancellation handle.
///
/// A single shared flag, checked with `Acquire` loads and flipped with a
/// `Release` store so the cancellation is visible to every clone without
/// needing a mutex — the same pattern used internally for the scheduler's
/// own `closed` flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not yet cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once [`CancellationToken::cancel`] has been called on this
    /// token or any of its clones.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Signals cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}
