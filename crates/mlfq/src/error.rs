use thiserror::Error;

/// Error conditions surfaced by [`crate::Scheduler`]'s public operations.
///
/// Every expected-in-practice failure mode gets its own variant so callers
/// can `match` rather than parse strings. Out-of-range bitmap/multi-queue
/// indices are a different category (programmer bugs) and panic instead of
/// appearing here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// A policy callback (or `Scheduler::new`) returned/reported a level
    /// outside `[0, levels)`.
    #[error("invalid level")]
    InvalidLevel,
    /// `feedback` referenced a token that was never issued, or has already
    /// been retired (finished, or dropped by a non-requeuing policy).
    #[error("unknown token")]
    UnknownToken,
    /// `feedback` referenced a token whose task is currently queued rather
    /// than out on lease.
    #[error("token not leased")]
    NotLeased,
    /// The scheduler has been closed; no further submissions are accepted.
    #[error("scheduler closed")]
    Closed,
    /// The caller-supplied cancellation token was already set.
    #[error("operation cancelled")]
    Cancelled,
}
