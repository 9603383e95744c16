use std::time::Instant;

/// A read-only snapshot of scheduler state, for observability and tests.
#[derive(Debug, Clone)]
pub struct Stats {
    /// When this snapshot was taken, per the scheduler's clock source.
    pub now: Instant,
    /// Total number of levels.
    pub levels: usize,
    /// Sum of per-level lengths (excludes leased-but-not-fed-back tasks).
    pub total_len: usize,
    /// Per-level queue lengths, indexed by level.
    pub by_level: Vec<usize>,

    /// Cumulative count of `submit` calls that succeeded.
    pub submitted: u64,
    /// Cumulative count of `next` calls that returned a lease.
    pub dequeued: u64,
    /// Cumulative count of tasks removed as finished.
    pub finished: u64,
    /// Cumulative count of feedback-driven requeues.
    pub requeued: u64,
    /// Cumulative count of feedback-driven promotions (`new_level < old_level`).
    pub promoted: u64,
    /// Cumulative count of feedback-driven demotions (`new_level > old_level`).
    pub demoted: u64,
    /// Cumulative count of aging-driven promotions from `tick`.
    pub aging_promoted: u64,

    /// A defensive copy of the multi-queue's coherence bitmap, for debugging.
    pub bitmap_words: Vec<u64>,
}
