use std::time::{Duration, Instant};

use crate::token::Token;

/// Task attributes consulted by a [`crate::policy::Policy`] when computing
/// an initial level or reacting to feedback.
///
/// Recommended range for each field is `[0, 100]`; values outside that range
/// are not rejected, but [`crate::policy::DefaultPolicy`] clamps their sum
/// into `[0, 200]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attributes {
    /// How urgent the task is — larger is more urgent.
    pub urgency: i8,
    /// How important the task is — larger is more important.
    pub importance: i8,
}

/// Options accepted by [`crate::Scheduler::submit`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    pub(crate) attrs: Attributes,
}

impl SubmitOptions {
    /// Attaches initial [`Attributes`] to a submission.
    #[must_use]
    pub fn with_attributes(mut self, attrs: Attributes) -> Self {
        self.attrs = attrs;
        self
    }
}

/// Reported by the caller after executing a leased task for one time slice.
#[derive(Debug, Clone, Copy, Default)]
pub struct Feedback {
    /// Real elapsed execution time for this slice.
    pub ran_for: Duration,
    /// The task is done; the scheduler removes it without requeuing.
    pub finished: bool,
    /// Whether this slice consumed the entire issued quantum.
    ///
    /// If left `false` but `ran_for >= ` the issued quantum, the scheduler
    /// infers `true` before consulting the policy.
    pub used_full_quantum: bool,
    /// Updated attributes; a default value means "unchanged" (the
    /// scheduler keeps whatever was recorded at submit or the last
    /// non-default feedback).
    pub attrs: Attributes,
}

/// A time-bounded grant of execution authority for one task, handed out by
/// [`crate::Scheduler::next`].
///
/// The caller should run `task` for at most `quantum`, then report back via
/// [`crate::Scheduler::feedback`] using `token`.
#[derive(Debug, Clone)]
pub struct Lease<T> {
    /// Correlates this lease with the matching `feedback` call.
    pub token: Token,
    /// The submitted task payload.
    pub task: T,
    /// The level this lease was dequeued from.
    pub level: usize,
    /// The recommended execution time budget for this lease.
    pub quantum: Duration,
    /// When this lease was issued, per the scheduler's clock source.
    pub dequeued_at: Instant,
}
