//! Pluggable scheduling policy: initial level, next-level selection,
//! time-slice computation, feedback-driven promotion/demotion, and aging
//! promotion.

use std::time::{Duration, Instant};

use crate::lease::{Attributes, Feedback, SubmitOptions};
use crate::multi_queue::QueueView;

/// The decisions an [`crate::Scheduler`] consults to place, dequeue, and
/// requeue tasks.
///
/// Implementations run while the scheduler lock is held: `on_submit`,
/// `pick_next`, `quantum`, `on_feedback`, and `on_aging` must be
/// non-blocking and bounded, and must not call back into the owning
/// scheduler.
pub trait Policy<T> {
    /// Total number of levels this policy expects the multi-queue to have.
    /// Must be stable for the policy's lifetime.
    fn levels(&self) -> usize;

    /// Chooses the initial level for a freshly submitted task.
    ///
    /// The returned level must be in `[0, levels())`; an out-of-range value
    /// is a policy bug and is surfaced to the caller of `submit` as
    /// [`crate::error::SchedulerError::InvalidLevel`].
    fn on_submit(&self, now: Instant, task: &T, opts: &SubmitOptions) -> usize;

    /// Chooses which level `next` should dequeue from.
    ///
    /// Returns `None` iff `view` is empty.
    fn pick_next(&self, now: Instant, view: &dyn QueueView) -> Option<usize>;

    /// Computes the recommended time-slice budget for a lease about to be
    /// issued from `level`.
    fn quantum(&self, now: Instant, level: usize, task: &T) -> Duration;

    /// Reacts to a feedback report. `Finished` feedback is handled entirely
    /// by the scheduler and never reaches this method.
    ///
    /// Returns `(new_level, requeue)`; if `requeue` is `true`, `new_level`
    /// must be in `[0, levels())`.
    fn on_feedback(&self, now: Instant, level: usize, task: &T, fb: &Feedback) -> (usize, bool);

    /// Called once per `tick` for the head of each non-zero level, from
    /// highest-numbered to lowest.
    ///
    /// Returns `Some(new_level)` (with `new_level < level`) to promote the
    /// head task; `None` to leave it be.
    fn on_aging(&self, now: Instant, level: usize, task: &T, enqueued_at: Instant) -> Option<usize>;
}

/// Tunables for [`DefaultPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct DefaultPolicyConfig {
    /// The time-slice budget for level 0.
    pub base_quantum: Duration,
    /// The time-slice budget ceiling; `quantum` never exceeds this.
    pub max_quantum: Duration,
    /// How long a task must wait at its current level before `on_aging`
    /// promotes it.
    pub aging_threshold: Duration,
}

impl Default for DefaultPolicyConfig {
    fn default() -> Self {
        Self {
            base_quantum: Duration::from_millis(10),
            max_quantum: Duration::from_secs(1),
            aging_threshold: Duration::from_secs(1),
        }
    }
}

/// A usable baseline policy:
///
/// - level 0 is highest priority; higher levels are lower priority
/// - quantum grows exponentially with level, capped at `max_quantum`
/// - using the full quantum demotes by one level; high urgency/importance
///   can promote by one level
/// - a task that waits past `aging_threshold` at its level is promoted
#[derive(Debug, Clone)]
pub struct DefaultPolicy<T> {
    levels: usize,
    cfg: DefaultPolicyConfig,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> DefaultPolicy<T> {
    /// Creates a default policy with `levels` priority classes and the
    /// given tunables.
    ///
    /// # Panics
    ///
    /// Panics if `levels == 0`.
    #[must_use]
    pub fn new(levels: usize, cfg: DefaultPolicyConfig) -> Self {
        assert!(levels > 0, "mlfq: levels must be > 0");
        Self {
            levels,
            cfg,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Policy<T> for DefaultPolicy<T> {
    fn levels(&self) -> usize {
        self.levels
    }

    fn on_submit(&self, _now: Instant, _task: &T, opts: &SubmitOptions) -> usize {
        let score = score(opts.attrs);
        let rank = score * self.levels / 201; // 0..levels-1
        let level = (self.levels - 1).saturating_sub(rank);
        level.min(self.levels - 1)
    }

    fn pick_next(&self, _now: Instant, view: &dyn QueueView) -> Option<usize> {
        view.min_non_empty()
    }

    fn quantum(&self, _now: Instant, level: usize, _task: &T) -> Duration {
        let mut q = self.cfg.base_quantum;
        for _ in 0..level {
            if q >= self.cfg.max_quantum {
                return self.cfg.max_quantum;
            }
            q *= 2;
        }
        q.min(self.cfg.max_quantum)
    }

    fn on_feedback(&self, _now: Instant, level: usize, _task: &T, fb: &Feedback) -> (usize, bool) {
        if fb.finished {
            return (level, false);
        }
        let mut new_level = level;
        if fb.used_full_quantum {
            if new_level < self.levels - 1 {
                new_level += 1;
            }
            return (new_level, true);
        }
        if score(fb.attrs) >= 150 && new_level > 0 {
            new_level -= 1;
        }
        (new_level, true)
    }

    fn on_aging(&self, now: Instant, level: usize, _task: &T, enqueued_at: Instant) -> Option<usize> {
        if level == 0 {
            return None;
        }
        if now.saturating_duration_since(enqueued_at) >= self.cfg.aging_threshold {
            return Some(level - 1);
        }
        None
    }
}

fn score(attrs: Attributes) -> usize {
    let raw = i32::from(attrs.urgency) + i32::from(attrs.importance);
    raw.clamp(0, 200) as usize
}
