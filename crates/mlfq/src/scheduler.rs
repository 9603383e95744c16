//! The thread-safe scheduler core: submission, lease issuance, feedback
//! application, periodic aging ticks, and lifecycle management.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::clock::{Clock, SystemClock};
use crate::error::SchedulerError;
use crate::lease::{Attributes, Feedback, Lease, SubmitOptions};
use crate::multi_queue::MultiQueue;
use crate::policy::{DefaultPolicy, DefaultPolicyConfig, Policy};
use crate::stats::Stats;
use crate::ticker::AutoTicker;
use crate::token::Token;

/// Every submitted task's authoritative record.
///
/// The multi-queue only ever orders bare [`Token`]s (`Copy`, trivial to
/// queue); this struct is the single owner of the task payload and its
/// level/lease/attribute bookkeeping, keyed by that same token in `states`.
struct TaskState<T> {
    task: T,
    level: usize,
    attrs: Attributes,
    enqueued_at: Instant,
    leased: bool,
    last_quantum: Option<Duration>,
}

struct State<T> {
    closed: bool,
    mq: MultiQueue<Token>,
    states: HashMap<Token, TaskState<T>>,
    next_token: u64,

    submitted: u64,
    dequeued: u64,
    finished: u64,
    requeued: u64,
    promoted: u64,
    demoted: u64,
    aging_promoted: u64,
}

impl<T> State<T> {
    fn new(levels: usize) -> Self {
        Self {
            closed: false,
            mq: MultiQueue::new(levels),
            states: HashMap::new(),
            next_token: 0,
            submitted: 0,
            dequeued: 0,
            finished: 0,
            requeued: 0,
            promoted: 0,
            demoted: 0,
            aging_promoted: 0,
        }
    }
}

struct Inner<T, P> {
    state: Mutex<State<T>>,
    policy: P,
    clock: Arc<dyn Clock>,
    cancellation: CancellationToken,
    ticker: Mutex<Option<AutoTicker>>,
    _marker: PhantomData<fn() -> T>,
}

/// A thread-safe, generic multi-level feedback queue scheduler.
///
/// `Scheduler` is a thin handle around a reference-counted inner state, so
/// cloning it is cheap and every clone shares the same queues, token table,
/// and counters.
pub struct Scheduler<T, P> {
    inner: Arc<Inner<T, P>>,
}

impl<T, P> Clone for Scheduler<T, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builds a [`Scheduler`] via a functional-options style construction:
/// `Scheduler::builder(policy).with_clock(...).with_auto_tick(...).build()`.
pub struct SchedulerBuilder<T, P> {
    policy: P,
    clock: Arc<dyn Clock>,
    auto_tick_interval: Option<Duration>,
    cancellation: Option<CancellationToken>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, P> SchedulerBuilder<T, P>
where
    P: Policy<T>,
{
    fn new(policy: P) -> Self {
        Self {
            policy,
            clock: Arc::new(SystemClock),
            auto_tick_interval: None,
            cancellation: None,
            _marker: PhantomData,
        }
    }

    /// Injects a time source, in place of the default `Instant::now()`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enables a background thread that calls `tick` every `interval`.
    ///
    /// Remember to call [`Scheduler::close`] to stop it.
    #[must_use]
    pub fn with_auto_tick(mut self, interval: Duration) -> Self {
        if interval > Duration::ZERO {
            self.auto_tick_interval = Some(interval);
        }
        self
    }

    /// Wires an externally owned [`CancellationToken`] that every public
    /// operation consults before acquiring the scheduler lock.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Builds the scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidLevel`] if `policy.levels() == 0`.
    pub fn build(self) -> Result<Scheduler<T, P>, SchedulerError>
    where
        T: Clone + Send + 'static,
        P: Send + Sync + 'static,
    {
        let levels = self.policy.levels();
        if levels == 0 {
            return Err(SchedulerError::InvalidLevel);
        }

        let inner = Arc::new(Inner {
            state: Mutex::new(State::new(levels)),
            policy: self.policy,
            clock: self.clock,
            cancellation: self.cancellation.unwrap_or_default(),
            ticker: Mutex::new(None),
            _marker: PhantomData,
        });
        let scheduler = Scheduler { inner };

        if let Some(interval) = self.auto_tick_interval {
            scheduler.start_auto_tick(interval);
        }

        Ok(scheduler)
    }
}

impl<T, P> Scheduler<T, P>
where
    P: Policy<T>,
{
    /// Starts building a scheduler around `policy`.
    #[must_use]
    pub fn builder(policy: P) -> SchedulerBuilder<T, P> {
        SchedulerBuilder::new(policy)
    }

    /// Builds a scheduler around `policy` with default tuning (real clock,
    /// no auto-tick, no external cancellation).
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidLevel`] if `policy.levels() == 0`.
    pub fn new(policy: P) -> Result<Self, SchedulerError>
    where
        T: Clone + Send + 'static,
        P: Send + Sync + 'static,
    {
        Self::builder(policy).build()
    }
}

impl<T> Scheduler<T, DefaultPolicy<T>> {
    /// Builds a scheduler using [`DefaultPolicy`] with default tuning.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidLevel`] if `levels == 0`.
    pub fn new_default(levels: usize) -> Result<Self, SchedulerError>
    where
        T: Clone + Send + 'static,
    {
        Self::new(DefaultPolicy::new(levels, DefaultPolicyConfig::default()))
    }
}

impl<T, P> Scheduler<T, P>
where
    T: Clone,
    P: Policy<T>,
{
    fn lock(&self) -> std::sync::MutexGuard<'_, State<T>> {
        self.inner
            .state
            .lock()
            .expect("mlfq: lock poisoned by a panicking policy callback")
    }

    fn now(&self) -> Instant {
        self.inner.clock.now()
    }

    fn check_cancelled(&self) -> Result<(), SchedulerError> {
        if self.inner.cancellation.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }
        Ok(())
    }

    /// Submits a task, returning the [`Token`] it is tracked under.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] if the scheduler has been closed,
    /// [`SchedulerError::Cancelled`] if cancelled, or
    /// [`SchedulerError::InvalidLevel`] if the policy chose an out-of-range
    /// level.
    pub fn submit(&self, task: T, opts: SubmitOptions) -> Result<Token, SchedulerError> {
        self.check_cancelled()?;

        let mut state = self.lock();
        if state.closed {
            return Err(SchedulerError::Closed);
        }

        let now = self.now();
        let level = self.inner.policy.on_submit(now, &task, &opts);
        if level >= state.mq.levels() {
            return Err(SchedulerError::InvalidLevel);
        }

        state.next_token += 1;
        let token = Token(state.next_token);

        state.states.insert(
            token,
            TaskState {
                task,
                level,
                attrs: opts.attrs,
                enqueued_at: now,
                leased: false,
                last_quantum: None,
            },
        );
        state.mq.push(level, token);
        state.submitted += 1;

        tracing::trace!(token = token.0, level, "task submitted");
        Ok(token)
    }

    /// Dequeues the next task per policy, issuing a [`Lease`].
    ///
    /// Returns `None` if the queue is empty, the scheduler is closed, or
    /// cancellation was observed.
    pub fn next(&self) -> Option<Lease<T>> {
        if self.check_cancelled().is_err() {
            return None;
        }

        let mut state = self.lock();
        if state.closed {
            return None;
        }
        if state.mq.total_len() == 0 {
            return None;
        }

        let now = self.now();
        let level = self.inner.policy.pick_next(now, &state.mq)?;
        if level >= state.mq.levels() {
            tracing::warn!(level, "policy.pick_next returned an out-of-range level");
            return None;
        }

        let token = state.mq.pop(level)?;
        let quantum = {
            let task_state = state.states.get(&token)?;
            self.inner.policy.quantum(now, level, &task_state.task)
        };

        let task_state = state.states.get_mut(&token)?;
        task_state.level = level;
        task_state.leased = true;
        task_state.last_quantum = Some(quantum);
        let task = task_state.task.clone();
        state.dequeued += 1;

        Some(Lease {
            token,
            task,
            level,
            quantum,
            dequeued_at: now,
        })
    }

    /// Applies a feedback report for a previously leased task.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`], [`SchedulerError::Cancelled`],
    /// [`SchedulerError::UnknownToken`] if `token` was never issued or is
    /// already retired, [`SchedulerError::NotLeased`] if `token`'s task is
    /// currently queued rather than leased, or
    /// [`SchedulerError::InvalidLevel`] if the policy chose an out-of-range
    /// level on requeue.
    pub fn feedback(&self, token: Token, mut fb: Feedback) -> Result<(), SchedulerError> {
        self.check_cancelled()?;

        let mut state = self.lock();
        if state.closed {
            return Err(SchedulerError::Closed);
        }

        let now = self.now();

        {
            let task_state = state
                .states
                .get(&token)
                .ok_or(SchedulerError::UnknownToken)?;
            if !task_state.leased {
                return Err(SchedulerError::NotLeased);
            }
            if !fb.used_full_quantum {
                if let Some(last_quantum) = task_state.last_quantum {
                    if !last_quantum.is_zero() && fb.ran_for >= last_quantum {
                        fb.used_full_quantum = true;
                    }
                }
            }
            if fb.attrs == Attributes::default() {
                fb.attrs = task_state.attrs;
            }
        }

        let task_state = state
            .states
            .get_mut(&token)
            .ok_or(SchedulerError::UnknownToken)?;
        task_state.leased = false;

        if fb.finished {
            state.states.remove(&token);
            state.finished += 1;
            tracing::trace!(token = token.0, "task finished");
            return Ok(());
        }

        let old_level = task_state.level;
        let (new_level, requeue) =
            self.inner
                .policy
                .on_feedback(now, old_level, &task_state.task, &fb);
        if !requeue {
            state.states.remove(&token);
            state.finished += 1;
            tracing::trace!(token = token.0, "task finished (policy declined requeue)");
            return Ok(());
        }
        if new_level >= state.mq.levels() {
            return Err(SchedulerError::InvalidLevel);
        }

        match new_level.cmp(&old_level) {
            std::cmp::Ordering::Less => state.promoted += 1,
            std::cmp::Ordering::Greater => state.demoted += 1,
            std::cmp::Ordering::Equal => {}
        }

        let task_state = state
            .states
            .get_mut(&token)
            .expect("token verified present above");
        task_state.level = new_level;
        task_state.attrs = fb.attrs;
        task_state.enqueued_at = now;
        state.mq.push(new_level, token);
        state.requeued += 1;

        Ok(())
    }

    /// Walks each level's head (from the lowest-priority level down to
    /// level 1) and promotes aged-out tasks per the policy.
    ///
    /// No-op if the scheduler is closed or cancellation was observed.
    pub fn tick(&self, now: Instant) {
        if self.check_cancelled().is_err() {
            return;
        }
        self.tick_uncancellable(now);
    }

    /// The actual aging walk, shared by `tick` and the auto-ticker.
    ///
    /// The auto-ticker calls this directly rather than `tick`: its cadence
    /// must not be tied to a caller-supplied `CancellationToken`, which is
    /// scoped to aborting in-flight caller operations, not to stopping the
    /// scheduler's own background aging. Only `close()` (via the `closed`
    /// flag) may stop it.
    fn tick_uncancellable(&self, now: Instant) {
        let mut state = self.lock();
        if state.closed {
            return;
        }

        let levels = state.mq.levels();
        for level in (1..levels).rev() {
            let Some(&token) = state.mq.peek(level) else {
                continue;
            };
            let Some(task_state) = state.states.get(&token) else {
                continue;
            };
            let new_level = self
                .inner
                .policy
                .on_aging(now, level, &task_state.task, task_state.enqueued_at);
            let Some(new_level) = new_level else {
                continue;
            };
            if new_level >= levels || new_level == level {
                continue;
            }

            state.mq.pop(level);
            let task_state = state
                .states
                .get_mut(&token)
                .expect("token verified present above");
            task_state.level = new_level;
            task_state.enqueued_at = now;
            state.mq.push(new_level, token);
            state.aging_promoted += 1;
        }
    }

    /// Takes a read-only snapshot of queue lengths and cumulative counters.
    pub fn stats(&self) -> Stats {
        let state = self.lock();
        let levels = state.mq.levels();
        let by_level = (0..levels).map(|l| state.mq.len(l)).collect();

        Stats {
            now: self.now(),
            levels,
            total_len: state.mq.total_len(),
            by_level,
            submitted: state.submitted,
            dequeued: state.dequeued,
            finished: state.finished,
            requeued: state.requeued,
            promoted: state.promoted,
            demoted: state.demoted,
            aging_promoted: state.aging_promoted,
            bitmap_words: state.mq.bitmap_words(),
        }
    }

    /// Marks the scheduler closed and stops the auto-ticker, if any.
    ///
    /// Idempotent: a second call is a no-op.
    pub fn close(&self) {
        let already_closed = {
            let mut state = self.lock();
            let was_closed = state.closed;
            state.closed = true;
            was_closed
        };
        if !already_closed {
            tracing::debug!("scheduler closed");
        }

        let ticker = self.inner.ticker.lock().expect("mlfq: ticker lock poisoned").take();
        if let Some(ticker) = ticker {
            ticker.stop();
        }
    }
}

impl<T, P> Scheduler<T, P>
where
    T: Clone + Send + 'static,
    P: Policy<T> + Send + Sync + 'static,
{
    fn start_auto_tick(&self, interval: Duration) {
        let scheduler = self.clone();
        let ticker = AutoTicker::spawn(interval, move || {
            let now = scheduler.now();
            scheduler.tick_uncancellable(now);
        });
        *self.inner.ticker.lock().expect("mlfq: ticker lock poisoned") = Some(ticker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn scheduler_with_clock(levels: usize, clock: ManualClock) -> Scheduler<&'static str, DefaultPolicy<&'static str>> {
        Scheduler::builder(DefaultPolicy::new(levels, DefaultPolicyConfig::default()))
            .with_clock(Arc::new(clock))
            .build()
            .unwrap()
    }

    #[test]
    fn finish_through() {
        let clock = ManualClock::new();
        let sched = scheduler_with_clock(4, clock);

        let token = sched.submit("a", SubmitOptions::default()).unwrap();
        let lease = sched.next().unwrap();
        assert_eq!(lease.token, token);
        assert_eq!(lease.task, "a");
        assert_eq!(lease.level, 3);
        assert_eq!(lease.quantum, Duration::from_millis(80));

        sched
            .feedback(
                token,
                Feedback {
                    ran_for: Duration::from_millis(80),
                    finished: true,
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(sched.next().is_none());
        assert_eq!(sched.stats().finished, 1);
    }

    #[test]
    fn demotion_on_full_quantum() {
        let clock = ManualClock::new();
        let sched = scheduler_with_clock(4, clock);

        let token = sched
            .submit(
                "a",
                SubmitOptions::default().with_attributes(Attributes {
                    urgency: 100,
                    importance: 100,
                }),
            )
            .unwrap();
        let lease = sched.next().unwrap();
        assert_eq!(lease.level, 0);
        assert_eq!(lease.quantum, Duration::from_millis(10));

        sched
            .feedback(
                token,
                Feedback {
                    ran_for: Duration::from_millis(10),
                    used_full_quantum: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let stats = sched.stats();
        assert_eq!(stats.by_level, vec![0, 1, 0, 0]);
        assert_eq!(stats.demoted, 1);
    }

    #[test]
    fn promotion_by_attributes() {
        let clock = ManualClock::new();
        let sched = scheduler_with_clock(4, clock);

        let token = sched.submit("a", SubmitOptions::default()).unwrap();
        // Drive the task down to level 2 via an intervening lease/feedback.
        let lease = sched.next().unwrap();
        sched
            .feedback(
                lease.token,
                Feedback {
                    used_full_quantum: false,
                    attrs: Attributes {
                        urgency: 0,
                        importance: 0,
                    },
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(sched.stats().by_level[3], 1);

        // Force it to level 2 with a full-quantum demotion first isn't
        // needed: level 3 is already the lowest for a 4-level scheduler
        // with zero attributes, so re-lease and promote via high score.
        let lease = sched.next().unwrap();
        assert_eq!(lease.level, 3);
        sched
            .feedback(
                lease.token,
                Feedback {
                    ran_for: Duration::from_millis(1),
                    attrs: Attributes {
                        urgency: 80,
                        importance: 80,
                    },
                    ..Default::default()
                },
            )
            .unwrap();

        let stats = sched.stats();
        assert_eq!(stats.by_level[2], 1);
        assert_eq!(stats.promoted, 1);
        let _ = token;
    }

    #[test]
    fn aging_promotes_head_only() {
        let clock = ManualClock::new();
        let sched = Scheduler::builder(DefaultPolicy::new(
            3,
            DefaultPolicyConfig {
                aging_threshold: Duration::from_secs(5),
                ..Default::default()
            },
        ))
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

        sched.submit("a", SubmitOptions::default()).unwrap();
        sched.submit("b", SubmitOptions::default()).unwrap();
        assert_eq!(sched.stats().by_level[2], 2);

        clock.advance(Duration::from_secs(10));
        sched.tick(clock.now());

        let stats = sched.stats();
        assert_eq!(stats.by_level[1], 1);
        assert_eq!(stats.by_level[2], 1);
        assert_eq!(stats.aging_promoted, 1);
    }

    #[test]
    fn feedback_on_non_leased_token_fails() {
        let clock = ManualClock::new();
        let sched = scheduler_with_clock(4, clock);

        let token = sched.submit("a", SubmitOptions::default()).unwrap();
        let err = sched
            .feedback(
                token,
                Feedback {
                    finished: true,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert_eq!(err, SchedulerError::NotLeased);
    }

    #[test]
    fn feedback_with_unknown_token_fails() {
        let clock = ManualClock::new();
        let sched = scheduler_with_clock(4, clock);
        let bogus = Token(9999);
        let err = sched.feedback(bogus, Feedback::default()).unwrap_err();
        assert_eq!(err, SchedulerError::UnknownToken);
    }

    #[test]
    fn double_feedback_on_same_lease_fails() {
        let clock = ManualClock::new();
        let sched = scheduler_with_clock(4, clock);

        let token = sched.submit("a", SubmitOptions::default()).unwrap();
        sched.next().unwrap();
        sched.feedback(token, Feedback::default()).unwrap();
        let err = sched.feedback(token, Feedback::default()).unwrap_err();
        assert_eq!(err, SchedulerError::NotLeased);
    }

    #[test]
    fn submit_after_close_fails() {
        let clock = ManualClock::new();
        let sched = scheduler_with_clock(4, clock);
        sched.close();
        sched.close(); // idempotent
        let err = sched.submit("a", SubmitOptions::default()).unwrap_err();
        assert_eq!(err, SchedulerError::Closed);
    }

    #[test]
    fn no_lost_tasks_under_aging() {
        let clock = ManualClock::new();
        let sched = Scheduler::builder(DefaultPolicy::new(
            3,
            DefaultPolicyConfig {
                aging_threshold: Duration::from_millis(1),
                ..Default::default()
            },
        ))
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

        sched.submit("a", SubmitOptions::default()).unwrap();
        assert_eq!(sched.stats().by_level[2], 1);

        for _ in 0..2 {
            clock.advance(Duration::from_millis(5));
            sched.tick(clock.now());
        }

        let lease = sched.next();
        assert!(lease.is_some());
        assert_eq!(lease.unwrap().level, 0);
    }

    #[test]
    fn total_len_conserved_across_finish_cycle() {
        let clock = ManualClock::new();
        let sched = scheduler_with_clock(4, clock);

        let bystander = sched.submit("bystander", SubmitOptions::default()).unwrap();
        sched.next().unwrap();
        sched
            .feedback(
                bystander,
                Feedback {
                    finished: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let before = sched.stats().total_len;

        let token = sched.submit("a", SubmitOptions::default()).unwrap();
        let lease = sched.next().unwrap();
        assert_eq!(lease.token, token);
        sched
            .feedback(
                token,
                Feedback {
                    finished: true,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(sched.stats().total_len, before);
    }

    #[test]
    fn cancellation_short_circuits_operations() {
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        let sched = Scheduler::builder(DefaultPolicy::new(4, DefaultPolicyConfig::default()))
            .with_clock(Arc::new(clock))
            .with_cancellation(cancel.clone())
            .build()
            .unwrap();

        cancel.cancel();
        let err = sched.submit("a", SubmitOptions::default()).unwrap_err();
        assert_eq!(err, SchedulerError::Cancelled);
        assert!(sched.next().is_none());
    }

    #[test]
    fn external_cancellation_does_not_stop_auto_tick() {
        let cancel = CancellationToken::new();
        let sched: Scheduler<&'static str, DefaultPolicy<&'static str>> = Scheduler::builder(
            DefaultPolicy::new(
                2,
                DefaultPolicyConfig {
                    aging_threshold: Duration::from_millis(20),
                    ..Default::default()
                },
            ),
        )
        .with_auto_tick(Duration::from_millis(10))
        .with_cancellation(cancel.clone())
        .build()
        .unwrap();

        sched.submit("a", SubmitOptions::default()).unwrap();

        // Cancelling the caller-facing token aborts in-flight caller
        // operations; it must not also halt the background aging ticker.
        cancel.cancel();
        std::thread::sleep(Duration::from_millis(200));

        let stats = sched.stats();
        assert!(stats.aging_promoted >= 1);

        sched.close();
    }

    #[test]
    fn auto_tick_ages_and_close_stops_it() {
        let sched: Scheduler<&'static str, DefaultPolicy<&'static str>> = Scheduler::builder(
            DefaultPolicy::new(
                2,
                DefaultPolicyConfig {
                    aging_threshold: Duration::from_millis(20),
                    ..Default::default()
                },
            ),
        )
        .with_auto_tick(Duration::from_millis(10))
        .build()
        .unwrap();

        sched.submit("a", SubmitOptions::default()).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        let promoted_before = sched.stats().aging_promoted;
        assert!(promoted_before >= 1);

        sched.close();
        std::thread::sleep(Duration::from_millis(100));
        let promoted_after = sched.stats().aging_promoted;
        assert_eq!(promoted_before, promoted_after);
    }
}
