//! A thread-safe, generic multi-level feedback queue (MLFQ) task scheduler.
//!
//! Tasks are submitted with optional [`Attributes`], placed onto one of a
//! fixed number of priority levels by a pluggable [`Policy`], and dequeued
//! as [`Lease`]s that carry a recommended execution-time budget. Callers
//! report back with [`Feedback`] after running a lease, which the policy
//! uses to promote, demote, or retire the task. An optional background
//! ticker drives aging promotions for tasks that have waited too long at
//! their current level.
//!
//! ```
//! use mlfq::{Scheduler, SubmitOptions, Feedback};
//!
//! let scheduler = Scheduler::new_default(4).unwrap();
//! let token = scheduler.submit("render frame", SubmitOptions::default()).unwrap();
//! let lease = scheduler.next().unwrap();
//! assert_eq!(lease.token, token);
//! scheduler.feedback(token, Feedback { finished: true, ..Default::default() }).unwrap();
//! ```

mod bitmap;
mod cancel;
mod clock;
mod error;
mod lease;
mod multi_queue;
mod policy;
mod ring_queue;
mod scheduler;
mod stats;
mod ticker;
mod token;

pub use bitmap::Bitmap;
pub use cancel::CancellationToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::SchedulerError;
pub use lease::{Attributes, Feedback, Lease, SubmitOptions};
pub use multi_queue::{MultiQueue, QueueView};
pub use policy::{DefaultPolicy, DefaultPolicyConfig, Policy};
pub use ring_queue::RingQueue;
pub use scheduler::{Scheduler, SchedulerBuilder};
pub use stats::Stats;
pub use token::Token;
