//! Optional background driver that periodically calls `tick`.
//!
//! A plain OS thread parked with a timeout, woken early by `unpark` on
//! cancellation — no async runtime involved.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::cancel::CancellationToken;

pub(crate) struct AutoTicker {
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl AutoTicker {
    pub(crate) fn spawn<F>(interval: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let cancel_for_thread = cancel.clone();
        let join = thread::Builder::new()
            .name("mlfq-aging-ticker".into())
            .spawn(move || {
                loop {
                    if cancel_for_thread.is_cancelled() {
                        return;
                    }
                    thread::park_timeout(interval);
                    if cancel_for_thread.is_cancelled() {
                        return;
                    }
                    on_tick();
                }
            })
            .expect("mlfq: failed to spawn aging ticker thread");

        Self {
            cancel,
            join: Some(join),
        }
    }

    /// Signals the ticker thread to stop and waits for it to exit.
    pub(crate) fn stop(mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            join.thread().unpark();
            let _ = join.join();
        }
    }
}
