//! Timer service abstraction and the per-instance timer table.
//!
//! Every active timer is a spawned sleep task that posts an expiry event
//! into the owning instance's mailbox, so expiries are serialized against
//! external signals by construction. The [`TimerManager`] tags each schedule with a generation;
//! an expiry event is honored only if its generation still matches, which is
//! what makes cancel-on-exit and restart-replaces semantics race-free even
//! for expiries that were already queued when the cancellation happened.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::event::InstanceEvent;

/// Runtime-neutral sleep seam, mostly for deterministic tests; production
/// instances use [`TokioTimer`].
pub trait TimerService {
    type SleepFuture: Future<Output = ()> + Send + 'static;

    fn sleep(after: Duration) -> Self::SleepFuture;
}

/// Tokio-backed timer. Under `tokio::time::pause` these sleeps auto-advance,
/// which is how the timing tests stay deterministic.
pub struct TokioTimer;

impl TimerService for TokioTimer {
    type SleepFuture = tokio::time::Sleep;

    fn sleep(after: Duration) -> Self::SleepFuture {
        tokio::time::sleep(after)
    }
}

struct ActiveTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Active timers of the current state occupancy, name-keyed.
pub(crate) struct TimerManager {
    /// Weak so the driver's own timer table cannot keep its mailbox alive
    /// after the instance handle is gone.
    tx: mpsc::WeakSender<InstanceEvent>,
    active: HashMap<String, ActiveTimer>,
    next_generation: u64,
}

impl TimerManager {
    pub(crate) fn new(tx: mpsc::WeakSender<InstanceEvent>) -> Self {
        TimerManager {
            tx,
            active: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Schedules `name` relative to now. An already-active `name` is
    /// replaced: the old task is aborted and its generation forgotten, so at
    /// most one expiry fires, at the newer deadline.
    pub(crate) fn start<T: TimerService>(&mut self, name: &str, after: Duration) {
        let Some(tx) = self.tx.upgrade() else {
            // Instance is already shutting down; nothing to schedule into.
            return;
        };
        let generation = self.next_generation;
        self.next_generation += 1;

        let timer_name = name.to_string();
        let handle = tokio::spawn(async move {
            T::sleep(after).await;
            // The instance may have died in the meantime; expiry is then moot.
            let _ = tx
                .send(InstanceEvent::TimerExpired {
                    name: timer_name,
                    generation,
                })
                .await;
        });

        if let Some(previous) = self
            .active
            .insert(name.to_string(), ActiveTimer { generation, handle })
        {
            previous.handle.abort();
            trace!(timer = name, "timer rescheduled; prior deadline discarded");
        }
    }

    pub(crate) fn cancel(&mut self, name: &str) {
        if let Some(timer) = self.active.remove(name) {
            timer.handle.abort();
        }
    }

    /// Cancels every timer of the current state occupancy. Runs on each
    /// transition and at shutdown.
    pub(crate) fn cancel_all(&mut self) {
        for (_, timer) in self.active.drain() {
            timer.handle.abort();
        }
    }

    /// Checks a dequeued expiry event against the live table. Accepting
    /// consumes the entry; a mismatched generation or unknown name means the
    /// timer was canceled or replaced after the event was queued.
    pub(crate) fn accept(&mut self, name: &str, generation: u64) -> bool {
        match self.active.get(name) {
            Some(timer) if timer.generation == generation => {
                self.active.remove(name);
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn active_len(&self) -> usize {
        self.active.len()
    }
}
