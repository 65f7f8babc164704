//! # Idle scheduling
//!
//! Undo recording is deferred until the current burst of work settles.
//! Hosts pick how "idle" is detected by injecting an [`IdleScheduler`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

pub type IdleTask = Box<dyn FnOnce()>;

/// Delay used once pending work has had a chance to run
pub const FALLBACK_DELAY: Duration = Duration::from_millis(1);

pub trait IdleScheduler {
    /// Run `task` once the host is idle, or after `timeout` at the latest
    fn request_idle(&self, timeout: Duration, task: IdleTask);
}

/// Runs tasks on the current `tokio::task::LocalSet`, so stores using it
/// must live inside one. Stores built without a scheduler queue their
/// tasks internally instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioIdleScheduler;

impl TokioIdleScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl IdleScheduler for TokioIdleScheduler {
    fn request_idle(&self, timeout: Duration, task: IdleTask) {
        tokio::task::spawn_local(async move {
            let settled = tokio::time::timeout(timeout, async {
                tokio::task::yield_now().await;
                tokio::time::sleep(FALLBACK_DELAY).await;
            })
            .await;

            if settled.is_err() {
                tracing::trace!("[IdleScheduler] idle wait timed out after {:?}", timeout);
            }
            task();
        });
    }
}

/// Queues tasks until [`ManualScheduler::run_pending`] is called. For hosts
/// that drive their own loop, and for deterministic tests.
#[derive(Default, Clone)]
pub struct ManualScheduler {
    queue: Rc<RefCell<VecDeque<IdleTask>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Run queued tasks, including ones queued while running. Returns how
    /// many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(task) = next else {
                return ran;
            };
            task();
            ran += 1;
        }
    }
}

impl IdleScheduler for ManualScheduler {
    fn request_idle(&self, _timeout: Duration, task: IdleTask) {
        self.queue.borrow_mut().push_back(task);
    }
}
