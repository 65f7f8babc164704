//! One-way NotReady → Ready transition with queued callbacks.
//!
//! The state lives in a `tokio::sync::watch` channel so any number of
//! `ready()` futures can wait on it without holding a borrow of the store.

use crate::StoreError;
use std::cell::RefCell;
use std::future::Future;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReadyState {
    NotReady,
    Ready,
    Failed(String),
}

pub(crate) struct Readiness {
    state: watch::Sender<ReadyState>,
    callbacks: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl Readiness {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(ReadyState::NotReady);
        Self {
            state,
            callbacks: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        *self.state.borrow() == ReadyState::Ready
    }

    /// Neither ready nor failed yet
    pub(crate) fn is_pending(&self) -> bool {
        *self.state.borrow() == ReadyState::NotReady
    }

    /// Returns true only for the call that performed the transition
    pub(crate) fn mark_ready(&self) -> bool {
        self.transition(ReadyState::Ready)
    }

    pub(crate) fn mark_failed(&self, reason: impl Into<String>) -> bool {
        let failed = self.transition(ReadyState::Failed(reason.into()));
        if failed {
            // Nothing will ever run them
            self.callbacks.borrow_mut().clear();
        }
        failed
    }

    fn transition(&self, next: ReadyState) -> bool {
        self.state.send_if_modified(|state| {
            if *state != ReadyState::NotReady {
                return false;
            }
            *state = next;
            true
        })
    }

    pub(crate) fn push(&self, callback: Box<dyn FnOnce()>) {
        self.callbacks.borrow_mut().push(callback);
    }

    pub(crate) fn take_callbacks(&self) -> Vec<Box<dyn FnOnce()>> {
        std::mem::take(&mut *self.callbacks.borrow_mut())
    }

    /// Resolves once the state leaves NotReady
    pub(crate) fn wait(&self) -> impl Future<Output = Result<(), StoreError>> + 'static {
        let mut rx = self.state.subscribe();
        async move {
            let state = {
                let current = rx
                    .wait_for(|state| *state != ReadyState::NotReady)
                    .await
                    .map_err(|_| StoreError::Dropped)?;
                (*current).clone()
            };

            match state {
                ReadyState::Ready => Ok(()),
                ReadyState::Failed(reason) => Err(StoreError::Resolution(reason)),
                ReadyState::NotReady => Err(StoreError::NotReady),
            }
        }
    }
}
