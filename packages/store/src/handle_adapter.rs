//! Store backend for documents owned by a [`DocumentHandle`].
//!
//! Commits are forwarded to the handle with a [`CommitTag`]. The handle's
//! patch events then drive everything else: the tag picks out this store's
//! own commits (undo recording, one-shot patch callbacks) from remote edits
//! (notification only).
//!
//! The store listens to the handle only while it has subscribers, plus a
//! transient listener that lives while commits are waiting for their
//! events.

use crate::handle::{
    ChangeEvent, CommitStatus, CommitTag, DocumentHandle, HandleChangeOptions, HandleError,
    ListenerId, PatchEvent, PatchOrigin,
};
use crate::store::{Backend, PatchData, Store};
use crate::{StoreError, StoreOptions};
use docstore_document::{ChangeOptions, Doc, Mutator, PatchCallback, PatchInfo};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use uuid::Uuid;

/// A commit whose patch event has not arrived yet
struct PendingCommit {
    tag: CommitTag,
    callback: Option<PatchCallback>,
    record_undo: bool,
    message: Option<String>,
}

pub(crate) struct HandleBackend {
    handle: Rc<dyn DocumentHandle>,
    store_key: Uuid,
    next_seq: Cell<u64>,
    pending: RefCell<VecDeque<PendingCommit>>,
    listener: Cell<Option<ListenerId>>,
    /// The listener only exists for pending commits
    transient: Cell<bool>,
    ready_listener: Cell<Option<ListenerId>>,
}

impl HandleBackend {
    fn new(handle: Rc<dyn DocumentHandle>) -> Self {
        Self {
            handle,
            store_key: Uuid::new_v4(),
            next_seq: Cell::new(0),
            pending: RefCell::new(VecDeque::new()),
            listener: Cell::new(None),
            transient: Cell::new(false),
            ready_listener: Cell::new(None),
        }
    }

    pub(crate) fn handle(&self) -> &Rc<dyn DocumentHandle> {
        &self.handle
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.listener.get().is_some()
    }

    pub(crate) fn commit(
        &self,
        store: &Store,
        mutator: Mutator,
        options: ChangeOptions,
    ) -> Result<Doc, StoreError> {
        let ChangeOptions {
            message,
            time,
            patch_callback,
        } = options;

        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let tag = CommitTag {
            store: self.store_key,
            seq,
        };

        self.pending.borrow_mut().push_back(PendingCommit {
            tag,
            callback: patch_callback,
            record_undo: store.should_record_undo(),
            message: message.clone(),
        });
        if !self.is_listening() {
            self.attach(store, true);
        }

        let status = self.handle.change(
            mutator,
            HandleChangeOptions {
                message,
                time,
                tag: Some(tag),
            },
        );

        match &status {
            Ok(CommitStatus::Pending) => {}
            Ok(CommitStatus::Applied) => {
                // Applied commits have emitted their events by now
                if self.take_pending(tag).is_some() {
                    tracing::warn!(
                        "[Store {}] handle applied commit {} without a tagged event",
                        store.id(),
                        seq
                    );
                    self.release_transient();
                }
            }
            Ok(CommitStatus::Unchanged) | Err(_) => {
                // No event will come for this tag
                self.take_pending(tag);
                self.release_transient();
            }
        }

        let status = status.map_err(|err| match err {
            HandleError::Document(err) => StoreError::Document(err),
            other => StoreError::Handle(other),
        })?;
        tracing::trace!("[Store {}] handle commit {} {:?}", store.id(), seq, status);

        store.held_doc()
    }

    fn take_pending(&self, tag: CommitTag) -> Option<PendingCommit> {
        let mut pending = self.pending.borrow_mut();
        let index = pending.iter().position(|commit| commit.tag == tag)?;
        pending.remove(index)
    }

    /// Take the commit for `tag`. Handles emit in commit order, so older
    /// commits still waiting will never see their events and are dropped.
    fn settle(&self, store: &Store, tag: CommitTag) -> Option<PendingCommit> {
        let commit = self.take_pending(tag)?;

        let mut stale = Vec::new();
        {
            let mut pending = self.pending.borrow_mut();
            while matches!(pending.front(), Some(older) if older.tag.seq < tag.seq) {
                stale.extend(pending.pop_front());
            }
        }
        if !stale.is_empty() {
            tracing::warn!(
                "[Store {}] dropped {} commit(s) whose events never arrived",
                store.id(),
                stale.len()
            );
        }

        Some(commit)
    }

    fn attach(&self, store: &Store, transient: bool) {
        let weak = store.downgrade();
        let id = self.handle.on_patch(Box::new(move |event: &PatchEvent| {
            if let Some(store) = weak.upgrade() {
                store.on_handle_patch(event);
            }
        }));
        tracing::trace!("[Store {}] attached handle listener (transient: {})", store.id(), transient);
        self.listener.set(Some(id));
        self.transient.set(transient);
    }

    fn detach(&self) {
        if let Some(id) = self.listener.take() {
            self.handle.off(id);
        }
        self.transient.set(false);
    }

    fn release_transient(&self) {
        if self.transient.get() && self.pending.borrow().is_empty() {
            self.detach();
        }
    }

    /// First subscriber arrived
    pub(crate) fn setup(&self, store: &Store) {
        if store.is_ready() {
            // Pick up edits made while nobody was listening
            if let Some(doc) = self.handle.try_sync_snapshot() {
                store.set_doc(doc);
            }
        }

        if self.is_listening() {
            self.transient.set(false);
        } else {
            self.attach(store, false);
        }
    }

    /// Last subscriber left
    pub(crate) fn teardown(&self) {
        if self.pending.borrow().is_empty() {
            self.detach();
        } else {
            self.transient.set(true);
        }
    }

    pub(crate) fn detach_ready_listener(&self) {
        if let Some(id) = self.ready_listener.take() {
            self.handle.off(id);
        }
    }

    pub(crate) fn detach_all(&self) {
        self.detach_ready_listener();
        self.detach();
    }
}

impl Store {
    /// Store over a handle's document. Must be called inside a
    /// `tokio::task::LocalSet`. The store becomes ready when the handle
    /// resolves or first reports a change, whichever happens first.
    pub fn from_handle(handle: Rc<dyn DocumentHandle>, options: StoreOptions) -> Self {
        let id = handle.document_id().to_string();
        let store = Self::build(id, Backend::Handle(HandleBackend::new(handle.clone())), options);

        let weak = store.downgrade();
        let ready_listener = handle.on_change(Box::new(move |event: &ChangeEvent| {
            if let Some(store) = weak.upgrade() {
                store.resolve_with(event.doc.clone());
            }
        }));
        if let Backend::Handle(backend) = &store.inner.backend {
            backend.ready_listener.set(Some(ready_listener));
        }

        let weak = store.downgrade();
        let resolving = handle.resolve();
        tokio::task::spawn_local(async move {
            let resolved = resolving.await;
            tokio::task::yield_now().await;

            let Some(store) = weak.upgrade() else {
                return;
            };
            match resolved {
                Ok(doc) => store.resolve_with(doc),
                Err(err) => {
                    tracing::error!("[Store {}] failed to resolve document: {}", store.id(), err);
                    store.inner.readiness.mark_failed(err.to_string());
                }
            }
        });

        store
    }

    /// The handle behind this store, if any
    pub fn handle(&self) -> Option<Rc<dyn DocumentHandle>> {
        match &self.inner.backend {
            Backend::Handle(backend) => Some(backend.handle.clone()),
            Backend::Memory => None,
        }
    }

    pub(crate) fn on_handle_patch(&self, event: &PatchEvent) {
        let Backend::Handle(backend) = &self.inner.backend else {
            return;
        };

        if !self.is_ready() {
            self.resolve_with(event.doc.clone());
            return;
        }

        let info = PatchInfo {
            before: event.before.clone(),
            after: event.after.clone(),
            source: event.source,
        };
        let pending = match event.origin {
            PatchOrigin::Local(tag) => backend.settle(self, tag),
            PatchOrigin::Remote => None,
        };

        match pending {
            Some(commit) => self.on_local_patches(
                &event.patches,
                &info,
                commit.record_undo,
                commit.message,
                commit.callback,
            ),
            None => {
                tracing::trace!("[Store {}] {} remote patch(es)", self.id(), event.patches.len());
                self.inner.state.borrow_mut().patch_data = Some(PatchData {
                    patches: event.patches.clone(),
                    info,
                });
            }
        }

        self.set_doc(event.doc.clone());
        backend.release_transient();
    }
}
