//! # Store
//!
//! Reactive, undoable owner of one document.
//!
//! ## Commit pipeline
//!
//! ```text
//! change(mutator)
//!   ├─ transaction active? ──▶ queue mutator, return held doc
//!   ├─ clear redo
//!   └─ make_change
//!        ├─ Memory: engine.change ─┐
//!        └─ Handle: handle.change ─┤ patch callback
//!                                  ├─ store PatchData
//!                                  ├─ schedule undo record (idle)
//!                                  └─ caller's one-shot callback
//!                     set_doc ──▶ heads changed? ──▶ inspector, subscribers
//! ```
//!
//! ## Invariants
//!
//! - the held snapshot is replaced only when its heads change
//! - one undo entry per local commit that produced patches; replays and
//!   remote edits record nothing
//! - redo history is cleared by every forward commit, never by a replay
//!
//! Everything runs on one thread. No `RefCell` borrow is held while user
//! callbacks, the engine, or the handle run.

use crate::config::StoreOptions;
use crate::handle_adapter::HandleBackend;
use crate::inspector::{Inspector, InspectorBridge};
use crate::readiness::Readiness;
use crate::scheduler::{IdleScheduler, ManualScheduler};
use crate::subscription::{SubscribeCallback, SubscriberId, SubscriberRegistry, Subscription};
use crate::transaction::PendingTransaction;
use crate::undo_stack::{UndoAction, UndoRedo, UndoStack};
use crate::{StoreConfig, StoreError};
use docstore_document::{
    ChangeOptions, Doc, DocumentEngine, DocumentError, Draft, JsonEngine, JsonPatcher, Mutator,
    Patch, PatchCallback, PatchInfo, PatchInverter, PatchSource,
};
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

/// Patches of the latest commit together with the snapshots around it
#[derive(Debug, Clone)]
pub struct PatchData {
    pub patches: Vec<Patch>,
    pub info: PatchInfo,
}

impl PatchData {
    /// Placeholder used before any commit has happened
    pub fn initial(doc: &Doc) -> Self {
        Self {
            patches: Vec::new(),
            info: PatchInfo {
                before: doc.clone(),
                after: doc.clone(),
                source: PatchSource::Change,
            },
        }
    }
}

pub(crate) enum Backend {
    /// Commits go straight through the engine
    Memory,
    /// Commits go through an external handle
    Handle(HandleBackend),
}

pub(crate) struct StoreState {
    pub(crate) doc: Option<Doc>,
    pub(crate) patch_data: Option<PatchData>,
    pub(crate) history: UndoStack,
    pub(crate) transaction: PendingTransaction,
    pub(crate) performing_undo_redo: bool,
}

pub(crate) struct StoreInner {
    pub(crate) id: String,
    pub(crate) config: StoreConfig,
    pub(crate) engine: Rc<dyn DocumentEngine>,
    pub(crate) patcher: Rc<dyn PatchInverter>,
    pub(crate) scheduler: Rc<dyn IdleScheduler>,
    /// Set when no scheduler was injected; drained by the store itself
    pub(crate) deferred: Option<ManualScheduler>,
    pub(crate) inspector: Option<Rc<dyn Inspector>>,
    pub(crate) backend: Backend,
    pub(crate) state: RefCell<StoreState>,
    pub(crate) subscribers: RefCell<SubscriberRegistry>,
    pub(crate) readiness: Readiness,
    pub(crate) bridge: RefCell<Option<InspectorBridge>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Backend::Handle(backend) = &self.backend {
            backend.detach_all();
        }
        if let Some(bridge) = self.bridge.get_mut().take() {
            bridge.disconnect();
        }
    }
}

/// Cheap to clone; all clones share one document
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Rc<StoreInner>,
}

/// Non-owning reference held by listeners and deferred tasks
#[derive(Clone)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl Store {
    /// Store over a document that is available now. Needs no runtime:
    /// without an injected scheduler, undo entries are recorded right
    /// before the next history read or commit.
    pub fn new(id: impl Into<String>, doc: Doc, options: StoreOptions) -> Self {
        let store = Self::build(id.into(), Backend::Memory, options);
        store.resolve_with(doc);
        store
    }

    /// Store over a document that arrives later. Must be called inside a
    /// `tokio::task::LocalSet`. A future that yields `None` leaves the store
    /// permanently not ready and fails `ready()`.
    pub fn from_future<F>(id: impl Into<String>, doc: F, options: StoreOptions) -> Self
    where
        F: Future<Output = Option<Doc>> + 'static,
    {
        let store = Self::build(id.into(), Backend::Memory, options);
        let weak = store.downgrade();

        tokio::task::spawn_local(async move {
            let resolved = doc.await;
            // Let listeners attached right after construction register first
            tokio::task::yield_now().await;

            let Some(store) = weak.upgrade() else {
                return;
            };
            match resolved {
                Some(doc) => store.resolve_with(doc),
                None => {
                    tracing::warn!("[Store {}] document future resolved without a snapshot", store.id());
                    store
                        .inner
                        .readiness
                        .mark_failed("document future resolved without a snapshot");
                }
            }
        });

        store
    }

    pub(crate) fn build(id: String, backend: Backend, options: StoreOptions) -> Self {
        let StoreOptions {
            config,
            engine,
            patcher,
            scheduler,
            inspector,
        } = options;

        let engine: Rc<dyn DocumentEngine> = match engine {
            Some(engine) => engine,
            None => Rc::new(JsonEngine::new()),
        };
        let patcher: Rc<dyn PatchInverter> = match patcher {
            Some(patcher) => patcher,
            None => Rc::new(JsonPatcher::new()),
        };
        let (scheduler, deferred): (Rc<dyn IdleScheduler>, _) = match scheduler {
            Some(scheduler) => (scheduler, None),
            None => {
                let deferred = ManualScheduler::new();
                let queue: Rc<dyn IdleScheduler> = Rc::new(deferred.clone());
                (queue, Some(deferred))
            }
        };

        let state = StoreState {
            doc: None,
            patch_data: None,
            history: UndoStack::with_max_levels(config.max_undo_levels),
            transaction: PendingTransaction::default(),
            performing_undo_redo: false,
        };

        Self {
            inner: Rc::new(StoreInner {
                id,
                config,
                engine,
                patcher,
                scheduler,
                deferred,
                inspector,
                backend,
                state: RefCell::new(state),
                subscribers: RefCell::new(SubscriberRegistry::default()),
                readiness: Readiness::new(),
                bridge: RefCell::new(None),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // ---------------------------------------------------------------
    // Readiness
    // ---------------------------------------------------------------

    pub fn is_ready(&self) -> bool {
        self.inner.readiness.is_ready()
    }

    /// Resolves once the store is ready, or with an error if the document
    /// could not be resolved
    pub fn ready(&self) -> impl Future<Output = Result<(), StoreError>> + 'static {
        self.inner.readiness.wait()
    }

    /// Run `callback` now if ready, otherwise on the transition
    pub fn on_ready(&self, callback: impl FnOnce() + 'static) {
        if self.is_ready() {
            callback();
        } else if self.inner.readiness.is_pending() {
            self.inner.readiness.push(Box::new(callback));
        }
    }

    /// Install the first snapshot and become ready. Later calls are ignored.
    pub(crate) fn resolve_with(&self, doc: Doc) {
        if !self.inner.readiness.is_pending() {
            return;
        }

        self.inner.state.borrow_mut().doc = Some(doc.clone());
        self.inner.readiness.mark_ready();
        tracing::debug!("[Store {}] ready, heads={}", self.id(), doc.heads());

        if let Backend::Handle(backend) = &self.inner.backend {
            backend.detach_ready_listener();
        }
        self.setup_inspector();

        for callback in self.inner.readiness.take_callbacks() {
            callback();
        }

        let data = self.current_patch_data(&doc);
        self.notify_subscribers(&doc, &data);
    }

    // ---------------------------------------------------------------
    // Snapshot access
    // ---------------------------------------------------------------

    /// Current snapshot; `None` until ready
    pub fn doc(&self) -> Option<Doc> {
        if !self.is_ready() {
            return None;
        }

        // Without a listener, out-of-band handle edits are only visible
        // through a synchronous read
        if let Backend::Handle(backend) = &self.inner.backend {
            if !backend.is_listening() {
                if let Some(snapshot) = backend.handle().try_sync_snapshot() {
                    self.set_doc(snapshot);
                }
            }
        }

        self.inner.state.borrow().doc.clone()
    }

    /// Patches of the latest commit
    pub fn patch_data(&self) -> Option<PatchData> {
        self.inner.state.borrow().patch_data.clone()
    }

    pub(crate) fn held_doc(&self) -> Result<Doc, StoreError> {
        self.inner
            .state
            .borrow()
            .doc
            .clone()
            .ok_or(StoreError::NotReady)
    }

    fn current_patch_data(&self, doc: &Doc) -> PatchData {
        self.inner
            .state
            .borrow()
            .patch_data
            .clone()
            .unwrap_or_else(|| PatchData::initial(doc))
    }

    /// Replace the held snapshot if `next` is a different version
    pub(crate) fn set_doc(&self, next: Doc) {
        {
            let mut state = self.inner.state.borrow_mut();
            if let Some(previous) = &state.doc {
                if self.inner.engine.heads(previous) == self.inner.engine.heads(&next) {
                    return;
                }
            }
            state.doc = Some(next.clone());
        }

        let live = self.report_to_inspector(&next);
        if live {
            let data = self.current_patch_data(&next);
            self.notify_subscribers(&next, &data);
        } else {
            tracing::trace!("[Store {}] inspector is scrubbing, holding back notification", self.id());
        }
    }

    // ---------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------

    /// Subscribe and receive the current snapshot immediately
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Doc, &PatchData) + 'static,
    {
        self.subscribe_with(callback, true)
    }

    pub fn subscribe_with<F>(&self, callback: F, fire_immediately: bool) -> Subscription
    where
        F: Fn(&Doc, &PatchData) + 'static,
    {
        let callback: SubscribeCallback = Rc::new(callback);

        if self.inner.subscribers.borrow().is_empty() {
            self.setup_subscriptions();
        }

        if fire_immediately {
            if let Some(doc) = self.doc() {
                let data = self.current_patch_data(&doc);
                callback(&doc, &data);
            }
        }

        let id = self.inner.subscribers.borrow_mut().add(callback);
        Subscription::new(self.downgrade(), id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) {
        let now_empty = {
            let mut subscribers = self.inner.subscribers.borrow_mut();
            subscribers.remove(id) && subscribers.is_empty()
        };
        if now_empty {
            self.teardown_subscriptions();
        }
    }

    pub(crate) fn notify_subscribers(&self, doc: &Doc, data: &PatchData) {
        let callbacks = self.inner.subscribers.borrow().snapshot();
        for callback in callbacks {
            callback(doc, data);
        }
    }

    fn setup_subscriptions(&self) {
        tracing::debug!("[Store {}] setting up subscriptions", self.id());
        if let Backend::Handle(backend) = &self.inner.backend {
            backend.setup(self);
        }
    }

    fn teardown_subscriptions(&self) {
        tracing::debug!("[Store {}] tearing down subscriptions", self.id());
        if let Backend::Handle(backend) = &self.inner.backend {
            backend.teardown();
        }
    }

    // ---------------------------------------------------------------
    // Commits
    // ---------------------------------------------------------------

    pub fn change<F>(&self, mutator: F) -> Result<Doc, StoreError>
    where
        F: FnOnce(&mut Draft) -> Result<(), DocumentError> + 'static,
    {
        self.change_with(mutator, ChangeOptions::new())
    }

    /// Commit `mutator`, or queue it while a transaction is open. Returns
    /// the held snapshot after the commit.
    pub fn change_with<F>(&self, mutator: F, options: ChangeOptions) -> Result<Doc, StoreError>
    where
        F: FnOnce(&mut Draft) -> Result<(), DocumentError> + 'static,
    {
        if !self.is_ready() {
            return Err(StoreError::NotReady);
        }
        self.flush_deferred();

        {
            let mut state = self.inner.state.borrow_mut();
            if state.transaction.is_active() {
                if options.patch_callback.is_some() {
                    tracing::trace!("[Store {}] patch callback dropped for queued mutator", self.inner.id);
                }
                state.transaction.enqueue(Box::new(mutator));
                return state.doc.clone().ok_or(StoreError::NotReady);
            }
            state.history.clear_redo();
        }

        self.make_change(Box::new(mutator), options)
    }

    fn make_change(&self, mutator: Mutator, options: ChangeOptions) -> Result<Doc, StoreError> {
        let result = match &self.inner.backend {
            Backend::Memory => self.commit_in_memory(mutator, options),
            Backend::Handle(backend) => backend.commit(self, mutator, options),
        };
        self.inner.state.borrow_mut().performing_undo_redo = false;
        result
    }

    fn commit_in_memory(&self, mutator: Mutator, options: ChangeOptions) -> Result<Doc, StoreError> {
        let current = self.held_doc()?;
        let ChangeOptions {
            message,
            time,
            patch_callback,
        } = options;

        let record_undo = self.should_record_undo();
        let store = self.downgrade();
        let title = message.clone();
        let wrapped = move |patches: &[Patch], info: &PatchInfo| {
            if let Some(store) = store.upgrade() {
                store.on_local_patches(patches, info, record_undo, title, patch_callback);
            }
        };

        let next = self.inner.engine.change(
            &current,
            ChangeOptions {
                message,
                time,
                patch_callback: Some(Box::new(wrapped)),
            },
            mutator,
        )?;

        self.set_doc(next);
        self.held_doc()
    }

    /// Whether a commit issued right now should land on the undo stack
    pub(crate) fn should_record_undo(&self) -> bool {
        self.inner.config.with_undo_redo && !self.inner.state.borrow().performing_undo_redo
    }

    /// Bookkeeping for patches produced by one of this store's commits
    pub(crate) fn on_local_patches(
        &self,
        patches: &[Patch],
        info: &PatchInfo,
        record_undo: bool,
        message: Option<String>,
        callback: Option<PatchCallback>,
    ) {
        self.inner.state.borrow_mut().patch_data = Some(PatchData {
            patches: patches.to_vec(),
            info: info.clone(),
        });

        if record_undo {
            self.schedule_undo_record(message, info.clone(), patches.to_vec());
        }

        if let Some(callback) = callback {
            callback(patches, info);
        }
    }

    fn schedule_undo_record(&self, message: Option<String>, info: PatchInfo, patches: Vec<Patch>) {
        let title = message.or_else(|| self.engine_label(&info.after));
        let store = self.downgrade();

        self.inner.scheduler.request_idle(
            self.inner.config.idle_timeout(),
            Box::new(move || {
                if let Some(store) = store.upgrade() {
                    store.record_undo(title, &info.before, patches);
                }
            }),
        );
    }

    fn engine_label(&self, doc: &Doc) -> Option<String> {
        let engine = &self.inner.engine;
        engine
            .last_local_change(doc)
            .and_then(|change| engine.decode_change(&change).message)
    }

    /// Record undo entries still waiting on the built-in queue
    fn flush_deferred(&self) {
        if let Some(deferred) = &self.inner.deferred {
            let recorded = deferred.run_pending();
            if recorded > 0 {
                tracing::trace!("[Store {}] flushed {} deferred undo record(s)", self.id(), recorded);
            }
        }
    }

    fn record_undo(&self, title: Option<String>, before: &Doc, patches: Vec<Patch>) {
        match self.inner.patcher.invert(before, &patches) {
            Ok(undo) => {
                tracing::debug!("[Store {}] recorded undo entry {:?}", self.id(), title);
                self.inner
                    .state
                    .borrow_mut()
                    .history
                    .record(UndoRedo::patches(title, undo, patches));
            }
            Err(err) => {
                tracing::warn!("[Store {}] could not invert commit: {}", self.id(), err);
            }
        }
    }

    // ---------------------------------------------------------------
    // Undo / redo
    // ---------------------------------------------------------------

    /// Undo the most recent entry. `Ok(false)` when there is nothing to undo.
    pub fn undo(&self) -> Result<bool, StoreError> {
        self.flush_deferred();
        let entry = {
            let mut state = self.inner.state.borrow_mut();
            let Some(entry) = state.history.undo() else {
                return Ok(false);
            };
            state.performing_undo_redo = true;
            entry
        };

        tracing::debug!("[Store {}] undo {:?}", self.id(), entry.title);
        let message = entry.title.as_ref().map(|title| format!("Undo {}", title));
        if let Err(err) = self.perform(entry.undo, message) {
            self.inner.state.borrow_mut().history.revert_undo();
            return Err(err);
        }
        Ok(true)
    }

    /// Redo the most recently undone entry. `Ok(false)` when there is
    /// nothing to redo.
    pub fn redo(&self) -> Result<bool, StoreError> {
        self.flush_deferred();
        let entry = {
            let mut state = self.inner.state.borrow_mut();
            let Some(entry) = state.history.redo() else {
                return Ok(false);
            };
            state.performing_undo_redo = true;
            entry
        };

        tracing::debug!("[Store {}] redo {:?}", self.id(), entry.title);
        let message = entry.title.as_ref().map(|title| format!("Redo {}", title));
        if let Err(err) = self.perform(entry.redo, message) {
            self.inner.state.borrow_mut().history.revert_redo();
            return Err(err);
        }
        Ok(true)
    }

    fn perform(&self, action: UndoAction, message: Option<String>) -> Result<(), StoreError> {
        match action {
            UndoAction::Patches(patches) => {
                let patcher = self.inner.patcher.clone();
                let mutator: Mutator = Box::new(move |draft: &mut Draft| -> Result<(), DocumentError> {
                    for patch in &patches {
                        patcher.apply(draft, patch)?;
                    }
                    Ok(())
                });
                self.make_change(
                    mutator,
                    ChangeOptions {
                        message,
                        ..ChangeOptions::default()
                    },
                )?;
            }
            UndoAction::Callback(callback) => {
                callback();
                self.inner.state.borrow_mut().performing_undo_redo = false;
            }
        }
        Ok(())
    }

    /// Push an entry that does not come from a commit of this store
    pub fn push_undo_redo(&self, entry: UndoRedo) {
        self.flush_deferred();
        self.inner.state.borrow_mut().history.record(entry);
    }

    pub fn can_undo(&self) -> bool {
        self.flush_deferred();
        self.inner.state.borrow().history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.flush_deferred();
        self.inner.state.borrow().history.can_redo()
    }

    pub fn undo_levels(&self) -> usize {
        self.flush_deferred();
        self.inner.state.borrow().history.undo_levels()
    }

    pub fn redo_levels(&self) -> usize {
        self.flush_deferred();
        self.inner.state.borrow().history.redo_levels()
    }

    pub fn undo_title(&self) -> Option<String> {
        self.flush_deferred();
        self.inner
            .state
            .borrow()
            .history
            .undo_description()
            .map(str::to_string)
    }

    pub fn redo_title(&self) -> Option<String> {
        self.flush_deferred();
        self.inner
            .state
            .borrow()
            .history
            .redo_description()
            .map(str::to_string)
    }

    pub fn clear_history(&self) {
        self.flush_deferred();
        self.inner.state.borrow_mut().history.clear();
    }

    // ---------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------

    pub fn start_transaction(&self) {
        self.inner.state.borrow_mut().transaction.start();
    }

    pub fn is_in_transaction(&self) -> bool {
        self.inner.state.borrow().transaction.is_active()
    }

    /// Commit everything queued since `start_transaction` as one change
    pub fn end_transaction(&self, message: Option<String>) -> Result<Doc, StoreError> {
        let queued = self.inner.state.borrow_mut().transaction.finish();
        if queued.is_empty() {
            return self.held_doc();
        }

        tracing::debug!("[Store {}] committing {} queued change(s)", self.id(), queued.len());
        self.change_with(
            move |draft: &mut Draft| {
                for mutator in queued {
                    mutator(draft)?;
                }
                Ok(())
            },
            ChangeOptions {
                message,
                ..ChangeOptions::default()
            },
        )
    }

    /// Run `callback` with changes queued, then commit them as one change.
    /// A message returned by the callback is used when `message` is `None`.
    /// If the callback fails, everything it queued is discarded.
    pub fn transaction<F>(&self, callback: F, message: Option<String>) -> Result<Doc, StoreError>
    where
        F: FnOnce() -> Result<Option<String>, StoreError>,
    {
        self.start_transaction();
        match callback() {
            Ok(returned) => self.end_transaction(message.or(returned)),
            Err(err) => {
                let dropped = self.inner.state.borrow_mut().transaction.discard();
                tracing::debug!("[Store {}] transaction failed, discarded {} change(s)", self.id(), dropped);
                Err(err)
            }
        }
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("ready", &self.is_ready())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
