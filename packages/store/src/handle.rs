//! # Document Handles
//!
//! A handle is a document that lives outside the store: it resolves
//! asynchronously and may change without going through the store (remote
//! peers, sync adapters, other stores sharing the handle).
//!
//! ## Events
//!
//! ```text
//! handle.change(mutator, tag) ──▶ PatchEvent { origin: Local(tag) }
//! handle.merge(remote)        ──▶ PatchEvent { origin: Remote, source: Merge }
//! (every event)               ──▶ ChangeEvent { doc }
//! ```
//!
//! The [`CommitTag`] attached to a local commit comes back unchanged on
//! the matching [`PatchEvent`], which is how a store tells its own commits
//! apart from everything else.

use docstore_document::{
    ChangeOptions, Doc, DocumentEngine, DocumentError, JsonEngine, Mutator, Patch, PatchInfo,
    PatchSource,
};
use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandleError {
    #[error("Document unavailable: {0}")]
    Unavailable(String),

    #[error("Document resolution failed: {0}")]
    Resolution(String),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Identifies one commit issued by one store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitTag {
    pub store: Uuid,
    pub seq: u64,
}

/// Who caused a patch event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOrigin {
    /// A commit issued through [`DocumentHandle::change`] with this tag
    Local(CommitTag),
    /// Anything else
    Remote,
}

#[derive(Debug, Clone, Default)]
pub struct HandleChangeOptions {
    pub message: Option<String>,
    pub time: Option<i64>,
    pub tag: Option<CommitTag>,
}

/// Outcome of [`DocumentHandle::change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    /// Committed, events already emitted
    Applied,
    /// The mutator produced no patch; no event will follow
    Unchanged,
    /// Accepted; events will be emitted later
    Pending,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub doc: Doc,
}

#[derive(Debug, Clone)]
pub struct PatchEvent {
    pub doc: Doc,
    pub patches: Vec<Patch>,
    pub before: Doc,
    pub after: Doc,
    pub source: PatchSource,
    pub origin: PatchOrigin,
}

pub type ChangeListener = Box<dyn Fn(&ChangeEvent)>;
pub type PatchListener = Box<dyn Fn(&PatchEvent)>;

pub trait DocumentHandle {
    fn document_id(&self) -> &str;

    /// Resolves with the document once it is available
    fn resolve(&self) -> LocalBoxFuture<'static, Result<Doc, HandleError>>;

    /// Current snapshot, if the document is already available
    fn try_sync_snapshot(&self) -> Option<Doc>;

    fn change(
        &self,
        mutator: Mutator,
        options: HandleChangeOptions,
    ) -> Result<CommitStatus, HandleError>;

    fn on_change(&self, listener: ChangeListener) -> ListenerId;

    fn on_patch(&self, listener: PatchListener) -> ListenerId;

    /// Remove a listener registered with either `on_*` method
    fn off(&self, id: ListenerId) -> bool;
}

enum Resolution {
    Loading(Vec<oneshot::Sender<Result<Doc, HandleError>>>),
    Loaded,
    Failed(String),
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    change: Vec<(ListenerId, Rc<dyn Fn(&ChangeEvent)>)>,
    patch: Vec<(ListenerId, Rc<dyn Fn(&PatchEvent)>)>,
}

impl Listeners {
    fn next_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }
}

/// In-process [`DocumentHandle`] backed by [`JsonEngine`]
pub struct MemoryHandle {
    id: String,
    engine: JsonEngine,
    doc: RefCell<Doc>,
    resolution: RefCell<Resolution>,
    listeners: RefCell<Listeners>,
    commits: Cell<u64>,
}

impl MemoryHandle {
    /// Handle whose document is available immediately
    pub fn new(doc: Doc) -> Rc<Self> {
        Self::with_id(Uuid::new_v4().to_string(), doc)
    }

    pub fn with_id(id: impl Into<String>, doc: Doc) -> Rc<Self> {
        Rc::new(Self::build(id.into(), doc, Resolution::Loaded))
    }

    /// Handle that stays unavailable until [`MemoryHandle::complete_resolution`]
    pub fn deferred(doc: Doc) -> Rc<Self> {
        Rc::new(Self::build(
            Uuid::new_v4().to_string(),
            doc,
            Resolution::Loading(Vec::new()),
        ))
    }

    fn build(id: String, doc: Doc, resolution: Resolution) -> Self {
        Self {
            id,
            engine: JsonEngine::new(),
            doc: RefCell::new(doc),
            resolution: RefCell::new(resolution),
            listeners: RefCell::new(Listeners::default()),
            commits: Cell::new(0),
        }
    }

    /// Make the document available and wake pending `resolve()` calls
    pub fn complete_resolution(&self) {
        let previous = std::mem::replace(&mut *self.resolution.borrow_mut(), Resolution::Loaded);
        let waiters = match previous {
            Resolution::Loading(waiters) => waiters,
            other => {
                *self.resolution.borrow_mut() = other;
                return;
            }
        };

        tracing::debug!("[MemoryHandle {}] resolved", self.id);
        let doc = self.doc.borrow().clone();
        for waiter in waiters {
            let _ = waiter.send(Ok(doc.clone()));
        }
    }

    /// Fail pending and future `resolve()` calls
    pub fn fail_resolution(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let previous = std::mem::replace(
            &mut *self.resolution.borrow_mut(),
            Resolution::Failed(reason.clone()),
        );
        let waiters = match previous {
            Resolution::Loading(waiters) => waiters,
            other => {
                *self.resolution.borrow_mut() = other;
                return;
            }
        };

        tracing::debug!("[MemoryHandle {}] resolution failed: {}", self.id, reason);
        for waiter in waiters {
            let _ = waiter.send(Err(HandleError::Resolution(reason.clone())));
        }
    }

    /// Apply every change of `remote` this handle has not seen yet, as a
    /// remote peer's sync would
    pub fn merge(&self, remote: &Doc) -> Result<CommitStatus, HandleError> {
        self.ensure_loaded()?;
        let before = self.doc.borrow().clone();
        let (after, patches) = self.engine.merge(&before, remote)?;
        if patches.is_empty() && after.heads() == before.heads() {
            return Ok(CommitStatus::Unchanged);
        }

        *self.doc.borrow_mut() = after.clone();
        self.emit(PatchEvent {
            doc: after.clone(),
            patches,
            before,
            after,
            source: PatchSource::Merge,
            origin: PatchOrigin::Remote,
        });
        Ok(CommitStatus::Applied)
    }

    /// Current snapshot regardless of resolution state
    pub fn doc(&self) -> Doc {
        self.doc.borrow().clone()
    }

    pub fn patch_listener_count(&self) -> usize {
        self.listeners.borrow().patch.len()
    }

    pub fn change_listener_count(&self) -> usize {
        self.listeners.borrow().change.len()
    }

    /// Number of commits applied through this handle
    pub fn commit_count(&self) -> u64 {
        self.commits.get()
    }

    fn is_loaded(&self) -> bool {
        matches!(*self.resolution.borrow(), Resolution::Loaded)
    }

    fn ensure_loaded(&self) -> Result<(), HandleError> {
        match &*self.resolution.borrow() {
            Resolution::Loaded => Ok(()),
            Resolution::Failed(reason) => Err(HandleError::Resolution(reason.clone())),
            Resolution::Loading(_) => Err(HandleError::Unavailable(self.id.clone())),
        }
    }

    fn emit(&self, event: PatchEvent) {
        let (patch_listeners, change_listeners) = {
            let listeners = self.listeners.borrow();
            let patch: Vec<_> = listeners.patch.iter().map(|(_, l)| l.clone()).collect();
            let change: Vec<_> = listeners.change.iter().map(|(_, l)| l.clone()).collect();
            (patch, change)
        };

        tracing::trace!(
            "[MemoryHandle {}] emitting {} patch(es) to {} listener(s)",
            self.id,
            event.patches.len(),
            patch_listeners.len() + change_listeners.len()
        );

        for listener in patch_listeners {
            listener(&event);
        }

        let change = ChangeEvent { doc: event.doc };
        for listener in change_listeners {
            listener(&change);
        }
    }
}

impl DocumentHandle for MemoryHandle {
    fn document_id(&self) -> &str {
        &self.id
    }

    fn resolve(&self) -> LocalBoxFuture<'static, Result<Doc, HandleError>> {
        let receiver = match &mut *self.resolution.borrow_mut() {
            Resolution::Loaded => {
                return future::ready(Ok(self.doc.borrow().clone())).boxed_local()
            }
            Resolution::Failed(reason) => {
                return future::ready(Err(HandleError::Resolution(reason.clone()))).boxed_local()
            }
            Resolution::Loading(waiters) => {
                let (sender, receiver) = oneshot::channel();
                waiters.push(sender);
                receiver
            }
        };

        let id = self.id.clone();
        async move {
            receiver
                .await
                .map_err(|_| HandleError::Unavailable(id))?
        }
        .boxed_local()
    }

    fn try_sync_snapshot(&self) -> Option<Doc> {
        self.is_loaded().then(|| self.doc.borrow().clone())
    }

    fn change(
        &self,
        mutator: Mutator,
        options: HandleChangeOptions,
    ) -> Result<CommitStatus, HandleError> {
        self.ensure_loaded()?;

        let captured: Rc<RefCell<Vec<Patch>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = captured.clone();
        let change_options = ChangeOptions {
            message: options.message,
            time: options.time,
            patch_callback: Some(Box::new(move |patches: &[Patch], _: &PatchInfo| {
                sink.borrow_mut().extend_from_slice(patches);
            })),
        };

        let before = self.doc.borrow().clone();
        let after = self.engine.change(&before, change_options, mutator)?;
        if after.heads() == before.heads() {
            return Ok(CommitStatus::Unchanged);
        }

        *self.doc.borrow_mut() = after.clone();
        self.commits.set(self.commits.get() + 1);

        let patches = captured.take();
        self.emit(PatchEvent {
            doc: after.clone(),
            patches,
            before,
            after,
            source: PatchSource::Change,
            origin: options.tag.map(PatchOrigin::Local).unwrap_or(PatchOrigin::Remote),
        });
        Ok(CommitStatus::Applied)
    }

    fn on_change(&self, listener: ChangeListener) -> ListenerId {
        let mut listeners = self.listeners.borrow_mut();
        let id = listeners.next_id();
        listeners.change.push((id, Rc::from(listener)));
        id
    }

    fn on_patch(&self, listener: PatchListener) -> ListenerId {
        let mut listeners = self.listeners.borrow_mut();
        let id = listeners.next_id();
        listeners.patch.push((id, Rc::from(listener)));
        id
    }

    fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.change.len() + listeners.patch.len();
        listeners.change.retain(|(entry, _)| *entry != id);
        listeners.patch.retain(|(entry, _)| *entry != id);
        listeners.change.len() + listeners.patch.len() != before
    }
}
