use docstore::{
    path, ChangeListener, ChangeOptions, CommitStatus, Doc, DocumentEngine, DocumentHandle, Draft,
    HandleChangeOptions, HandleError, JsonEngine, ListenerId, ManualScheduler, MemoryHandle,
    Mutator, PatchData, PatchEvent, PatchListener, Store, StoreError, StoreOptions,
};
use futures::future::LocalBoxFuture;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

async fn run_local<F: Future<Output = ()>>(test: F) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    tokio::task::LocalSet::new().run_until(test).await
}

fn counter_doc() -> Doc {
    Doc::from_value(json!({ "count": 0 })).unwrap()
}

async fn ready_store(handle: &Rc<MemoryHandle>) -> (Store, ManualScheduler) {
    let scheduler = ManualScheduler::new();
    let store = Store::from_handle(
        handle.clone(),
        StoreOptions::new().with_scheduler(Rc::new(scheduler.clone())),
    );
    store.ready().await.unwrap();
    (store, scheduler)
}

/// Handle that accepts commits and emits their events only on `flush`,
/// optionally losing the commit tag on the way
struct QueuedHandle {
    inner: Rc<MemoryHandle>,
    queued: RefCell<Vec<(Mutator, HandleChangeOptions)>>,
    deferred: Cell<bool>,
    keep_tags: Cell<bool>,
}

impl QueuedHandle {
    fn new(doc: Doc) -> Rc<Self> {
        Rc::new(Self {
            inner: MemoryHandle::new(doc),
            queued: RefCell::new(Vec::new()),
            deferred: Cell::new(true),
            keep_tags: Cell::new(true),
        })
    }

    fn forward(
        &self,
        mutator: Mutator,
        mut options: HandleChangeOptions,
    ) -> Result<CommitStatus, HandleError> {
        if !self.keep_tags.get() {
            options.tag = None;
        }
        self.inner.change(mutator, options)
    }

    fn flush(&self) -> usize {
        let queued = std::mem::take(&mut *self.queued.borrow_mut());
        let count = queued.len();
        for (mutator, options) in queued {
            self.forward(mutator, options).unwrap();
        }
        count
    }
}

impl DocumentHandle for QueuedHandle {
    fn document_id(&self) -> &str {
        self.inner.document_id()
    }

    fn resolve(&self) -> LocalBoxFuture<'static, Result<Doc, HandleError>> {
        self.inner.resolve()
    }

    fn try_sync_snapshot(&self) -> Option<Doc> {
        self.inner.try_sync_snapshot()
    }

    fn change(
        &self,
        mutator: Mutator,
        options: HandleChangeOptions,
    ) -> Result<CommitStatus, HandleError> {
        if self.deferred.get() {
            self.queued.borrow_mut().push((mutator, options));
            Ok(CommitStatus::Pending)
        } else {
            self.forward(mutator, options)
        }
    }

    fn on_change(&self, listener: ChangeListener) -> ListenerId {
        self.inner.on_change(listener)
    }

    fn on_patch(&self, listener: PatchListener) -> ListenerId {
        self.inner.on_patch(listener)
    }

    fn off(&self, id: ListenerId) -> bool {
        self.inner.off(id)
    }
}

async fn queued_store(handle: &Rc<QueuedHandle>) -> (Store, ManualScheduler) {
    let scheduler = ManualScheduler::new();
    let store = Store::from_handle(
        handle.clone(),
        StoreOptions::new().with_scheduler(Rc::new(scheduler.clone())),
    );
    store.ready().await.unwrap();
    (store, scheduler)
}

fn counting_put(store: &Store, value: i64, calls: &Rc<Cell<u32>>) {
    let counter = calls.clone();
    store
        .change_with(
            move |d: &mut Draft| d.put(path!["count"], value),
            ChangeOptions::new().with_patch_callback(move |_, _| counter.set(counter.get() + 1)),
        )
        .unwrap();
}

fn remote_edit(handle: &MemoryHandle, value: i64) {
    let status = handle
        .change(
            Box::new(move |d: &mut Draft| d.put(path!["count"], value)),
            HandleChangeOptions::default(),
        )
        .unwrap();
    assert_eq!(status, CommitStatus::Applied);
}

#[tokio::test]
async fn test_commit_undo_redo_through_handle() {
    run_local(async {
        let handle = MemoryHandle::new(counter_doc());
        let (store, scheduler) = ready_store(&handle).await;
        assert_eq!(store.id(), handle.document_id());

        store.change(|d| d.increment(path!["count"], 1)).unwrap();
        assert_eq!(handle.doc().value(), &json!({ "count": 1 }));
        assert_eq!(store.doc().unwrap().value(), &json!({ "count": 1 }));

        assert_eq!(scheduler.run_pending(), 1);
        store.undo().unwrap();
        assert_eq!(handle.doc().value(), &json!({ "count": 0 }));

        store.redo().unwrap();
        assert_eq!(handle.doc().value(), &json!({ "count": 1 }));
        assert_eq!(scheduler.run_pending(), 0);
        assert_eq!(handle.commit_count(), 3);
    })
    .await;
}

#[tokio::test]
async fn test_remote_edit_notifies_without_undo() {
    run_local(async {
        let handle = MemoryHandle::new(counter_doc());
        let (store, scheduler) = ready_store(&handle).await;

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = store.subscribe_with(
            move |doc: &Doc, _: &PatchData| sink.borrow_mut().push(doc.value().clone()),
            false,
        );

        remote_edit(&handle, 5);

        assert_eq!(*seen.borrow(), vec![json!({ "count": 5 })]);
        assert_eq!(store.doc().unwrap().value(), &json!({ "count": 5 }));
        assert_eq!(scheduler.run_pending(), 0);
        assert!(!store.can_undo());
    })
    .await;
}

#[tokio::test]
async fn test_merged_changes_from_another_replica() {
    run_local(async {
        let base = counter_doc();
        let handle = MemoryHandle::new(base.clone());
        let (store, scheduler) = ready_store(&handle).await;
        let _subscription = store.subscribe(|_, _| {});

        let engine = JsonEngine::new();
        let replica = engine
            .change(
                &base.fork(),
                ChangeOptions::new(),
                Box::new(|d: &mut Draft| d.put(path!["remote"], true)),
            )
            .unwrap();

        handle.merge(&replica).unwrap();

        assert_eq!(
            store.doc().unwrap().value(),
            &json!({ "count": 0, "remote": true })
        );
        assert_eq!(scheduler.run_pending(), 0);
        assert!(!store.can_undo());
    })
    .await;
}

#[tokio::test]
async fn test_listener_setup_and_teardown() {
    run_local(async {
        let handle = MemoryHandle::new(counter_doc());
        let (store, _) = ready_store(&handle).await;
        assert_eq!(handle.patch_listener_count(), 0);

        let first = store.subscribe(|_, _| {});
        let second = store.subscribe(|_, _| {});
        assert_eq!(handle.patch_listener_count(), 1);

        first.unsubscribe();
        assert_eq!(handle.patch_listener_count(), 1);
        second.unsubscribe();
        assert_eq!(handle.patch_listener_count(), 0);

        let third = store.subscribe(|_, _| {});
        assert_eq!(handle.patch_listener_count(), 1);
        third.unsubscribe();
        assert_eq!(handle.patch_listener_count(), 0);
    })
    .await;
}

#[tokio::test]
async fn test_patch_callback_fires_once_with_other_listeners() {
    run_local(async {
        let handle = MemoryHandle::new(counter_doc());
        let (store, _) = ready_store(&handle).await;

        let other_events = Rc::new(Cell::new(0));
        let counter = other_events.clone();
        handle.on_patch(Box::new(move |_: &PatchEvent| counter.set(counter.get() + 1)));
        let _subscription = store.subscribe(|_, _| {});

        let calls = Rc::new(Cell::new(0));
        let after = Rc::new(RefCell::new(None));
        let (call_counter, after_sink) = (calls.clone(), after.clone());

        let held = store
            .change_with(
                |d: &mut Draft| d.put(path!["count"], 9),
                ChangeOptions::new().with_patch_callback(move |_, info| {
                    call_counter.set(call_counter.get() + 1);
                    *after_sink.borrow_mut() = Some(info.after.clone());
                }),
            )
            .unwrap();

        // An unrelated commit must not trigger the callback again
        remote_edit(&handle, 10);

        assert_eq!(calls.get(), 1);
        assert_eq!(other_events.get(), 2);
        let after = after.borrow().clone().unwrap();
        assert_eq!(after.heads(), held.heads());
        assert_eq!(after.value(), &json!({ "count": 9 }));
    })
    .await;
}

#[tokio::test]
async fn test_doc_refreshes_without_subscribers() {
    run_local(async {
        let handle = MemoryHandle::new(counter_doc());
        let (store, _) = ready_store(&handle).await;

        remote_edit(&handle, 3);

        assert_eq!(store.doc().unwrap().value(), &json!({ "count": 3 }));
    })
    .await;
}

#[tokio::test]
async fn test_subscribe_picks_up_missed_edits() {
    run_local(async {
        let handle = MemoryHandle::new(counter_doc());
        let (store, _) = ready_store(&handle).await;
        remote_edit(&handle, 4);

        let seen = Rc::new(RefCell::new(Vec::<Value>::new()));
        let sink = seen.clone();
        let _subscription =
            store.subscribe(move |doc, _| sink.borrow_mut().push(doc.value().clone()));

        assert_eq!(seen.borrow().last(), Some(&json!({ "count": 4 })));
    })
    .await;
}

#[tokio::test]
async fn test_deferred_handle_becomes_ready_on_resolution() {
    run_local(async {
        let handle = MemoryHandle::deferred(counter_doc());
        let store = Store::from_handle(handle.clone(), StoreOptions::new());

        tokio::task::yield_now().await;
        assert!(!store.is_ready());
        assert!(matches!(
            store.change(|d| d.put(path!["count"], 1)),
            Err(StoreError::NotReady)
        ));

        handle.complete_resolution();
        store.ready().await.unwrap();

        assert_eq!(store.doc().unwrap().value(), &json!({ "count": 0 }));
        // The readiness listener is gone once ready
        assert_eq!(handle.change_listener_count(), 0);
    })
    .await;
}

#[tokio::test]
async fn test_first_change_event_makes_store_ready() {
    run_local(async {
        let handle = MemoryHandle::new(counter_doc());
        let store = Store::from_handle(handle.clone(), StoreOptions::new());
        assert!(!store.is_ready());

        // Fires before the resolve task has had a chance to run
        remote_edit(&handle, 2);

        assert!(store.is_ready());
        assert_eq!(store.doc().unwrap().value(), &json!({ "count": 2 }));
        assert_eq!(handle.change_listener_count(), 0);
        store.ready().await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn test_failed_resolution_fails_ready() {
    run_local(async {
        let handle = MemoryHandle::deferred(counter_doc());
        let store = Store::from_handle(handle.clone(), StoreOptions::new());

        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        store.on_ready(move || flag.set(true));

        handle.fail_resolution("peer unreachable");

        let result = store.ready().await;
        assert!(matches!(result, Err(StoreError::Resolution(reason)) if reason.contains("peer unreachable")));
        assert!(!store.is_ready());
        assert!(!ran.get());
    })
    .await;
}

#[tokio::test]
async fn test_two_stores_share_one_handle() {
    run_local(async {
        let handle = MemoryHandle::new(counter_doc());
        let (first, first_scheduler) = ready_store(&handle).await;
        let (second, second_scheduler) = ready_store(&handle).await;

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = second.subscribe_with(
            move |doc: &Doc, _: &PatchData| sink.borrow_mut().push(doc.value().clone()),
            false,
        );

        first.change(|d| d.put(path!["count"], 1)).unwrap();

        assert_eq!(*seen.borrow(), vec![json!({ "count": 1 })]);
        assert_eq!(first_scheduler.run_pending(), 1);
        // Edits by another store are remote for this one
        assert_eq!(second_scheduler.run_pending(), 0);
        assert!(first.can_undo());
        assert!(!second.can_undo());
    })
    .await;
}

#[tokio::test]
async fn test_handle_commit_failure_is_reported() {
    run_local(async {
        let handle = MemoryHandle::new(counter_doc());
        let (store, _) = ready_store(&handle).await;

        let result = store.change(|d| d.increment(path!["missing"], 1));

        assert!(matches!(result, Err(StoreError::Document(_))));
        assert_eq!(handle.patch_listener_count(), 0);
        assert_eq!(store.doc().unwrap().value(), &json!({ "count": 0 }));
    })
    .await;
}

#[tokio::test]
async fn test_pending_commit_waits_for_its_event() {
    run_local(async {
        let handle = QueuedHandle::new(counter_doc());
        let (store, scheduler) = queued_store(&handle).await;
        let calls = Rc::new(Cell::new(0));

        counting_put(&store, 7, &calls);

        // Nothing subscribed, so only the transient listener is attached
        assert_eq!(handle.inner.patch_listener_count(), 1);
        assert_eq!(calls.get(), 0);
        assert_eq!(scheduler.run_pending(), 0);

        assert_eq!(handle.flush(), 1);

        assert_eq!(calls.get(), 1);
        assert_eq!(handle.inner.patch_listener_count(), 0);
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(store.undo_levels(), 1);
        assert_eq!(store.doc().unwrap().value(), &json!({ "count": 7 }));

        remote_edit(&handle.inner, 8);
        assert_eq!(calls.get(), 1);
        assert_eq!(scheduler.run_pending(), 0);
    })
    .await;
}

#[tokio::test]
async fn test_untagged_events_do_not_strand_pending_commits() {
    run_local(async {
        let handle = QueuedHandle::new(counter_doc());
        let (store, scheduler) = queued_store(&handle).await;
        let first_calls = Rc::new(Cell::new(0));
        let second_calls = Rc::new(Cell::new(0));

        handle.keep_tags.set(false);
        counting_put(&store, 1, &first_calls);
        handle.flush();

        // Seen as remote; the commit is still waiting
        assert_eq!(handle.inner.patch_listener_count(), 1);
        assert_eq!(store.doc().unwrap().value(), &json!({ "count": 1 }));

        handle.keep_tags.set(true);
        counting_put(&store, 2, &second_calls);
        handle.flush();

        assert_eq!(first_calls.get(), 0);
        assert_eq!(second_calls.get(), 1);
        assert_eq!(handle.inner.patch_listener_count(), 0);
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(store.undo_levels(), 1);
    })
    .await;
}

#[tokio::test]
async fn test_applied_commit_without_tagged_event_is_released() {
    run_local(async {
        let handle = QueuedHandle::new(counter_doc());
        let (store, scheduler) = queued_store(&handle).await;
        let calls = Rc::new(Cell::new(0));

        handle.deferred.set(false);
        handle.keep_tags.set(false);
        counting_put(&store, 3, &calls);

        assert_eq!(handle.inner.patch_listener_count(), 0);
        assert_eq!(calls.get(), 0);
        assert_eq!(scheduler.run_pending(), 0);
        assert_eq!(store.doc().unwrap().value(), &json!({ "count": 3 }));
    })
    .await;
}
