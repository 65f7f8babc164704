//! Ordered registry of snapshot observers.

use crate::store::{PatchData, WeakStore};
use docstore_document::Doc;
use std::rc::Rc;

pub type SubscribeCallback = Rc<dyn Fn(&Doc, &PatchData)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    next_id: u64,
    entries: Vec<(SubscriberId, SubscribeCallback)>,
}

impl SubscriberRegistry {
    pub(crate) fn add(&mut self, callback: SubscribeCallback) -> SubscriberId {
        self.next_id += 1;
        let id = SubscriberId(self.next_id);
        self.entries.push((id, callback));
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Copy of the callbacks, so they can run without a borrow held
    pub(crate) fn snapshot(&self) -> Vec<SubscribeCallback> {
        self.entries
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect()
    }
}

/// Returned by [`Store::subscribe`](crate::Store::subscribe). Dropping it
/// keeps the subscription alive; call [`Subscription::unsubscribe`] to end it.
#[must_use = "the subscription stays registered until `unsubscribe` is called"]
pub struct Subscription {
    store: WeakStore,
    id: SubscriberId,
}

impl Subscription {
    pub(crate) fn new(store: WeakStore, id: SubscriberId) -> Self {
        Self { store, id }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the callback; tears down backing listeners when it was the last
    pub fn unsubscribe(self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id);
        }
    }
}
