//! Queue of mutators collected between `start_transaction` and
//! `end_transaction`.

use docstore_document::Mutator;

#[derive(Default)]
pub(crate) struct PendingTransaction {
    active: bool,
    queued: Vec<Mutator>,
}

impl PendingTransaction {
    pub(crate) fn start(&mut self) {
        self.active = true;
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn enqueue(&mut self, mutator: Mutator) {
        self.queued.push(mutator);
    }

    /// Stop queueing and hand back everything queued, in enqueue order
    pub(crate) fn finish(&mut self) -> Vec<Mutator> {
        self.active = false;
        std::mem::take(&mut self.queued)
    }

    /// Stop queueing and drop everything queued
    pub(crate) fn discard(&mut self) -> usize {
        self.finish().len()
    }
}
