//! # Document Engine
//!
//! The engine turns a snapshot plus a mutator into a new snapshot.
//!
//! ## Contract
//!
//! - `change` never mutates its input; a mutator that records no patch
//!   returns the input snapshot unchanged (same heads) and does not invoke
//!   the patch callback
//! - the patch callback fires at most once, synchronously, before `change`
//!   returns
//! - `heads` is the only identity check callers should rely on
//!
//! [`JsonEngine`] is the in-memory implementation used by the store. It
//! keeps full per-actor history and merges replicas by replaying unseen
//! changes in order; it performs no conflict resolution.

use crate::{Change, DecodedChange, Doc, DocumentError, Draft, Heads, Patch};
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Mutator closure run against a [`Draft`]
pub type Mutator = Box<dyn FnOnce(&mut Draft) -> Result<(), DocumentError>>;

/// One-shot observer of the patches produced by a single commit
pub type PatchCallback = Box<dyn FnOnce(&[Patch], &PatchInfo)>;

/// What produced a set of patches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchSource {
    /// A local mutator
    Change,
    /// Changes received from another replica
    Merge,
}

/// Snapshots on either side of a set of patches
#[derive(Debug, Clone)]
pub struct PatchInfo {
    pub before: Doc,
    pub after: Doc,
    pub source: PatchSource,
}

/// Options for a single commit
#[derive(Default)]
pub struct ChangeOptions {
    /// Commit message, decoded later as the change label
    pub message: Option<String>,

    /// Commit time in seconds; defaults to now
    pub time: Option<i64>,

    pub patch_callback: Option<PatchCallback>,
}

impl ChangeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_time(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_patch_callback(
        mut self,
        callback: impl FnOnce(&[Patch], &PatchInfo) + 'static,
    ) -> Self {
        self.patch_callback = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for ChangeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeOptions")
            .field("message", &self.message)
            .field("time", &self.time)
            .field("patch_callback", &self.patch_callback.is_some())
            .finish()
    }
}

/// Immutable-snapshot document primitives
pub trait DocumentEngine {
    /// Produce a new snapshot by running `mutator` against `doc`
    fn change(
        &self,
        doc: &Doc,
        options: ChangeOptions,
        mutator: Mutator,
    ) -> Result<Doc, DocumentError>;

    /// Version marker of `doc`
    fn heads(&self, doc: &Doc) -> Heads;

    /// Latest change authored by `doc`'s own actor
    fn last_local_change(&self, doc: &Doc) -> Option<Arc<Change>>;

    fn decode_change(&self, change: &Change) -> DecodedChange;

    /// Apply every change of `remote` that `local` has not seen.
    /// Returns the merged snapshot and the patches applied to `local`.
    fn merge(&self, local: &Doc, remote: &Doc) -> Result<(Doc, Vec<Patch>), DocumentError>;
}

/// In-memory JSON document engine
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEngine;

impl JsonEngine {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentEngine for JsonEngine {
    fn change(
        &self,
        doc: &Doc,
        options: ChangeOptions,
        mutator: Mutator,
    ) -> Result<Doc, DocumentError> {
        let ChangeOptions {
            message,
            time,
            patch_callback,
        } = options;

        let mut draft = Draft::new(doc.value().clone());
        mutator(&mut draft)?;
        let (root, patches) = draft.into_parts();

        if patches.is_empty() {
            tracing::trace!("[JsonEngine] mutator produced no patches");
            return Ok(doc.clone());
        }

        let change = Change::new(
            doc.actor(),
            doc.next_seq(),
            doc.heads().clone(),
            time.unwrap_or_else(|| Utc::now().timestamp()),
            message,
            patches.clone(),
        );
        let after = doc.append(root, change);

        tracing::debug!(
            "[JsonEngine] committed {} patch(es), heads={}",
            patches.len(),
            after.heads()
        );

        if let Some(callback) = patch_callback {
            let info = PatchInfo {
                before: doc.clone(),
                after: after.clone(),
                source: PatchSource::Change,
            };
            callback(&patches, &info);
        }

        Ok(after)
    }

    fn heads(&self, doc: &Doc) -> Heads {
        doc.heads().clone()
    }

    fn last_local_change(&self, doc: &Doc) -> Option<Arc<Change>> {
        let actor = doc.actor();
        doc.history()
            .iter()
            .rev()
            .find(|change| change.actor() == actor)
            .cloned()
    }

    fn decode_change(&self, change: &Change) -> DecodedChange {
        change.decode()
    }

    fn merge(&self, local: &Doc, remote: &Doc) -> Result<(Doc, Vec<Patch>), DocumentError> {
        let known: HashSet<_> = local.history().iter().map(|change| change.hash()).collect();

        let mut draft = Draft::new(local.value().clone());
        let mut unseen = Vec::new();
        for change in remote.history() {
            if known.contains(&change.hash()) {
                continue;
            }
            for op in change.ops() {
                if let Err(err) = draft.apply(op.clone()) {
                    tracing::warn!(
                        "[JsonEngine] skipping {} from change {}: {}",
                        op.action(),
                        change.hash(),
                        err
                    );
                }
            }
            unseen.push(change.clone());
        }

        if unseen.is_empty() {
            return Ok((local.clone(), Vec::new()));
        }

        tracing::debug!("[JsonEngine] merged {} change(s)", unseen.len());
        let (root, patches) = draft.into_parts();
        Ok((local.extend(root, unseen), patches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_change_produces_new_heads() {
        let engine = JsonEngine::new();
        let doc = Doc::from_value(json!({ "count": 0 })).unwrap();

        let next = engine
            .change(
                &doc,
                ChangeOptions::new(),
                Box::new(|d: &mut Draft| d.put(path!["count"], 1)),
            )
            .unwrap();

        assert_eq!(next.value(), &json!({ "count": 1 }));
        assert_ne!(engine.heads(&next), engine.heads(&doc));
        assert_eq!(doc.value(), &json!({ "count": 0 }));
    }

    #[test]
    fn test_noop_change_keeps_snapshot() {
        let engine = JsonEngine::new();
        let doc = Doc::from_value(json!({ "count": 0 })).unwrap();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();

        let next = engine
            .change(
                &doc,
                ChangeOptions::new().with_patch_callback(move |_, _| flag.set(true)),
                Box::new(|_: &mut Draft| Ok(())),
            )
            .unwrap();

        assert!(Doc::ptr_eq(&doc, &next));
        assert!(!fired.get());
    }

    #[test]
    fn test_failed_mutator_aborts_commit() {
        let engine = JsonEngine::new();
        let doc = Doc::from_value(json!({ "count": 0 })).unwrap();

        let result = engine.change(
            &doc,
            ChangeOptions::new(),
            Box::new(|d: &mut Draft| {
                d.put(path!["count"], 1)?;
                d.put(path!["missing", "key"], 2)
            }),
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_message_is_decoded_from_last_local_change() {
        let engine = JsonEngine::new();
        let doc = Doc::from_value(json!({ "count": 0 })).unwrap();
        let next = engine
            .change(
                &doc,
                ChangeOptions::new().with_message("Set count"),
                Box::new(|d: &mut Draft| d.put(path!["count"], 5)),
            )
            .unwrap();

        let last = engine.last_local_change(&next).unwrap();
        assert_eq!(engine.decode_change(&last).message.as_deref(), Some("Set count"));
    }
}
