//! # Document Snapshots
//!
//! A [`Doc`] is an immutable snapshot of a JSON document together with the
//! change history that produced it.
//!
//! Snapshots are cheap to clone (one `Arc`), and a commit never mutates an
//! existing snapshot: the engine builds a new one.
//!
//! ## Identity
//!
//! ```text
//! Doc ──┬── root     (serde_json::Value, object at the top level)
//!       ├── history  (Vec<Arc<Change>>, application order)
//!       ├── heads    (Heads, the version marker)
//!       └── actor    (ActorId of this replica)
//! ```
//!
//! Two snapshots describe the same version iff their heads are equal.
//! Never compare snapshots by content to decide whether something changed.

use crate::patch::get_path;
use crate::{ActorId, Change, DocumentError, Heads, Patch, Prop};
use chrono::Utc;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Immutable document snapshot
#[derive(Clone)]
pub struct Doc {
    inner: Arc<DocState>,
}

struct DocState {
    actor: ActorId,
    root: Value,
    history: Vec<Arc<Change>>,
    heads: Heads,
}

impl Doc {
    /// Empty document authored by a fresh actor
    pub fn new() -> Self {
        Self::with_actor(ActorId::random())
    }

    pub fn with_actor(actor: ActorId) -> Self {
        Self {
            inner: Arc::new(DocState {
                actor,
                root: Value::Object(Map::new()),
                history: Vec::new(),
                heads: Heads::new(),
            }),
        }
    }

    /// Create a document whose first change assigns every top-level key of
    /// `value`. The value must be a JSON object.
    pub fn from_value(value: Value) -> Result<Self, DocumentError> {
        let Value::Object(map) = value else {
            return Err(DocumentError::TypeMismatch {
                path: "/".to_string(),
                expected: "object",
            });
        };

        let doc = Doc::new();
        if map.is_empty() {
            return Ok(doc);
        }

        let ops = map
            .iter()
            .map(|(key, value)| Patch::Put {
                path: vec![Prop::Key(key.clone())],
                value: value.clone(),
            })
            .collect();
        let change = Change::new(
            doc.actor(),
            doc.next_seq(),
            Heads::new(),
            Utc::now().timestamp(),
            None,
            ops,
        );

        Ok(doc.append(Value::Object(map), change))
    }

    /// Current JSON content
    pub fn value(&self) -> &Value {
        &self.inner.root
    }

    pub fn get(&self, path: &[Prop]) -> Option<&Value> {
        get_path(&self.inner.root, path)
    }

    pub fn actor(&self) -> ActorId {
        self.inner.actor
    }

    pub fn heads(&self) -> &Heads {
        &self.inner.heads
    }

    /// All changes in application order
    pub fn history(&self) -> &[Arc<Change>] {
        &self.inner.history
    }

    /// Same version, different authoring actor (a second replica)
    pub fn fork(&self) -> Doc {
        Self {
            inner: Arc::new(DocState {
                actor: ActorId::random(),
                root: self.inner.root.clone(),
                history: self.inner.history.clone(),
                heads: self.inner.heads.clone(),
            }),
        }
    }

    /// Detached view that shows `value` but keeps this snapshot's history
    /// and heads. Used to render externally supplied states (e.g. an
    /// inspector jumping through time) without creating a commit.
    pub fn with_value(&self, value: Value) -> Doc {
        Self {
            inner: Arc::new(DocState {
                actor: self.inner.actor,
                root: value,
                history: self.inner.history.clone(),
                heads: self.inner.heads.clone(),
            }),
        }
    }

    /// True when both handles point at the same snapshot allocation
    pub fn ptr_eq(a: &Doc, b: &Doc) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub(crate) fn next_seq(&self) -> u64 {
        let authored = self
            .inner
            .history
            .iter()
            .filter(|change| change.actor() == self.inner.actor)
            .count();
        authored as u64 + 1
    }

    pub(crate) fn append(&self, root: Value, change: Change) -> Doc {
        self.extend(root, vec![Arc::new(change)])
    }

    pub(crate) fn extend(&self, root: Value, changes: Vec<Arc<Change>>) -> Doc {
        let mut history = self.inner.history.clone();
        let mut heads = self.inner.heads.clone();
        for change in changes {
            heads = heads.advance(&change);
            history.push(change);
        }

        Self {
            inner: Arc::new(DocState {
                actor: self.inner.actor,
                root,
                history,
                heads,
            }),
        }
    }
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Doc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Doc")
            .field("actor", &self.inner.actor)
            .field("heads", &self.inner.heads.to_string())
            .field("value", &self.inner.root)
            .finish()
    }
}
