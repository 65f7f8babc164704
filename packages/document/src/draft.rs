//! Mutable view handed to mutator closures during a commit.
//!
//! Every edit goes through [`Draft::apply`], so the draft always holds the
//! exact forward patch list that turns the "before" snapshot into the
//! draft's current content.

use crate::patch::{apply_patch, format_path, get_path};
use crate::{DocumentError, Patch, Path, Prop};
use serde_json::Value;

#[derive(Debug)]
pub struct Draft {
    root: Value,
    patches: Vec<Patch>,
}

impl Draft {
    pub(crate) fn new(root: Value) -> Self {
        Self {
            root,
            patches: Vec::new(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.root
    }

    pub fn get(&self, path: &[Prop]) -> Option<&Value> {
        get_path(&self.root, path)
    }

    /// Patches recorded so far, in application order
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Apply a raw patch and record it
    pub fn apply(&mut self, patch: Patch) -> Result<(), DocumentError> {
        apply_patch(&mut self.root, &patch)?;
        self.patches.push(patch);
        Ok(())
    }

    /// Assign `value` to an object key or an existing list slot
    pub fn put(&mut self, path: Path, value: impl Into<Value>) -> Result<(), DocumentError> {
        self.apply(Patch::Put {
            path,
            value: value.into(),
        })
    }

    /// Insert `values` into the list at `list` before `index`
    pub fn insert(
        &mut self,
        list: Path,
        index: usize,
        values: Vec<Value>,
    ) -> Result<(), DocumentError> {
        if values.is_empty() {
            return Ok(());
        }
        self.apply(Patch::Insert {
            path: child(list, index),
            values,
        })
    }

    /// Append one value to the list at `list`
    pub fn push(&mut self, list: Path, value: impl Into<Value>) -> Result<(), DocumentError> {
        let len = self.list_len(&list)?;
        self.insert(list, len, vec![value.into()])
    }

    /// Remove an object key or a single list element
    pub fn delete(&mut self, path: Path) -> Result<(), DocumentError> {
        self.apply(Patch::Del { path, length: 1 })
    }

    /// Remove `length` list elements or characters starting at `index`
    pub fn delete_range(
        &mut self,
        target: Path,
        index: usize,
        length: usize,
    ) -> Result<(), DocumentError> {
        if length == 0 {
            return Ok(());
        }
        self.apply(Patch::Del {
            path: child(target, index),
            length,
        })
    }

    /// Replace `delete` characters at `index` of the text at `text` with `insert`
    pub fn splice_text(
        &mut self,
        text: Path,
        index: usize,
        delete: usize,
        insert: &str,
    ) -> Result<(), DocumentError> {
        if !matches!(self.get(&text), Some(Value::String(_))) {
            return Err(DocumentError::TypeMismatch {
                path: format_path(&text),
                expected: "text",
            });
        }

        self.delete_range(text.clone(), index, delete)?;
        if !insert.is_empty() {
            self.apply(Patch::Splice {
                path: child(text, index),
                value: insert.to_string(),
            })?;
        }
        Ok(())
    }

    /// Add `by` to the integer counter at `path`
    pub fn increment(&mut self, path: Path, by: i64) -> Result<(), DocumentError> {
        self.apply(Patch::Inc { path, value: by })
    }

    /// Move one list element from `from` to `to` (index in the list after removal)
    pub fn move_item(&mut self, list: Path, from: usize, to: usize) -> Result<(), DocumentError> {
        let item = self
            .get(&child(list.clone(), from))
            .cloned()
            .ok_or_else(|| DocumentError::PathNotFound(format_path(&child(list.clone(), from))))?;

        self.delete_range(list.clone(), from, 1)?;
        self.insert(list, to, vec![item])
    }

    pub(crate) fn into_parts(self) -> (Value, Vec<Patch>) {
        (self.root, self.patches)
    }

    fn list_len(&self, list: &[Prop]) -> Result<usize, DocumentError> {
        match self.get(list) {
            Some(Value::Array(items)) => Ok(items.len()),
            Some(_) => Err(DocumentError::TypeMismatch {
                path: format_path(list),
                expected: "list",
            }),
            None => Err(DocumentError::PathNotFound(format_path(list))),
        }
    }
}

fn child(mut path: Path, index: usize) -> Path {
    path.push(Prop::Index(index));
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use serde_json::json;

    #[test]
    fn test_draft_records_patches_in_order() {
        let mut draft = Draft::new(json!({ "ids": [], "entities": {} }));

        draft.push(path!["ids"], "id-1").unwrap();
        draft
            .put(path!["entities", "id-1"], json!({ "id": "id-1", "name": "Alex" }))
            .unwrap();

        assert_eq!(draft.patches().len(), 2);
        assert_eq!(draft.patches()[0].action(), "insert");
        assert_eq!(draft.patches()[1].action(), "put");
        assert_eq!(draft.value()["ids"], json!(["id-1"]));
    }

    #[test]
    fn test_failed_edit_records_nothing() {
        let mut draft = Draft::new(json!({ "count": "not a number" }));

        assert!(draft.increment(path!["count"], 1).is_err());
        assert!(draft.patches().is_empty());
    }

    #[test]
    fn test_move_item_reorders_list() {
        let mut draft = Draft::new(json!({ "hello": ["hello", "there", "world"] }));
        draft.move_item(path!["hello"], 1, 2).unwrap();

        assert_eq!(draft.value()["hello"], json!(["hello", "world", "there"]));
    }

    #[test]
    fn test_splice_text_requires_text() {
        let mut draft = Draft::new(json!({ "hello": 1 }));
        let result = draft.splice_text(path!["hello"], 0, 0, "x");

        assert!(matches!(result, Err(DocumentError::TypeMismatch { .. })));
    }
}
