//! # Patch Inversion
//!
//! Computes the patches that undo a commit, given the snapshot the commit
//! started from.
//!
//! ```text
//! before ──patches──▶ after
//! before ◀──invert(before, patches)── after
//! ```
//!
//! Each forward patch is inverted against the tree *as it was right before
//! that patch*, so the walk replays the forward patches over a scratch
//! copy of `before`. The resulting list is reversed: the last forward edit
//! is undone first.

use crate::patch::{apply_patch, format_path, get_path, range_end, split_last};
use crate::{Doc, DocumentError, Draft, Patch, Prop};
use serde_json::Value;

/// Applies and inverts patches on behalf of the undo history
pub trait PatchInverter {
    /// Re-apply one recorded patch inside a commit
    fn apply(&self, draft: &mut Draft, patch: &Patch) -> Result<(), DocumentError>;

    /// Patches that turn the post-commit snapshot back into `before`
    fn invert(&self, before: &Doc, patches: &[Patch]) -> Result<Vec<Patch>, DocumentError>;
}

/// [`PatchInverter`] for the JSON patch vocabulary
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPatcher;

impl JsonPatcher {
    pub fn new() -> Self {
        Self
    }
}

impl PatchInverter for JsonPatcher {
    fn apply(&self, draft: &mut Draft, patch: &Patch) -> Result<(), DocumentError> {
        draft.apply(patch.clone())
    }

    fn invert(&self, before: &Doc, patches: &[Patch]) -> Result<Vec<Patch>, DocumentError> {
        let mut scratch = before.value().clone();
        let mut inverse = Vec::with_capacity(patches.len());

        for patch in patches {
            inverse.push(inverse_of(&scratch, patch)?);
            apply_patch(&mut scratch, patch)?;
        }

        inverse.reverse();
        Ok(inverse)
    }
}

fn inverse_of(tree: &Value, patch: &Patch) -> Result<Patch, DocumentError> {
    let path = patch.path().to_vec();

    match patch {
        Patch::Put { .. } => Ok(match get_path(tree, &path) {
            Some(old) => Patch::Put {
                path,
                value: old.clone(),
            },
            None => Patch::Del { path, length: 1 },
        }),

        Patch::Insert { values, .. } => Ok(Patch::Del {
            path,
            length: values.len(),
        }),

        Patch::Del { length, .. } => {
            let (parent_path, last) = split_last(&path)?;
            let parent = get_path(tree, parent_path)
                .ok_or_else(|| DocumentError::PathNotFound(format_path(parent_path)))?;

            match (parent, last) {
                (Value::Object(map), Prop::Key(key)) => {
                    let old = map
                        .get(key)
                        .ok_or_else(|| DocumentError::PathNotFound(format_path(&path)))?;
                    Ok(Patch::Put {
                        path: path.clone(),
                        value: old.clone(),
                    })
                }
                (Value::Array(items), Prop::Index(index)) => {
                    let end = range_end(&path, *index, *length, items.len())?;
                    Ok(Patch::Insert {
                        path: path.clone(),
                        values: items[*index..end].to_vec(),
                    })
                }
                (Value::String(text), Prop::Index(index)) => {
                    range_end(&path, *index, *length, text.chars().count())?;
                    let removed: String = text.chars().skip(*index).take(*length).collect();
                    Ok(Patch::Splice {
                        path: path.clone(),
                        value: removed,
                    })
                }
                _ => Err(DocumentError::InvalidPatch(format!(
                    "cannot invert del at {}",
                    format_path(&path)
                ))),
            }
        }

        Patch::Splice { value, .. } => Ok(Patch::Del {
            path,
            length: value.chars().count(),
        }),

        Patch::Inc { value, .. } => {
            let value = value.checked_neg().ok_or_else(|| {
                DocumentError::InvalidPatch(format!("cannot invert inc at {}", format_path(&path)))
            })?;
            Ok(Patch::Inc { path, value })
        }
    }
}
