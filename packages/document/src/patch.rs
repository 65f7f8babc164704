//! # Patches
//!
//! Atomic, path-addressed edits over a JSON document.
//!
//! ## Path addressing
//!
//! A path walks from the document root: `Prop::Key` steps into an object,
//! `Prop::Index` steps into a list or, for the last step only, addresses a
//! character offset inside a text value.
//!
//! ```text
//! /people/ids/0        → first element of the `ids` list
//! /hello/5             → character offset 5 of the `hello` text
//! ```
//!
//! ## Actions
//!
//! | Action   | Target of last prop       | Effect                          |
//! |----------|---------------------------|---------------------------------|
//! | `put`    | object key / list index   | assign value                    |
//! | `insert` | list index                | insert values before index      |
//! | `del`    | key / list index / char   | remove key, elements or chars   |
//! | `splice` | char offset               | insert text                     |
//! | `inc`    | counter                   | add to an integer               |

use crate::DocumentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One step of a path into the document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prop {
    Index(usize),
    Key(String),
}

impl From<&str> for Prop {
    fn from(key: &str) -> Self {
        Prop::Key(key.to_string())
    }
}

impl From<String> for Prop {
    fn from(key: String) -> Self {
        Prop::Key(key)
    }
}

impl From<usize> for Prop {
    fn from(index: usize) -> Self {
        Prop::Index(index)
    }
}

impl fmt::Display for Prop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prop::Index(index) => write!(f, "{}", index),
            Prop::Key(key) => write!(f, "{}", key),
        }
    }
}

/// Path from the document root
pub type Path = Vec<Prop>;

/// Build a [`Path`] from keys and indexes.
///
/// ```rust
/// use docstore_document::{path, Prop};
///
/// let p = path!["people", "ids", 0usize];
/// assert_eq!(p[2], Prop::Index(0));
/// ```
#[macro_export]
macro_rules! path {
    () => {
        ::std::vec::Vec::<$crate::Prop>::new()
    };
    ($($prop:expr),+ $(,)?) => {
        vec![$($crate::Prop::from($prop)),+]
    };
}

/// Render a path as `/a/0/b` for diagnostics
pub fn format_path(path: &[Prop]) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.iter().map(|prop| format!("/{}", prop)).collect()
}

/// A single atomic edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Patch {
    /// Assign a value to an object key or an existing list slot
    Put { path: Path, value: Value },

    /// Insert values into a list before the addressed index
    Insert { path: Path, values: Vec<Value> },

    /// Remove an object key, `length` list elements or `length` characters
    Del {
        path: Path,
        #[serde(default = "default_length")]
        length: usize,
    },

    /// Insert text at a character offset
    Splice { path: Path, value: String },

    /// Add to an integer counter
    Inc { path: Path, value: i64 },
}

fn default_length() -> usize {
    1
}

impl Patch {
    pub fn path(&self) -> &[Prop] {
        match self {
            Patch::Put { path, .. }
            | Patch::Insert { path, .. }
            | Patch::Del { path, .. }
            | Patch::Splice { path, .. }
            | Patch::Inc { path, .. } => path,
        }
    }

    /// Action name as it appears on the wire
    pub fn action(&self) -> &'static str {
        match self {
            Patch::Put { .. } => "put",
            Patch::Insert { .. } => "insert",
            Patch::Del { .. } => "del",
            Patch::Splice { .. } => "splice",
            Patch::Inc { .. } => "inc",
        }
    }
}

/// Look up the value at `path`
pub fn get_path<'a>(root: &'a Value, path: &[Prop]) -> Option<&'a Value> {
    let mut current = root;
    for prop in path {
        current = match (current, prop) {
            (Value::Object(map), Prop::Key(key)) => map.get(key)?,
            (Value::Array(items), Prop::Index(index)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

pub(crate) fn resolve_mut<'a>(
    root: &'a mut Value,
    path: &[Prop],
) -> Result<&'a mut Value, DocumentError> {
    let mut current = root;
    for (depth, prop) in path.iter().enumerate() {
        current = match (current, prop) {
            (Value::Object(map), Prop::Key(key)) => map.get_mut(key),
            (Value::Array(items), Prop::Index(index)) => items.get_mut(*index),
            _ => None,
        }
        .ok_or_else(|| DocumentError::PathNotFound(format_path(&path[..=depth])))?;
    }
    Ok(current)
}

pub(crate) fn split_last(path: &[Prop]) -> Result<(&[Prop], &Prop), DocumentError> {
    match path.split_last() {
        Some((last, parent)) => Ok((parent, last)),
        None => Err(DocumentError::EmptyPath),
    }
}

fn out_of_bounds(path: &[Prop], index: usize, len: usize) -> DocumentError {
    DocumentError::IndexOutOfBounds {
        path: format_path(path),
        index,
        len,
    }
}

/// End of the range `index..index + length`, checked against `len`
pub(crate) fn range_end(
    path: &[Prop],
    index: usize,
    length: usize,
    len: usize,
) -> Result<usize, DocumentError> {
    match index.checked_add(length) {
        Some(end) if end <= len => Ok(end),
        Some(end) => Err(out_of_bounds(path, end, len)),
        None => Err(out_of_bounds(path, index, len)),
    }
}

fn mismatch(path: &[Prop], expected: &'static str) -> DocumentError {
    DocumentError::TypeMismatch {
        path: format_path(path),
        expected,
    }
}

/// Apply one patch to a JSON tree in place
pub fn apply_patch(root: &mut Value, patch: &Patch) -> Result<(), DocumentError> {
    let path = patch.path();
    let (parent_path, last) = split_last(path)?;
    let parent = resolve_mut(root, parent_path)?;

    match patch {
        Patch::Put { value, .. } => match (parent, last) {
            (Value::Object(map), Prop::Key(key)) => {
                map.insert(key.clone(), value.clone());
                Ok(())
            }
            (Value::Array(items), Prop::Index(index)) => {
                let len = items.len();
                let slot = items
                    .get_mut(*index)
                    .ok_or_else(|| out_of_bounds(path, *index, len))?;
                *slot = value.clone();
                Ok(())
            }
            _ => Err(mismatch(parent_path, "object or list")),
        },

        Patch::Insert { values, .. } => match (parent, last) {
            (Value::Array(items), Prop::Index(index)) => {
                if *index > items.len() {
                    return Err(out_of_bounds(path, *index, items.len()));
                }
                items.splice(*index..*index, values.iter().cloned());
                Ok(())
            }
            _ => Err(mismatch(parent_path, "list")),
        },

        Patch::Del { length, .. } => match (parent, last) {
            (Value::Object(map), Prop::Key(key)) => map
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| DocumentError::PathNotFound(format_path(path))),
            (Value::Array(items), Prop::Index(index)) => {
                let end = range_end(path, *index, *length, items.len())?;
                items.drain(*index..end);
                Ok(())
            }
            (Value::String(text), Prop::Index(index)) => {
                let chars: Vec<char> = text.chars().collect();
                let end = range_end(path, *index, *length, chars.len())?;
                let mut remaining: String = chars[..*index].iter().collect();
                remaining.extend(&chars[end..]);
                *text = remaining;
                Ok(())
            }
            _ => Err(mismatch(parent_path, "object, list or text")),
        },

        Patch::Splice { value, .. } => match (parent, last) {
            (Value::String(text), Prop::Index(index)) => {
                let count = text.chars().count();
                if *index > count {
                    return Err(out_of_bounds(path, *index, count));
                }
                let offset = text
                    .char_indices()
                    .nth(*index)
                    .map(|(offset, _)| offset)
                    .unwrap_or(text.len());
                text.insert_str(offset, value);
                Ok(())
            }
            _ => Err(mismatch(parent_path, "text")),
        },

        Patch::Inc { value, .. } => {
            let target = match (parent, last) {
                (Value::Object(map), Prop::Key(key)) => map.get_mut(key),
                (Value::Array(items), Prop::Index(index)) => items.get_mut(*index),
                _ => None,
            }
            .ok_or_else(|| DocumentError::PathNotFound(format_path(path)))?;

            let current = target.as_i64().ok_or_else(|| mismatch(path, "counter"))?;
            let next = current.checked_add(*value).ok_or_else(|| {
                DocumentError::InvalidPatch(format!("counter overflow at {}", format_path(path)))
            })?;
            *target = Value::from(next);
            Ok(())
        }
    }
}
