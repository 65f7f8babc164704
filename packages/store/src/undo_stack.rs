//! # Undo/Redo Stack
//!
//! Tracks commit history and enables undo/redo operations.
//!
//! ## Design
//!
//! - Each local commit records its inverse patches once the commit settles
//! - Undo moves the entry to the redo stack, redo moves it back
//! - New forward commits clear the redo stack (the store does this before
//!   committing, so recording itself never clears)
//! - Entries may carry callbacks instead of patches for actions that live
//!   outside the document
//!
//! The stack only does bookkeeping. Replaying an entry against the document
//! is the store's job, which calls [`UndoStack::revert_undo`] /
//! [`UndoStack::revert_redo`] when a replay commit fails.

use docstore_document::Patch;
use std::fmt;
use std::rc::Rc;

/// One side of an undo/redo entry
#[derive(Clone)]
pub enum UndoAction {
    /// Patches replayed as a single commit
    Patches(Vec<Patch>),

    /// Behaviour that bypasses the document entirely
    Callback(Rc<dyn Fn()>),
}

impl fmt::Debug for UndoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndoAction::Patches(patches) => f.debug_tuple("Patches").field(patches).finish(),
            UndoAction::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// An entry that is undone/redone as a unit
#[derive(Debug, Clone)]
pub struct UndoRedo {
    /// Optional description of this entry
    pub title: Option<String>,
    pub undo: UndoAction,
    pub redo: UndoAction,
}

impl UndoRedo {
    pub fn patches(title: Option<String>, undo: Vec<Patch>, redo: Vec<Patch>) -> Self {
        Self {
            title,
            undo: UndoAction::Patches(undo),
            redo: UndoAction::Patches(redo),
        }
    }

    pub fn callbacks(
        title: Option<String>,
        undo: impl Fn() + 'static,
        redo: impl Fn() + 'static,
    ) -> Self {
        Self {
            title,
            undo: UndoAction::Callback(Rc::new(undo)),
            redo: UndoAction::Callback(Rc::new(redo)),
        }
    }

    /// Add a description
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

#[derive(Debug)]
pub struct UndoStack {
    /// Stack of applied entries (most recent last)
    undo_stack: Vec<UndoRedo>,

    /// Stack of undone entries (most recent last)
    redo_stack: Vec<UndoRedo>,

    /// Maximum number of undo levels (0 = unlimited)
    max_levels: usize,
}

impl UndoStack {
    /// Create an unbounded undo stack
    pub fn new() -> Self {
        Self::with_max_levels(0)
    }

    /// Create an undo stack with custom max levels
    pub fn with_max_levels(max_levels: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_levels,
        }
    }

    /// Record an entry for a settled commit
    pub fn record(&mut self, entry: UndoRedo) {
        self.undo_stack.push(entry);

        // Trim if exceeded max levels
        if self.max_levels > 0 && self.undo_stack.len() > self.max_levels {
            self.undo_stack.remove(0);
        }
    }

    /// Pop the most recent entry and move it to the redo stack
    pub fn undo(&mut self) -> Option<UndoRedo> {
        let entry = self.undo_stack.pop()?;
        self.redo_stack.push(entry.clone());
        Some(entry)
    }

    /// Pop the most recently undone entry and move it back to the undo stack
    pub fn redo(&mut self) -> Option<UndoRedo> {
        let entry = self.redo_stack.pop()?;
        self.undo_stack.push(entry.clone());
        Some(entry)
    }

    /// Put back an entry moved by [`UndoStack::undo`]
    pub fn revert_undo(&mut self) {
        if let Some(entry) = self.redo_stack.pop() {
            self.undo_stack.push(entry);
        }
    }

    /// Put back an entry moved by [`UndoStack::redo`]
    pub fn revert_redo(&mut self) {
        if let Some(entry) = self.undo_stack.pop() {
            self.redo_stack.push(entry);
        }
    }

    pub fn clear_redo(&mut self) {
        self.redo_stack.clear();
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_levels(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_levels(&self) -> usize {
        self.redo_stack.len()
    }

    /// Clear all undo/redo history
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Get description of the next undo operation
    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack
            .last()
            .and_then(|entry| entry.title.as_deref())
    }

    /// Get description of the next redo operation
    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack
            .last()
            .and_then(|entry| entry.title.as_deref())
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new()
    }
}
