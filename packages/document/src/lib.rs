//! # Docstore Document
//!
//! Immutable JSON document snapshots, path-addressed patches and the
//! engine primitives the store builds on.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Draft: mutable view for one commit          │
//! │  - every edit is recorded as a Patch        │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ DocumentEngine: snapshot + mutator → Doc    │
//! │  - content-addressed Change per commit      │
//! │  - Heads as the version marker              │
//! │  - replica merge by change replay           │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ PatchInverter: forward patches → inverse    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use docstore_document::{path, ChangeOptions, Doc, DocumentEngine, Draft, JsonEngine};
//! use serde_json::json;
//!
//! let engine = JsonEngine::new();
//! let doc = Doc::from_value(json!({ "count": 0 })).unwrap();
//!
//! let next = engine
//!     .change(
//!         &doc,
//!         ChangeOptions::new().with_message("Increment"),
//!         Box::new(|d: &mut Draft| d.increment(path!["count"], 1)),
//!     )
//!     .unwrap();
//!
//! assert_eq!(next.value(), &json!({ "count": 1 }));
//! assert_ne!(next.heads(), doc.heads());
//! ```

mod change;
mod doc;
mod draft;
mod engine;
mod errors;
mod inverter;
mod patch;

pub use change::{ActorId, Change, ChangeHash, DecodedChange, Heads};
pub use doc::Doc;
pub use draft::Draft;
pub use engine::{
    ChangeOptions, DocumentEngine, JsonEngine, Mutator, PatchCallback, PatchInfo, PatchSource,
};
pub use errors::DocumentError;
pub use inverter::{JsonPatcher, PatchInverter};
pub use patch::{apply_patch, format_path, get_path, Patch, Path, Prop};
