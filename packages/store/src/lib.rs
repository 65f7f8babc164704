//! # Docstore
//!
//! Reactive, undoable store over a single JSON document.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Store: held snapshot + subscribers          │
//! │  - commit pipeline, transactions            │
//! │  - undo/redo from inverted patches          │
//! │  - readiness for late documents             │
//! └─────────────────────────────────────────────┘
//!          ↓ Memory                ↓ Handle
//! ┌──────────────────┐   ┌──────────────────────┐
//! │ DocumentEngine   │   │ DocumentHandle       │
//! │  (in process)    │   │  - async resolution  │
//! │                  │   │  - remote edits      │
//! └──────────────────┘   └──────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ Inspector (optional): time-travel debugger  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use docstore::{path, Doc, ManualScheduler, Store, StoreOptions};
//! use serde_json::json;
//! use std::rc::Rc;
//!
//! let scheduler = ManualScheduler::new();
//! let store = Store::new(
//!     "counter",
//!     Doc::from_value(json!({ "count": 0 })).unwrap(),
//!     StoreOptions::new().with_scheduler(Rc::new(scheduler.clone())),
//! );
//!
//! store.change(|d| d.increment(path!["count"], 1)).unwrap();
//! scheduler.run_pending();
//!
//! store.undo().unwrap();
//! assert_eq!(store.doc().unwrap().value(), &json!({ "count": 0 }));
//! ```

mod config;
mod errors;
mod handle;
mod handle_adapter;
mod inspector;
mod readiness;
mod scheduler;
mod store;
mod subscription;
mod transaction;
mod undo_stack;

pub use config::{StoreConfig, StoreOptions, DEFAULT_CONFIG_NAME};
pub use errors::StoreError;
pub use handle::{
    ChangeEvent, ChangeListener, CommitStatus, CommitTag, DocumentHandle, HandleChangeOptions,
    HandleError, ListenerId, MemoryHandle, PatchEvent, PatchListener, PatchOrigin,
};
pub use inspector::{
    ConnectOptions, DispatchPayload, Inspector, InspectorAction, InspectorConnection,
    InspectorMessage,
};
pub use scheduler::{IdleScheduler, IdleTask, ManualScheduler, TokioIdleScheduler, FALLBACK_DELAY};
pub use store::{PatchData, Store, WeakStore};
pub use subscription::{SubscribeCallback, SubscriberId, Subscription};
pub use undo_stack::{UndoAction, UndoRedo, UndoStack};

pub use docstore_document::{
    path, ChangeOptions, Doc, DocumentEngine, DocumentError, Draft, JsonEngine, JsonPatcher,
    Mutator, Patch, PatchInfo, PatchInverter, PatchSource,
};
