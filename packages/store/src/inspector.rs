//! # Inspector Bridge
//!
//! Mirrors commits to an external time-travel debugger and renders the
//! states it jumps to.
//!
//! ## Counters
//!
//! ```text
//! change_count    commits reported so far
//! live_change_id  commit the inspector has selected
//! ```
//!
//! A commit advances `live_change_id` only while it equals `change_count`,
//! so once the inspector scrubs back, new commits are still reported but
//! subscribers keep showing the selected state.

use crate::store::{PatchData, Store};
use crate::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::rc::Rc;

/// Registration sent when a store connects
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOptions {
    pub instance_id: String,
    pub name: String,
}

/// Action reported for each commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InspectorAction {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPayload {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<usize>,
}

/// Messages received from the inspector
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum InspectorMessage {
    Start {},

    Stop {
        #[serde(default)]
        failed: bool,
    },

    /// Jump requests carry the selected state as a JSON string
    Dispatch {
        payload: DispatchPayload,
        #[serde(default)]
        state: Option<String>,
    },

    Import {
        #[serde(default)]
        state: Option<String>,
    },

    Action {
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        state: Option<String>,
    },

    Export {},

    Update {
        #[serde(default)]
        state: Option<String>,
    },
}

impl InspectorMessage {
    pub fn parse(json: &str) -> Result<Self, StoreError> {
        serde_json::from_str(json).map_err(|err| StoreError::Inspector(err.to_string()))
    }
}

/// Capability that hands out inspector connections
pub trait Inspector {
    fn connect(&self, options: ConnectOptions) -> Rc<dyn InspectorConnection>;
}

pub trait InspectorConnection {
    /// Seed the inspector with the initial state
    fn init(&self, state: &Value);

    fn subscribe(&self, listener: Box<dyn Fn(InspectorMessage)>);

    fn send(&self, action: InspectorAction, state: &Value);

    fn unsubscribe(&self);

    fn error(&self, message: &str);
}

pub(crate) struct InspectorBridge {
    connection: Rc<dyn InspectorConnection>,
    change_count: usize,
    live_change_id: usize,
    paused: bool,
}

impl InspectorBridge {
    fn new(connection: Rc<dyn InspectorConnection>) -> Self {
        Self {
            connection,
            change_count: 0,
            live_change_id: 0,
            paused: false,
        }
    }

    /// Count one commit; true when subscribers should see it
    fn record_commit(&mut self) -> bool {
        if self.live_change_id == self.change_count {
            self.live_change_id += 1;
        }
        self.change_count += 1;
        self.live_change_id == self.change_count
    }

    fn reset(&mut self) {
        self.change_count = 0;
        self.live_change_id = 0;
        self.paused = false;
    }

    pub(crate) fn disconnect(&self) {
        self.connection.unsubscribe();
    }
}

impl Store {
    /// Connect to the injected inspector, if enabled. Runs once, on ready.
    pub(crate) fn setup_inspector(&self) {
        if !self.inner.config.with_dev_tools {
            return;
        }
        let Some(inspector) = self.inner.inspector.clone() else {
            tracing::debug!("[Inspector] dev tools enabled for {} but no inspector injected", self.id());
            return;
        };
        let Some(doc) = self.inner.state.borrow().doc.clone() else {
            return;
        };

        let options = ConnectOptions {
            instance_id: self.id().to_string(),
            name: self
                .inner
                .config
                .name
                .clone()
                .unwrap_or_else(|| self.id().to_string()),
        };
        tracing::debug!("[Inspector] connecting {:?}", options);

        let connection = inspector.connect(options);
        connection.init(doc.value());
        *self.inner.bridge.borrow_mut() = Some(InspectorBridge::new(connection.clone()));

        let store = self.downgrade();
        connection.subscribe(Box::new(move |message: InspectorMessage| {
            if let Some(store) = store.upgrade() {
                store.on_inspector_message(message);
            }
        }));
    }

    /// Report a new snapshot. Returns false while the inspector has an
    /// earlier state selected.
    pub(crate) fn report_to_inspector(&self, doc: &docstore_document::Doc) -> bool {
        let (connection, live) = {
            let mut guard = self.inner.bridge.borrow_mut();
            let Some(bridge) = guard.as_mut().filter(|bridge| !bridge.paused) else {
                return true;
            };
            let live = bridge.record_commit();
            (bridge.connection.clone(), live)
        };

        let label = self.commit_label(doc);
        tracing::trace!("[Inspector] send {} (live: {})", label, live);
        connection.send(InspectorAction { kind: label }, doc.value());
        live
    }

    fn commit_label(&self, doc: &docstore_document::Doc) -> String {
        let engine = &self.inner.engine;
        match engine.last_local_change(doc) {
            None => "@LOAD".to_string(),
            Some(change) => engine
                .decode_change(&change)
                .message
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| engine.heads(doc).to_string()),
        }
    }

    fn on_inspector_message(&self, message: InspectorMessage) {
        let Some(connection) = self
            .inner
            .bridge
            .borrow()
            .as_ref()
            .map(|bridge| bridge.connection.clone())
        else {
            return;
        };

        match message {
            InspectorMessage::Dispatch {
                payload,
                state: Some(state),
            } => {
                let Some(action_id) = payload.action_id else {
                    tracing::trace!("[Inspector] ignoring {} without action id", payload.kind);
                    return;
                };
                let value: Value = match serde_json::from_str(&state) {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::warn!("[Inspector] invalid state for {}: {}", payload.kind, err);
                        connection.error(&format!("invalid state: {}", err));
                        return;
                    }
                };
                let Some(held) = self.inner.state.borrow().doc.clone() else {
                    return;
                };

                tracing::debug!("[Inspector] {} to action {}", payload.kind, action_id);
                let view = held.with_value(value);
                self.notify_subscribers(&view, &PatchData::initial(&held));

                if let Some(bridge) = self.inner.bridge.borrow_mut().as_mut() {
                    bridge.live_change_id = action_id.min(bridge.change_count);
                }
            }

            InspectorMessage::Start {} => {
                let Some(doc) = self.inner.state.borrow().doc.clone() else {
                    return;
                };
                tracing::debug!("[Inspector] start");
                connection.init(doc.value());
                if let Some(bridge) = self.inner.bridge.borrow_mut().as_mut() {
                    bridge.reset();
                }
            }

            InspectorMessage::Stop { failed } => {
                tracing::debug!("[Inspector] stop (failed: {})", failed);
                if let Some(bridge) = self.inner.bridge.borrow_mut().as_mut() {
                    bridge.paused = true;
                }
            }

            other => {
                tracing::trace!("[Inspector] ignoring {:?}", other);
            }
        }
    }
}
