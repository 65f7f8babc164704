use crate::{IdleScheduler, Inspector, StoreError};
use docstore_document::{DocumentEngine, PatchInverter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

pub const DEFAULT_CONFIG_NAME: &str = "docstore.config.json";

/// Store configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Record an undo entry for every local commit
    #[serde(default = "default_true")]
    pub with_undo_redo: bool,

    /// Mirror commits to an injected inspector
    #[serde(default)]
    pub with_dev_tools: bool,

    /// Display name reported to the inspector (defaults to the store id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Upper bound before a deferred undo recording runs
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Maximum number of undo levels (0 = unlimited)
    #[serde(default)]
    pub max_undo_levels: usize,
}

fn default_true() -> bool {
    true
}

fn default_idle_timeout_ms() -> u64 {
    50
}

impl StoreConfig {
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load config from a directory
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let config_path = dir.as_ref().join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_json(&content)
        } else {
            // Return default config if none exists
            Ok(Self::default())
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            with_undo_redo: true,
            with_dev_tools: false,
            name: None,
            idle_timeout_ms: default_idle_timeout_ms(),
            max_undo_levels: 0,
        }
    }
}

/// Config plus the runtime collaborators a store is built with.
/// Anything left as `None` falls back to the in-memory default.
#[derive(Default, Clone)]
pub struct StoreOptions {
    pub config: StoreConfig,
    pub engine: Option<Rc<dyn DocumentEngine>>,
    pub patcher: Option<Rc<dyn PatchInverter>>,
    pub scheduler: Option<Rc<dyn IdleScheduler>>,
    pub inspector: Option<Rc<dyn Inspector>>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_engine(mut self, engine: Rc<dyn DocumentEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_patcher(mut self, patcher: Rc<dyn PatchInverter>) -> Self {
        self.patcher = Some(patcher);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Rc<dyn IdleScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_inspector(mut self, inspector: Rc<dyn Inspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("config", &self.config)
            .field("engine", &self.engine.is_some())
            .field("patcher", &self.patcher.is_some())
            .field("scheduler", &self.scheduler.is_some())
            .field("inspector", &self.inspector.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "withUndoRedo": false,
            "withDevTools": true,
            "name": "todos",
            "idleTimeoutMs": 20,
            "maxUndoLevels": 10
        }"#;

        let config = StoreConfig::from_json(json).unwrap();
        assert!(!config.with_undo_redo);
        assert!(config.with_dev_tools);
        assert_eq!(config.name.as_deref(), Some("todos"));
        assert_eq!(config.idle_timeout(), Duration::from_millis(20));
        assert_eq!(config.max_undo_levels, 10);
    }

    #[test]
    fn test_default_config() {
        let config = StoreConfig::from_json("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
        assert!(config.with_undo_redo);
        assert!(!config.with_dev_tools);
        assert_eq!(config.idle_timeout_ms, 50);
    }

    #[test]
    fn test_load_missing_file_uses_default() {
        let dir = std::env::temp_dir().join("docstore_missing_config_test");
        let config = StoreConfig::load(&dir).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_load_from_directory() {
        let dir = std::env::temp_dir().join(format!("docstore_config_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(DEFAULT_CONFIG_NAME), r#"{ "name": "from-disk" }"#).unwrap();

        let config = StoreConfig::load(&dir).unwrap();
        assert_eq!(config.name.as_deref(), Some("from-disk"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let result = StoreConfig::from_json(r#"{ "idleTimeoutMs": "soon" }"#);
        assert!(matches!(result, Err(StoreError::Config(_))));
    }
}
