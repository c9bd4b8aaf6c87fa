//! Database struct definition: named collections sharing one config

use crate::collection::Collection;
use crate::config::EngineConfig;
use crate::error::{DqxError, DqxResult};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// DQX 데이터베이스 엔진
///
/// 이름으로 구분되는 인메모리 [`Collection`]들의 집합입니다.
///
/// # 예제
///
/// ```rust
/// use dqx_core::{Database, IndexKind, QueryConditions};
/// use serde_json::json;
///
/// # fn main() -> dqx_core::DqxResult<()> {
/// let mut db = Database::in_memory();
/// let users = db.create_collection("users")?;
/// users.insert(json!({"name": "Alice", "age": 30}))?;
/// users.insert(json!({"name": "Bob", "age": 17}))?;
/// users.ensure_index(&["age"], IndexKind::Tree)?;
///
/// let adults = users.find(&json!({"age": {"$gte": 18}}), &QueryConditions::default())?;
/// assert_eq!(adults.len(), 1);
/// assert_eq!(adults[0]["name"], "Alice");
/// # Ok(())
/// # }
/// ```
pub struct Database {
    config: EngineConfig,
    collections: HashMap<String, Collection>,
}

impl Database {
    /// Open an empty database with a validated config.
    #[instrument(skip(config))]
    pub fn new(config: EngineConfig) -> DqxResult<Self> {
        config.validate()?;
        info!(
            tree_order = config.tree_order,
            program_cache = config.cache_programs,
            "database opened"
        );
        Ok(Self {
            config,
            collections: HashMap::new(),
        })
    }

    /// Open with default settings.
    pub fn in_memory() -> Self {
        Self {
            config: EngineConfig::default(),
            collections: HashMap::new(),
        }
    }

    /// Open with defaults overridden by `DQX_*` environment variables.
    pub fn from_env() -> DqxResult<Self> {
        Self::new(EngineConfig::from_env()?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn create_collection(&mut self, name: &str) -> DqxResult<&mut Collection> {
        if self.collections.contains_key(name) {
            return Err(DqxError::CollectionAlreadyExists(name.to_string()));
        }
        debug!(collection = name, "collection created");
        Ok(self
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Collection::new(name, &self.config)))
    }

    pub fn collection(&self, name: &str) -> DqxResult<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| DqxError::CollectionNotFound(name.to_string()))
    }

    pub fn collection_mut(&mut self, name: &str) -> DqxResult<&mut Collection> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| DqxError::CollectionNotFound(name.to_string()))
    }

    pub fn drop_collection(&mut self, name: &str) -> DqxResult<Collection> {
        let dropped = self
            .collections
            .remove(name)
            .ok_or_else(|| DqxError::CollectionNotFound(name.to_string()))?;
        debug!(collection = name, documents = dropped.len(), "collection dropped");
        Ok(dropped)
    }

    /// Collection names, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::in_memory()
    }
}
