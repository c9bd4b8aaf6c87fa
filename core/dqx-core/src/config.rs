//! Engine configuration
//!
//! 기본값 → JSON 파일 → 환경 변수 순서로 덮어쓴다.

use crate::error::{DqxError, DqxResult};
use serde::{Deserialize, Serialize};
use std::env;

/// Default index tree order (max entries per leaf / children per interior node)
pub const DEFAULT_TREE_ORDER: usize = 32;
/// Default per-tree point lookup cache size
pub const DEFAULT_LOOKUP_CACHE_CAPACITY: usize = 64;
/// Default compiled program cache size
pub const DEFAULT_PROGRAM_CACHE_CAPACITY: usize = 256;

/// Engine-wide tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Max entries in a leaf / children in an interior node before a split
    pub tree_order: usize,
    /// Min entries before underflow; `None` means `tree_order / 2`
    pub merge_threshold: Option<usize>,
    /// Bounded point-lookup cache per index tree
    pub lookup_cache_capacity: usize,
    /// Compiled programs kept per collection
    pub program_cache_capacity: usize,
    /// Whether compiled programs are cached at all
    pub cache_programs: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tree_order: DEFAULT_TREE_ORDER,
            merge_threshold: None,
            lookup_cache_capacity: DEFAULT_LOOKUP_CACHE_CAPACITY,
            program_cache_capacity: DEFAULT_PROGRAM_CACHE_CAPACITY,
            cache_programs: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tree_order(mut self, order: usize) -> Self {
        self.tree_order = order;
        self
    }

    pub fn with_merge_threshold(mut self, threshold: usize) -> Self {
        self.merge_threshold = Some(threshold);
        self
    }

    pub fn with_lookup_cache_capacity(mut self, capacity: usize) -> Self {
        self.lookup_cache_capacity = capacity;
        self
    }

    pub fn with_program_cache_capacity(mut self, capacity: usize) -> Self {
        self.program_cache_capacity = capacity;
        self
    }

    pub fn without_program_cache(mut self) -> Self {
        self.cache_programs = false;
        self
    }

    /// Effective underflow threshold for tree nodes.
    pub fn effective_merge_threshold(&self) -> usize {
        self.merge_threshold.unwrap_or(self.tree_order / 2)
    }

    /// JSON 문자열에서 설정 로드 (누락된 필드는 기본값)
    pub fn from_json(json: &str) -> DqxResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 환경 변수로 기본값 덮어쓰기
    ///
    /// - `DQX_TREE_ORDER`
    /// - `DQX_LOOKUP_CACHE`
    /// - `DQX_PROGRAM_CACHE`
    /// - `DQX_CACHE_PROGRAMS` (`true`/`false`/`1`/`0`)
    pub fn from_env() -> DqxResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> DqxResult<()> {
        if let Some(order) = read_usize("DQX_TREE_ORDER")? {
            self.tree_order = order;
        }
        if let Some(capacity) = read_usize("DQX_LOOKUP_CACHE")? {
            self.lookup_cache_capacity = capacity;
        }
        if let Some(capacity) = read_usize("DQX_PROGRAM_CACHE")? {
            self.program_cache_capacity = capacity;
        }
        if let Ok(raw) = env::var("DQX_CACHE_PROGRAMS") {
            self.cache_programs = match raw.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(DqxError::InvalidConfig(format!(
                        "DQX_CACHE_PROGRAMS: expected a boolean, got '{other}'"
                    )));
                }
            };
        }
        Ok(())
    }

    /// Reject settings the tree or caches cannot work with.
    pub fn validate(&self) -> DqxResult<()> {
        if self.tree_order < 3 {
            return Err(DqxError::InvalidConfig(format!(
                "tree_order must be >= 3, got {}",
                self.tree_order
            )));
        }
        let threshold = self.effective_merge_threshold();
        if threshold == 0 || threshold > self.tree_order / 2 {
            return Err(DqxError::InvalidConfig(format!(
                "merge_threshold must be in 1..={}, got {}",
                self.tree_order / 2,
                threshold
            )));
        }
        if self.cache_programs && self.program_cache_capacity == 0 {
            return Err(DqxError::InvalidConfig(
                "program_cache_capacity must be > 0 when caching is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_usize(name: &str) -> DqxResult<Option<usize>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| DqxError::InvalidConfig(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}
