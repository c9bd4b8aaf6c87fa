//! Compiled program cache
//!
//! Caches compiled programs keyed by a SHA-256 of the canonical predicate
//! (plus conditions) so identical queries skip parse/visit/compile.

use super::program::{Program, QueryConditions};
use crate::error::DqxResult;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Content hash of a query or mutate object
pub type ProgramKey = [u8; 32];

/// LRU program cache
pub struct ProgramCache {
    inner: Mutex<LruCache<ProgramKey, Arc<Program>>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl ProgramCache {
    /// Creates a new cache; a zero capacity is treated as one entry
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        }
    }

    /// Key for a query program.
    ///
    /// `serde_json` maps serialise with sorted keys, so logically identical
    /// predicates hash identically regardless of construction order.
    pub fn query_key(predicate: &Value, conditions: &QueryConditions) -> DqxResult<ProgramKey> {
        let mut hasher = Sha256::new();
        hasher.update(b"query:");
        hasher.update(serde_json::to_vec(predicate)?);
        hasher.update(b"|");
        hasher.update(serde_json::to_vec(conditions)?);
        Ok(hasher.finalize().into())
    }

    /// Key for a mutate program.
    pub fn mutate_key(mutate: &Value) -> DqxResult<ProgramKey> {
        let mut hasher = Sha256::new();
        hasher.update(b"mutate:");
        hasher.update(serde_json::to_vec(mutate)?);
        Ok(hasher.finalize().into())
    }

    /// Gets a program from cache
    pub fn get(&self, key: &ProgramKey) -> Option<Arc<Program>> {
        let mut cache = self.inner.lock();
        if let Some(program) = cache.get(key) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            Some(Arc::clone(program))
        } else {
            self.miss_count.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Inserts a program into cache
    pub fn insert(&self, key: ProgramKey, program: Arc<Program>) {
        self.inner.lock().put(key, program);
    }

    /// Cached program, or compile and cache it
    pub fn get_or_compile(
        &self,
        key: ProgramKey,
        compile: impl FnOnce() -> DqxResult<Program>,
    ) -> DqxResult<Arc<Program>> {
        if let Some(program) = self.get(&key) {
            return Ok(program);
        }
        let program = Arc::new(compile()?);
        self.insert(key, Arc::clone(&program));
        Ok(program)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Returns cache hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hit_count.load(Ordering::Relaxed);
        let misses = self.miss_count.load(Ordering::Relaxed);
        let total = hits + misses;

        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Returns cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hit_count.load(Ordering::Relaxed),
            misses: self.miss_count.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
            entries: self.len(),
        }
    }

    /// Drops every program (indices changed); statistics are kept
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Instruction;
    use serde_json::json;

    fn halt() -> Program {
        Program::new(vec![Instruction::Halt])
    }

    #[test]
    fn test_cache_basic() {
        let cache = ProgramCache::new(10);
        let key = ProgramCache::query_key(&json!({"a": 1}), &QueryConditions::default()).unwrap();
        assert!(cache.get(&key).is_none());
        cache.insert(key, Arc::new(halt()));
        assert!(cache.get(&key).is_some());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn test_key_is_order_insensitive_but_content_sensitive() {
        let none = QueryConditions::default();
        let a: Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert_eq!(
            ProgramCache::query_key(&a, &none).unwrap(),
            ProgramCache::query_key(&b, &none).unwrap()
        );
        assert_ne!(
            ProgramCache::query_key(&a, &none).unwrap(),
            ProgramCache::query_key(&a, &QueryConditions::new().limit(1)).unwrap()
        );
        assert_ne!(
            ProgramCache::query_key(&json!({}), &none).unwrap(),
            ProgramCache::mutate_key(&json!({})).unwrap()
        );
    }

    #[test]
    fn test_cache_lru_eviction() {
        let cache = ProgramCache::new(2);
        let keys: Vec<ProgramKey> = (0..3)
            .map(|i| ProgramCache::mutate_key(&json!({"$inc": {"n": i}})).unwrap())
            .collect();
        for key in &keys {
            cache.insert(*key, Arc::new(halt()));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&keys[0]).is_none());
        assert!(cache.get(&keys[2]).is_some());
    }

    #[test]
    fn test_get_or_compile_compiles_once() {
        let cache = ProgramCache::new(4);
        let key = ProgramCache::mutate_key(&json!({"$set": {"x": 1}})).unwrap();
        let mut compiled = 0;
        for _ in 0..3 {
            cache
                .get_or_compile(key, || {
                    compiled += 1;
                    Ok(halt())
                })
                .unwrap();
        }
        assert_eq!(compiled, 1);
        assert!(cache.hit_ratio() > 0.6);
    }

    #[test]
    fn test_clear() {
        let cache = ProgramCache::new(4);
        let key = ProgramCache::mutate_key(&json!({})).unwrap();
        cache.insert(key, Arc::new(halt()));
        cache.clear();
        assert!(cache.is_empty());
    }
}
