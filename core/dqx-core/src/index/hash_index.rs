//! Hash Index for fast key lookups
//!
//! Provides O(1) exact-match lookups; cannot serve range scans.

use super::{DocumentIndex, IndexKey, IndexKind, index_name};
use crate::document::{DocId, Document};
use crate::error::{DqxError, DqxResult};
use ahash::AHashMap;

/// Hash Index structure
///
/// Structure: key → document ids, plus the reverse map for removal.
pub struct HashIndex {
    name: String,
    attributes: Vec<String>,
    entries: AHashMap<IndexKey, Vec<DocId>>,
    keys_by_doc: AHashMap<DocId, IndexKey>,
}

impl HashIndex {
    /// Create a new empty hash index over `attributes`
    ///
    /// # Example
    ///
    /// ```rust
    /// # use dqx_core::index::{DocumentIndex, HashIndex, IndexKey};
    /// # use serde_json::json;
    /// let mut index = HashIndex::new(vec!["email".into()]);
    /// index.insert(7, &json!({"email": "a@b.c"})).unwrap();
    /// assert_eq!(index.search(&IndexKey::Text("a@b.c".into())).unwrap(), vec![7]);
    /// ```
    pub fn new(attributes: Vec<String>) -> Self {
        Self {
            name: index_name(&attributes),
            attributes,
            entries: AHashMap::new(),
            keys_by_doc: AHashMap::new(),
        }
    }

    /// Number of distinct keys
    pub fn distinct_keys(&self) -> usize {
        self.entries.len()
    }
}

impl DocumentIndex for HashIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn attributes(&self) -> &[String] {
        &self.attributes
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Hash
    }

    fn search(&self, key: &IndexKey) -> DqxResult<Vec<DocId>> {
        Ok(self.entries.get(key).cloned().unwrap_or_default())
    }

    fn range(
        &self,
        _min: Option<&IndexKey>,
        _max: Option<&IndexKey>,
        _include_min: bool,
        _include_max: bool,
    ) -> DqxResult<Vec<DocId>> {
        Err(DqxError::execution(
            "range",
            format!("hash index '{}' cannot serve range lookups", self.name),
        ))
    }

    fn insert(&mut self, doc_id: DocId, doc: &Document) -> DqxResult<()> {
        self.remove(doc_id)?;
        let key = IndexKey::for_document(doc, &self.attributes);
        self.entries.entry(key.clone()).or_default().push(doc_id);
        self.keys_by_doc.insert(doc_id, key);
        Ok(())
    }

    fn remove(&mut self, doc_id: DocId) -> DqxResult<()> {
        if let Some(key) = self.keys_by_doc.remove(&doc_id)
            && let Some(ids) = self.entries.get_mut(&key)
        {
            ids.retain(|&id| id != doc_id);
            if ids.is_empty() {
                self.entries.remove(&key);
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.keys_by_doc.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_lookup() {
        let mut index = HashIndex::new(vec!["id".into()]);
        index.insert(0, &json!({"id": "user:123"})).unwrap();
        index.insert(1, &json!({"id": "user:123"})).unwrap();

        let result = index.search(&IndexKey::Text("user:123".into())).unwrap();
        assert_eq!(result, vec![0, 1]);
    }

    #[test]
    fn test_delete_and_lookup() {
        let mut index = HashIndex::new(vec!["id".into()]);
        index.insert(0, &json!({"id": "user:123"})).unwrap();
        index.insert(1, &json!({"id": "user:123"})).unwrap();

        index.remove(0).unwrap();

        let result = index.search(&IndexKey::Text("user:123".into())).unwrap();
        assert_eq!(result, vec![1]);
    }

    #[test]
    fn test_lookup_nonexistent() {
        let index = HashIndex::new(vec!["id".into()]);
        let result = index.search(&IndexKey::Text("nonexistent".into())).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_reinsert_rekeys() {
        let mut index = HashIndex::new(vec!["n".into()]);
        index.insert(5, &json!({"n": 1})).unwrap();
        index.insert(5, &json!({"n": 2})).unwrap();
        assert!(index.search(&IndexKey::Number(1.0)).unwrap().is_empty());
        assert_eq!(index.search(&IndexKey::Number(2.0)).unwrap(), vec![5]);
        assert_eq!(index.distinct_keys(), 1);
    }

    #[test]
    fn test_range_unsupported() {
        let index = HashIndex::new(vec!["n".into()]);
        assert!(index.range(None, None, true, true).is_err());
    }
}
