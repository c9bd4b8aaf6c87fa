//! Tree index: `IndexKey → [DocId]` buckets in an [`IndexTree`]

use super::{DocumentIndex, IndexKey, IndexKind, index_name};
use crate::btree::IndexTree;
use crate::config::EngineConfig;
use crate::document::{DocId, Document};
use crate::error::DqxResult;
use ahash::AHashMap;

/// Ordered index over one or more attributes.
pub struct TreeIndex {
    name: String,
    attributes: Vec<String>,
    tree: IndexTree<IndexKey, Vec<DocId>>,
    /// Reverse map so a document can be dropped without its old contents
    keys_by_doc: AHashMap<DocId, IndexKey>,
}

impl TreeIndex {
    pub fn new(
        attributes: Vec<String>,
        order: usize,
        merge_threshold: usize,
        lookup_cache_capacity: usize,
    ) -> DqxResult<Self> {
        Ok(Self {
            name: index_name(&attributes),
            attributes,
            tree: IndexTree::with_options(order, merge_threshold, lookup_cache_capacity)?,
            keys_by_doc: AHashMap::new(),
        })
    }

    pub fn with_config(attributes: Vec<String>, config: &EngineConfig) -> DqxResult<Self> {
        Self::new(
            attributes,
            config.tree_order,
            config.effective_merge_threshold(),
            config.lookup_cache_capacity,
        )
    }

    /// Underlying tree, for inspection.
    pub fn tree(&self) -> &IndexTree<IndexKey, Vec<DocId>> {
        &self.tree
    }
}

impl DocumentIndex for TreeIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn attributes(&self) -> &[String] {
        &self.attributes
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Tree
    }

    fn search(&self, key: &IndexKey) -> DqxResult<Vec<DocId>> {
        Ok(self.tree.search(key)?.unwrap_or_default())
    }

    /// Range lookup restricted to the key kind of the bounds, so a numeric
    /// bound never matches text keys (mirrors predicate comparison).
    fn range(
        &self,
        min: Option<&IndexKey>,
        max: Option<&IndexKey>,
        include_min: bool,
        include_max: bool,
    ) -> DqxResult<Vec<DocId>> {
        let entries = self.tree.range_entries(min, max, include_min, include_max)?;
        Ok(entries
            .into_iter()
            .filter(|(k, _)| {
                min.is_none_or(|m| m.same_kind(k)) && max.is_none_or(|m| m.same_kind(k))
            })
            .flat_map(|(_, ids)| ids)
            .collect())
    }

    fn insert(&mut self, doc_id: DocId, doc: &Document) -> DqxResult<()> {
        if self.keys_by_doc.contains_key(&doc_id) {
            self.remove(doc_id)?;
        }
        let key = IndexKey::for_document(doc, &self.attributes);
        let mut bucket = self.tree.search(&key)?.unwrap_or_default();
        if !bucket.contains(&doc_id) {
            bucket.push(doc_id);
        }
        self.tree.insert(key.clone(), bucket)?;
        self.keys_by_doc.insert(doc_id, key);
        Ok(())
    }

    fn remove(&mut self, doc_id: DocId) -> DqxResult<()> {
        let Some(key) = self.keys_by_doc.remove(&doc_id) else {
            return Ok(());
        };
        if let Some(mut bucket) = self.tree.search(&key)? {
            bucket.retain(|&id| id != doc_id);
            if bucket.is_empty() {
                self.tree.remove(&key)?;
            } else {
                self.tree.insert(key, bucket)?;
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.keys_by_doc.len()
    }
}
