//! In-memory document collection
//!
//! The VM reads documents and index handles through [`DocumentStore`].
//! [`Collection`] is the reference implementation: documents in insertion
//! order, `_id` assignment, index maintenance and the query surface
//! (`find`, `update`, `delete`, `explain`).

use crate::config::EngineConfig;
use crate::document::{DocId, Document, ID_FIELD};
use crate::error::{DqxError, DqxResult};
use crate::index::{DocumentIndex, HashIndex, IndexKind, TreeIndex, index_name};
use crate::query::{parse_query, visit};
use crate::vm::{
    CacheStats, Program, ProgramCache, QueryConditions, VirtualMachine, compile_mutate,
    compile_query,
};
use ahash::AHashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// What the VM needs from a collection.
pub trait DocumentStore {
    fn name(&self) -> &str;

    /// Every document id, in insertion order.
    fn find_all(&self) -> Vec<DocId>;

    fn document(&self, id: DocId) -> Option<&Document>;

    fn document_mut(&mut self, id: DocId) -> Option<&mut Document>;

    /// Registered indices, in registration order.
    fn indices(&self) -> &[Box<dyn DocumentIndex>];

    /// Re-run every index against the (mutated) document.
    fn reindex(&mut self, id: DocId) -> DqxResult<()>;
}

/// A named set of JSON documents with secondary indices.
pub struct Collection {
    name: String,
    config: EngineConfig,
    documents: AHashMap<DocId, Document>,
    order: Vec<DocId>,
    next_id: DocId,
    indices: Vec<Box<dyn DocumentIndex>>,
    programs: Option<ProgramCache>,
}

impl Collection {
    pub fn new(name: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            name: name.into(),
            config: config.clone(),
            documents: AHashMap::new(),
            order: Vec::new(),
            next_id: 1,
            indices: Vec::new(),
            programs: config
                .cache_programs
                .then(|| ProgramCache::new(config.program_cache_capacity)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    // ════════════════════════════════════════════
    // Documents
    // ════════════════════════════════════════════

    /// Insert a document, assigning `_id` when absent.
    ///
    /// A caller-supplied `_id` must be an unused non-negative integer.
    pub fn insert(&mut self, mut doc: Document) -> DqxResult<DocId> {
        let Value::Object(map) = &mut doc else {
            return Err(DqxError::InvalidDocument(
                "document must be a JSON object".into(),
            ));
        };
        let id = match map.get(ID_FIELD) {
            None => {
                let id = self.next_id;
                map.insert(ID_FIELD.to_string(), Value::from(id));
                id
            }
            Some(value) => value.as_u64().ok_or_else(|| {
                DqxError::InvalidDocument(format!("{ID_FIELD} must be a non-negative integer"))
            })?,
        };
        if self.documents.contains_key(&id) {
            return Err(DqxError::InvalidDocument(format!(
                "duplicate {ID_FIELD} {id}"
            )));
        }

        let inserted = self
            .indices
            .iter_mut()
            .enumerate()
            .try_for_each(|(i, index)| index.insert(id, &doc).map_err(|e| (i, e)));
        if let Err((failed, e)) = inserted {
            for index in &mut self.indices[..failed] {
                if let Err(undo) = index.remove(id) {
                    warn!(index = index.name(), doc = id, error = %undo, "insert rollback");
                }
            }
            return Err(e);
        }
        self.next_id = self.next_id.max(id.saturating_add(1));
        self.documents.insert(id, doc);
        self.order.push(id);
        Ok(id)
    }

    pub fn insert_many(
        &mut self,
        docs: impl IntoIterator<Item = Document>,
    ) -> DqxResult<Vec<DocId>> {
        docs.into_iter().map(|doc| self.insert(doc)).collect()
    }

    pub fn get(&self, id: DocId) -> Option<&Document> {
        self.documents.get(&id)
    }

    /// Mutable access; callers must [`reindex`](DocumentStore::reindex) afterwards.
    pub fn get_mut(&mut self, id: DocId) -> Option<&mut Document> {
        self.documents.get_mut(&id)
    }

    pub fn remove_document(&mut self, id: DocId) -> DqxResult<Document> {
        let doc = self
            .documents
            .remove(&id)
            .ok_or(DqxError::DocumentNotFound(id))?;
        for index in &mut self.indices {
            index.remove(id)?;
        }
        self.order.retain(|&d| d != id);
        Ok(doc)
    }

    /// All documents, in insertion order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.order.iter().filter_map(|id| self.documents.get(id))
    }

    // ════════════════════════════════════════════
    // Indices
    // ════════════════════════════════════════════

    /// Register an index over `attributes` and build it from the current
    /// documents. Idempotent for an identical index.
    pub fn ensure_index(&mut self, attributes: &[&str], kind: IndexKind) -> DqxResult<String> {
        if attributes.is_empty() {
            return Err(DqxError::InvalidConfig(
                "an index needs at least one attribute".into(),
            ));
        }
        let attributes: Vec<String> = attributes.iter().map(|a| a.to_string()).collect();
        let name = index_name(&attributes);
        if let Some(existing) = self.indices.iter().find(|i| i.name() == name) {
            if existing.kind() == kind {
                return Ok(name);
            }
            return Err(DqxError::IndexAlreadyExists {
                collection: self.name.clone(),
                index: name,
            });
        }

        let mut index: Box<dyn DocumentIndex> = match kind {
            IndexKind::Tree => Box::new(TreeIndex::with_config(attributes, &self.config)?),
            IndexKind::Hash => Box::new(HashIndex::new(attributes)),
        };
        for id in &self.order {
            if let Some(doc) = self.documents.get(id) {
                index.insert(*id, doc)?;
            }
        }
        debug!(collection = %self.name, index = %name, ?kind, entries = index.len(), "index built");
        self.indices.push(index);
        // compiled programs may now be able to use the new index
        if let Some(programs) = &self.programs {
            programs.clear();
        }
        Ok(name)
    }

    pub fn index(&self, name: &str) -> Option<&dyn DocumentIndex> {
        self.indices
            .iter()
            .find(|i| i.name() == name)
            .map(|i| i.as_ref())
    }

    // ════════════════════════════════════════════
    // Query surface
    // ════════════════════════════════════════════

    /// Parse, select indices and compile, going through the program cache.
    pub fn plan(&self, predicate: &Value, conditions: &QueryConditions) -> DqxResult<Arc<Program>> {
        let compile = || {
            let tree = parse_query(predicate)?;
            let tree = visit(&tree, &self.indices);
            compile_query(&tree, conditions, &self.name)
        };
        match &self.programs {
            Some(cache) => cache.get_or_compile(ProgramCache::query_key(predicate, conditions)?, compile),
            None => compile().map(Arc::new),
        }
    }

    pub fn plan_mutate(&self, mutate: &Value) -> DqxResult<Arc<Program>> {
        match &self.programs {
            Some(cache) => cache.get_or_compile(ProgramCache::mutate_key(mutate)?, || {
                compile_mutate(mutate)
            }),
            None => compile_mutate(mutate).map(Arc::new),
        }
    }

    /// Ids of matching documents.
    pub fn find_ids(&self, predicate: &Value, conditions: &QueryConditions) -> DqxResult<Vec<DocId>> {
        let program = self.plan(predicate, conditions)?;
        let mut vm = VirtualMachine::new();
        vm.execute(&mut ReadOnly(self), program, None, false)
    }

    /// Matching documents, in program order.
    #[instrument(skip(self, predicate, conditions), fields(collection = %self.name))]
    pub fn find(&self, predicate: &Value, conditions: &QueryConditions) -> DqxResult<Vec<Document>> {
        let ids = self.find_ids(predicate, conditions)?;
        Ok(ids
            .into_iter()
            .filter_map(|id| self.documents.get(&id).cloned())
            .collect())
    }

    pub fn find_one(&self, predicate: &Value) -> DqxResult<Option<Document>> {
        let conditions = QueryConditions::new().limit(1);
        Ok(self.find(predicate, &conditions)?.into_iter().next())
    }

    pub fn count(&self, predicate: &Value) -> DqxResult<usize> {
        Ok(self.find_ids(predicate, &QueryConditions::default())?.len())
    }

    /// Apply `mutate` to every matching document; returns the match count.
    ///
    /// Not atomic: an execution error leaves already-mutated documents
    /// mutated (and reindexed).
    #[instrument(skip(self, predicate, mutate), fields(collection = %self.name))]
    pub fn update(&mut self, predicate: &Value, mutate: &Value, upsert: bool) -> DqxResult<usize> {
        let program = self.plan(predicate, &QueryConditions::default())?;
        let mutate = self.plan_mutate(mutate)?;
        let mut vm = VirtualMachine::new();
        let ids = vm.execute(self, program, Some(mutate), upsert)?;
        Ok(ids.len())
    }

    /// Remove every matching document; returns how many were removed.
    #[instrument(skip(self, predicate), fields(collection = %self.name))]
    pub fn delete(&mut self, predicate: &Value) -> DqxResult<usize> {
        let ids = self.find_ids(predicate, &QueryConditions::default())?;
        for id in &ids {
            self.remove_document(*id)?;
        }
        Ok(ids.len())
    }

    /// Instruction listing of the query program.
    pub fn explain(&self, predicate: &Value, conditions: &QueryConditions) -> DqxResult<String> {
        Ok(self.plan(predicate, conditions)?.explain())
    }

    /// Instruction listing of the mutate program.
    pub fn explain_mutate(&self, mutate: &Value) -> DqxResult<String> {
        Ok(self.plan_mutate(mutate)?.explain())
    }

    pub fn program_cache_stats(&self) -> Option<CacheStats> {
        self.programs.as_ref().map(ProgramCache::stats)
    }
}

impl DocumentStore for Collection {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_all(&self) -> Vec<DocId> {
        self.order.clone()
    }

    fn document(&self, id: DocId) -> Option<&Document> {
        self.documents.get(&id)
    }

    fn document_mut(&mut self, id: DocId) -> Option<&mut Document> {
        self.documents.get_mut(&id)
    }

    fn indices(&self) -> &[Box<dyn DocumentIndex>] {
        &self.indices
    }

    fn reindex(&mut self, id: DocId) -> DqxResult<()> {
        let doc = self
            .documents
            .get(&id)
            .ok_or(DqxError::DocumentNotFound(id))?;
        for index in &mut self.indices {
            index.reindex(id, doc)?;
        }
        Ok(())
    }
}

/// Shared view for query-only execution.
struct ReadOnly<'a>(&'a Collection);

impl DocumentStore for ReadOnly<'_> {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn find_all(&self) -> Vec<DocId> {
        self.0.order.clone()
    }

    fn document(&self, id: DocId) -> Option<&Document> {
        self.0.documents.get(&id)
    }

    fn document_mut(&mut self, _id: DocId) -> Option<&mut Document> {
        None
    }

    fn indices(&self) -> &[Box<dyn DocumentIndex>] {
        &self.0.indices
    }

    fn reindex(&mut self, _id: DocId) -> DqxResult<()> {
        Err(DqxError::execution("rindex", "collection is read-only here"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn people() -> Collection {
        let mut c = Collection::new("people", &EngineConfig::default());
        c.insert_many(vec![
            json!({"name": "kim", "age": 31, "city": "Seoul"}),
            json!({"name": "lee", "age": 25, "city": "Busan"}),
            json!({"name": "park", "age": 42, "city": "Seoul"}),
        ])
        .unwrap();
        c
    }

    #[test]
    fn test_id_assignment() {
        let mut c = Collection::new("c", &EngineConfig::default());
        assert_eq!(c.insert(json!({"a": 1})).unwrap(), 1);
        assert_eq!(c.insert(json!({"_id": 10})).unwrap(), 10);
        assert_eq!(c.insert(json!({})).unwrap(), 11);
        assert_eq!(c.get(1).unwrap()["_id"], json!(1));
        assert!(c.insert(json!({"_id": 10})).is_err());
        assert!(c.insert(json!({"_id": "x"})).is_err());
        assert!(c.insert(json!([1])).is_err());
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn test_find_with_and_without_index() {
        let mut c = people();
        let predicate = json!({"city": "Seoul", "age": {"$gt": 30}});
        let before = c.find(&predicate, &QueryConditions::default()).unwrap();
        c.ensure_index(&["city"], IndexKind::Hash).unwrap();
        let after = c.find(&predicate, &QueryConditions::default()).unwrap();
        assert_eq!(before.len(), 2);
        assert_eq!(before, after);
        assert!(c.explain(&predicate, &QueryConditions::default()).unwrap().starts_with("0000  find"));
    }

    #[test]
    fn test_sort_and_limit() {
        let c = people();
        let conditions = QueryConditions::new()
            .sort_by("age", crate::vm::SortOrder::Descending)
            .limit(2);
        let names: Vec<Value> = c
            .find(&json!({}), &conditions)
            .unwrap()
            .into_iter()
            .map(|d| d["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("park"), json!("kim")]);
        assert_eq!(c.find_one(&json!({"city": "Busan"})).unwrap().unwrap()["name"], "lee");
    }

    #[test]
    fn test_update_reindexes() {
        let mut c = people();
        c.ensure_index(&["age"], IndexKind::Tree).unwrap();
        let n = c
            .update(&json!({"name": "lee"}), &json!({"$inc": {"age": 10}}), false)
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(c.count(&json!({"age": 35})).unwrap(), 1);
        assert_eq!(c.count(&json!({"age": 25})).unwrap(), 0);
        assert_eq!(c.count(&json!({"age": {"$gte": 31}})).unwrap(), 3);
    }

    #[test]
    fn test_failed_update_keeps_indices_current() {
        let mut c = people();
        c.ensure_index(&["age"], IndexKind::Tree).unwrap();
        // `$inc` applies before `$push` fails on the string attribute
        let err = c
            .update(
                &json!({"name": "lee"}),
                &json!({"$inc": {"age": 10}, "$push": {"name": 1}}),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, DqxError::Execution { .. }));
        assert_eq!(c.find_one(&json!({"name": "lee"})).unwrap().unwrap()["age"], 35);
        assert_eq!(c.count(&json!({"age": 35})).unwrap(), 1);
        assert_eq!(c.count(&json!({"age": 25})).unwrap(), 0);

        // operand errors are caught before anything is touched
        let err = c
            .update(
                &json!({"name": "lee"}),
                &json!({"$inc": {"age": 10}, "$pushAll": {"tags": 1}}),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, DqxError::Compile { .. }));
        assert_eq!(c.count(&json!({"age": 35})).unwrap(), 1);
    }

    /// Accepts nothing.
    struct RejectingIndex(Vec<String>);

    impl DocumentIndex for RejectingIndex {
        fn name(&self) -> &str {
            "rejecting"
        }
        fn attributes(&self) -> &[String] {
            &self.0
        }
        fn kind(&self) -> IndexKind {
            IndexKind::Hash
        }
        fn search(&self, _key: &crate::index::IndexKey) -> DqxResult<Vec<DocId>> {
            Ok(Vec::new())
        }
        fn range(
            &self,
            _min: Option<&crate::index::IndexKey>,
            _max: Option<&crate::index::IndexKey>,
            _include_min: bool,
            _include_max: bool,
        ) -> DqxResult<Vec<DocId>> {
            Ok(Vec::new())
        }
        fn insert(&mut self, doc_id: DocId, _doc: &Document) -> DqxResult<()> {
            Err(DqxError::TreeCorruption(format!("rejected {doc_id}")))
        }
        fn remove(&mut self, _doc_id: DocId) -> DqxResult<()> {
            Ok(())
        }
        fn len(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_failed_insert_leaves_no_index_entries() {
        let mut c = people();
        c.ensure_index(&["city"], IndexKind::Hash).unwrap();
        c.ensure_index(&["age"], IndexKind::Tree).unwrap();
        c.indices.push(Box::new(RejectingIndex(vec!["name".into()])));

        assert!(c.insert(json!({"name": "choi", "age": 19, "city": "Seoul"})).is_err());
        assert_eq!(c.len(), 3);
        assert_eq!(c.index("city").unwrap().len(), 3);
        assert_eq!(c.index("age").unwrap().len(), 3);
        c.indices.pop();
        assert_eq!(c.count(&json!({"city": "Seoul"})).unwrap(), 2);
        assert_eq!(c.count(&json!({"age": {"$lt": 20}})).unwrap(), 0);
        // the rejected id is still free
        assert_eq!(c.insert(json!({"name": "choi"})).unwrap(), 4);
    }

    #[test]
    fn test_delete() {
        let mut c = people();
        c.ensure_index(&["city"], IndexKind::Tree).unwrap();
        assert_eq!(c.delete(&json!({"city": "Seoul"})).unwrap(), 2);
        assert_eq!(c.len(), 1);
        assert_eq!(c.index("city").unwrap().len(), 1);
        assert!(matches!(c.remove_document(99), Err(DqxError::DocumentNotFound(99))));
    }

    #[test]
    fn test_ensure_index_rules() {
        let mut c = people();
        assert_eq!(c.ensure_index(&["city", "age"], IndexKind::Tree).unwrap(), "city_age");
        assert!(c.ensure_index(&["city", "age"], IndexKind::Tree).is_ok());
        assert!(matches!(
            c.ensure_index(&["city", "age"], IndexKind::Hash),
            Err(DqxError::IndexAlreadyExists { .. })
        ));
        assert!(c.ensure_index(&[], IndexKind::Tree).is_err());
        assert_eq!(c.indices().len(), 1);
    }

    #[test]
    fn test_program_cache_cleared_by_new_index() {
        let mut c = people();
        let predicate = json!({"city": "Seoul"});
        c.find(&predicate, &QueryConditions::default()).unwrap();
        c.find(&predicate, &QueryConditions::default()).unwrap();
        assert_eq!(c.program_cache_stats().unwrap().hits, 1);

        c.ensure_index(&["city"], IndexKind::Tree).unwrap();
        assert_eq!(c.program_cache_stats().unwrap().entries, 0);
        let listing = c.explain(&predicate, &QueryConditions::default()).unwrap();
        assert!(listing.contains("find"));
    }

    #[test]
    fn test_without_program_cache() {
        let c = Collection::new("c", &EngineConfig::default().without_program_cache());
        assert!(c.program_cache_stats().is_none());
        assert!(c.find(&json!({}), &QueryConditions::default()).unwrap().is_empty());
    }
}
