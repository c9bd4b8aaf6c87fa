//! Document indices consumed by the planner and the VM
//!
//! All index kinds implement [`DocumentIndex`]. The visitor only asks an
//! index whether it [`applies`](DocumentIndex::applies) to an attribute set;
//! the VM only calls [`search`](DocumentIndex::search) and
//! [`range`](DocumentIndex::range).

mod hash_index;
mod key;
mod tree_index;

pub use hash_index::HashIndex;
pub use key::IndexKey;
pub use tree_index::TreeIndex;

use crate::document::{DocId, Document};
use crate::error::DqxResult;
use ahash::AHashSet;
use serde::{Deserialize, Serialize};

/// Set of attribute names a predicate constrains.
pub type AttributeSet = AHashSet<String>;

/// Backing structure of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Ordered; serves exact and single-attribute range lookups
    Tree,
    /// Unordered; exact lookups only
    Hash,
}

/// Positive answer of [`DocumentIndex::applies`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMatch {
    /// Covered attributes, in index attribute order
    pub attributes: Vec<String>,
    pub range: bool,
}

/// An index over one or more document attributes.
pub trait DocumentIndex: Send + Sync {
    /// Index name (unique per collection)
    fn name(&self) -> &str;

    /// Indexed attributes, in key order
    fn attributes(&self) -> &[String];

    fn kind(&self) -> IndexKind;

    /// Whether this index can answer a lookup over `attribute_set`.
    ///
    /// Every indexed attribute must be present in the set. Range lookups
    /// are only served by single-attribute tree indices.
    fn applies(&self, attribute_set: &AttributeSet, is_range: bool) -> Option<IndexMatch> {
        if is_range && (self.kind() != IndexKind::Tree || self.attributes().len() != 1) {
            return None;
        }
        self.attributes()
            .iter()
            .all(|a| attribute_set.contains(a))
            .then(|| IndexMatch {
                attributes: self.attributes().to_vec(),
                range: is_range,
            })
    }

    /// Documents stored under exactly `key`.
    fn search(&self, key: &IndexKey) -> DqxResult<Vec<DocId>>;

    /// Documents whose key lies between the bounds, in key order.
    fn range(
        &self,
        min: Option<&IndexKey>,
        max: Option<&IndexKey>,
        include_min: bool,
        include_max: bool,
    ) -> DqxResult<Vec<DocId>>;

    /// Add a document under its current attribute values.
    fn insert(&mut self, doc_id: DocId, doc: &Document) -> DqxResult<()>;

    /// Drop a document, whatever key it was stored under.
    fn remove(&mut self, doc_id: DocId) -> DqxResult<()>;

    /// Re-key a document after mutation.
    fn reindex(&mut self, doc_id: DocId, doc: &Document) -> DqxResult<()> {
        self.remove(doc_id)?;
        self.insert(doc_id, doc)
    }

    /// Number of indexed documents
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default index name: attribute names joined by `_`.
pub fn index_name(attributes: &[String]) -> String {
    attributes.join("_")
}
