//! Order-N B+Tree used by tree indices
//!
//! - Leaves hold sorted `(key, value)` entries and form a doubly linked
//!   list left-to-right, so range scans walk siblings instead of re-descending.
//! - Interior nodes route by separator keys; `keys[i]` is always the
//!   minimum key reachable through `children[i + 1]`.
//! - Insert splits leaves / interior nodes bottom-up once they exceed `order`;
//!   remove redistributes from a richer sibling first and merges otherwise,
//!   collapsing the root when it is left with a single child.
//!
//! Nodes live in an arena and link to each other by [`NodeId`].

mod node;
mod rebalance;


pub use node::NodeId;

use crate::config::EngineConfig;
use crate::error::{DqxError, DqxResult};
use lru::LruCache;
use node::{InteriorNode, LeafNode, Node, NodeArena};
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use tracing::trace;

/// Split descriptor handed from a node to its parent.
struct Split<K> {
    left: NodeId,
    key: K,
    right: NodeId,
}

/// B+Tree mapping ordered keys to values.
pub struct IndexTree<K, V> {
    arena: NodeArena<K, V>,
    root: NodeId,
    order: usize,
    merge_threshold: usize,
    len: usize,
    /// Bounded point-lookup cache, invalidated per key on insert/remove
    lookup_cache: Option<Mutex<LruCache<K, V>>>,
}

impl<K, V> IndexTree<K, V>
where
    K: Ord + Clone + Hash,
    V: Clone,
{
    /// Create a tree with the given order and `order / 2` merge threshold.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use dqx_core::btree::IndexTree;
    /// let mut tree = IndexTree::new(4).unwrap();
    /// tree.insert(3, "c").unwrap();
    /// tree.insert(1, "a").unwrap();
    /// assert_eq!(tree.search(&1).unwrap(), Some("a"));
    /// assert_eq!(tree.range(Some(&1), Some(&3), true, false).unwrap(), vec!["a"]);
    /// ```
    pub fn new(order: usize) -> DqxResult<Self> {
        Self::with_options(order, order / 2, 0)
    }

    /// Create a tree from engine settings.
    pub fn with_config(config: &EngineConfig) -> DqxResult<Self> {
        Self::with_options(
            config.tree_order,
            config.effective_merge_threshold(),
            config.lookup_cache_capacity,
        )
    }

    pub fn with_options(
        order: usize,
        merge_threshold: usize,
        lookup_cache_capacity: usize,
    ) -> DqxResult<Self> {
        if order < 3 {
            return Err(DqxError::InvalidConfig(format!(
                "tree order must be >= 3, got {order}"
            )));
        }
        if merge_threshold == 0 || merge_threshold > order / 2 {
            return Err(DqxError::InvalidConfig(format!(
                "merge threshold must be in 1..={}, got {merge_threshold}",
                order / 2
            )));
        }
        let mut arena = NodeArena::new();
        let root = arena.alloc(Node::empty_leaf());
        Ok(Self {
            arena,
            root,
            order,
            merge_threshold,
            len: 0,
            lookup_cache: NonZeroUsize::new(lookup_cache_capacity)
                .map(|cap| Mutex::new(LruCache::new(cap))),
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn merge_threshold(&self) -> usize {
        self.merge_threshold
    }

    /// Number of keys stored.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of node levels (a lone leaf root has height 1).
    pub fn height(&self) -> DqxResult<usize> {
        let mut height = 1;
        let mut current = self.root;
        while let Node::Interior(interior) = self.arena.get(current)? {
            current = interior.children[0];
            height += 1;
        }
        Ok(height)
    }

    /// Remove every entry, resetting to a single empty leaf.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.root = self.arena.alloc(Node::empty_leaf());
        self.len = 0;
        if let Some(cache) = &self.lookup_cache {
            cache.lock().clear();
        }
    }

    /// Insert or overwrite. Returns `true` when the key was new.
    pub fn insert(&mut self, key: K, value: V) -> DqxResult<bool> {
        self.invalidate(&key);
        let (inserted, split) = self.insert_into(self.root, key, value)?;
        if let Some(split) = split {
            let old_root = self.root;
            self.root = self.arena.alloc(Node::Interior(InteriorNode {
                children: vec![split.left, split.right],
                keys: vec![split.key],
            }));
            trace!(old_root, new_root = self.root, "root split");
        }
        if inserted {
            self.len += 1;
        }
        Ok(inserted)
    }

    fn insert_into(
        &mut self,
        node_id: NodeId,
        key: K,
        value: V,
    ) -> DqxResult<(bool, Option<Split<K>>)> {
        let Some((idx, child)) = self.route(node_id, &key)? else {
            let leaf = self.arena.leaf_mut(node_id)?;
            let inserted = match leaf.entries.binary_search_by(|(k, _)| k.cmp(&key)) {
                Ok(pos) => {
                    leaf.entries[pos].1 = value;
                    false
                }
                Err(pos) => {
                    leaf.entries.insert(pos, (key, value));
                    true
                }
            };
            let split = if leaf.entries.len() > self.order {
                Some(self.split_leaf(node_id)?)
            } else {
                None
            };
            return Ok((inserted, split));
        };

        let (inserted, split) = self.insert_into(child, key, value)?;
        let Some(split) = split else {
            return Ok((inserted, None));
        };

        // [.., child, ..] → [.., left, key, right, ..]
        let interior = self.arena.interior_mut(node_id)?;
        interior.children[idx] = split.left;
        interior.children.insert(idx + 1, split.right);
        interior.keys.insert(idx, split.key);
        let overflow = interior.children.len() > self.order;
        let split = if overflow {
            Some(self.split_interior(node_id)?)
        } else {
            None
        };
        Ok((inserted, split))
    }

    fn split_leaf(&mut self, node_id: NodeId) -> DqxResult<Split<K>> {
        let (right_entries, old_right) = {
            let leaf = self.arena.leaf_mut(node_id)?;
            let mid = leaf.entries.len() / 2;
            (leaf.entries.split_off(mid), leaf.right)
        };
        let key = right_entries[0].0.clone();
        let right_id = self.arena.alloc(Node::Leaf(LeafNode {
            entries: right_entries,
            left: Some(node_id),
            right: old_right,
        }));
        self.arena.leaf_mut(node_id)?.right = Some(right_id);
        if let Some(next) = old_right {
            self.arena.leaf_mut(next)?.left = Some(right_id);
        }
        trace!(left = node_id, right = right_id, "leaf split");
        Ok(Split {
            left: node_id,
            key,
            right: right_id,
        })
    }

    fn split_interior(&mut self, node_id: NodeId) -> DqxResult<Split<K>> {
        let interior = self.arena.interior_mut(node_id)?;
        let mid = interior.children.len() / 2;
        let right_children = interior.children.split_off(mid);
        let right_keys = interior.keys.split_off(mid);
        // keys[mid - 1] separates the halves and moves up
        let key = interior.keys.pop().ok_or_else(|| {
            DqxError::TreeCorruption(format!("interior node {node_id} has no separator to promote"))
        })?;
        let right_id = self.arena.alloc(Node::Interior(InteriorNode {
            children: right_children,
            keys: right_keys,
        }));
        trace!(left = node_id, right = right_id, "interior split");
        Ok(Split {
            left: node_id,
            key,
            right: right_id,
        })
    }

    /// Point lookup.
    pub fn search(&self, key: &K) -> DqxResult<Option<V>> {
        if let Some(cache) = &self.lookup_cache
            && let Some(hit) = cache.lock().get(key)
        {
            return Ok(Some(hit.clone()));
        }
        let leaf = self.arena.leaf(self.find_leaf(key)?)?;
        let found = leaf
            .entries
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|pos| leaf.entries[pos].1.clone());
        if let (Some(cache), Some(value)) = (&self.lookup_cache, &found) {
            cache.lock().put(key.clone(), value.clone());
        }
        Ok(found)
    }

    pub fn contains_key(&self, key: &K) -> DqxResult<bool> {
        Ok(self.search(key)?.is_some())
    }

    /// Values whose keys fall between `min` and `max`, in key order.
    ///
    /// `None` leaves that side unbounded.
    pub fn range(
        &self,
        min: Option<&K>,
        max: Option<&K>,
        include_min: bool,
        include_max: bool,
    ) -> DqxResult<Vec<V>> {
        Ok(self
            .range_entries(min, max, include_min, include_max)?
            .into_iter()
            .map(|(_, v)| v)
            .collect())
    }

    /// Like [`range`](Self::range) but keeps the keys.
    pub fn range_entries(
        &self,
        min: Option<&K>,
        max: Option<&K>,
        include_min: bool,
        include_max: bool,
    ) -> DqxResult<Vec<(K, V)>> {
        let start = match min {
            Some(min) => self.find_leaf(min)?,
            None => self.leftmost_leaf()?,
        };
        let mut out = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            let leaf = self.arena.leaf(id)?;
            for (k, v) in &leaf.entries {
                if let Some(min) = min
                    && (k < min || (!include_min && k == min))
                {
                    continue;
                }
                if let Some(max) = max
                    && (k > max || (!include_max && k == max))
                {
                    return Ok(out);
                }
                out.push((k.clone(), v.clone()));
            }
            current = leaf.right;
        }
        Ok(out)
    }

    /// Smallest entry.
    pub fn first(&self) -> DqxResult<Option<(K, V)>> {
        let leaf = self.arena.leaf(self.leftmost_leaf()?)?;
        Ok(leaf.entries.first().cloned())
    }

    /// Largest entry.
    pub fn last(&self) -> DqxResult<Option<(K, V)>> {
        let mut current = self.root;
        while let Node::Interior(interior) = self.arena.get(current)? {
            current = *interior.children.last().ok_or_else(|| {
                DqxError::TreeCorruption(format!("interior node {current} has no children"))
            })?;
        }
        Ok(self.arena.leaf(current)?.entries.last().cloned())
    }

    /// Ordered iteration over the leaf chain.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            arena: &self.arena,
            leaf: self.leftmost_leaf().ok(),
            pos: 0,
        }
    }

    /// Child slot and handle to follow for `key`, or `None` at a leaf.
    fn route(&self, node_id: NodeId, key: &K) -> DqxResult<Option<(usize, NodeId)>> {
        match self.arena.get(node_id)? {
            Node::Leaf(_) => Ok(None),
            Node::Interior(interior) => {
                let idx = interior.child_index(key);
                Ok(Some((idx, interior.children[idx])))
            }
        }
    }

    fn find_leaf(&self, key: &K) -> DqxResult<NodeId> {
        let mut current = self.root;
        while let Some((_, child)) = self.route(current, key)? {
            current = child;
        }
        Ok(current)
    }

    fn leftmost_leaf(&self) -> DqxResult<NodeId> {
        self.leftmost_leaf_of(self.root)
    }

    fn leftmost_leaf_of(&self, node_id: NodeId) -> DqxResult<NodeId> {
        let mut current = node_id;
        while let Node::Interior(interior) = self.arena.get(current)? {
            current = interior.children[0];
        }
        Ok(current)
    }

    fn invalidate(&self, key: &K) {
        if let Some(cache) = &self.lookup_cache {
            cache.lock().pop(key);
        }
    }
}

/// Iterator over `(key, value)` pairs in key order.
pub struct Iter<'a, K, V> {
    arena: &'a NodeArena<K, V>,
    leaf: Option<NodeId>,
    pos: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Node::Leaf(leaf) = self.arena.try_get(self.leaf?)? else {
                return None;
            };
            if let Some((k, v)) = leaf.entries.get(self.pos) {
                self.pos += 1;
                return Some((k, v));
            }
            self.leaf = leaf.right;
            self.pos = 0;
        }
    }
}
