//! Arena-allocated tree nodes
//!
//! Nodes never hold references to each other. Parent → child and leaf
//! sibling links are plain `NodeId` handles into [`NodeArena`].

use crate::error::{DqxError, DqxResult};

/// Handle of a node slot in the arena
pub type NodeId = u32;

/// Leaf node: sorted entries plus the doubly linked sibling chain.
#[derive(Debug, Clone)]
pub(crate) struct LeafNode<K, V> {
    pub(crate) entries: Vec<(K, V)>,
    pub(crate) left: Option<NodeId>,
    pub(crate) right: Option<NodeId>,
}

/// Interior node.
///
/// Logically the alternating array `[child0, key0, child1, key1, ..., childN]`;
/// stored as two vectors with `keys.len() == children.len() - 1`.
/// `keys[i]` is the minimum key reachable through `children[i + 1]`.
#[derive(Debug, Clone)]
pub(crate) struct InteriorNode<K> {
    pub(crate) children: Vec<NodeId>,
    pub(crate) keys: Vec<K>,
}

impl<K: Ord> InteriorNode<K> {
    /// Index of the child whose subtree owns `key`.
    pub(crate) fn child_index(&self, key: &K) -> usize {
        self.keys.partition_point(|k| k <= key)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Node<K, V> {
    Leaf(LeafNode<K, V>),
    Interior(InteriorNode<K>),
}

impl<K, V> Node<K, V> {
    pub(crate) fn empty_leaf() -> Self {
        Node::Leaf(LeafNode {
            entries: Vec::new(),
            left: None,
            right: None,
        })
    }

    /// Entry count for leaves, child count for interior nodes.
    pub(crate) fn size(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.entries.len(),
            Node::Interior(interior) => interior.children.len(),
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }
}

/// Slab of node slots with a free list.
#[derive(Debug)]
pub(crate) struct NodeArena<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<NodeId>,
}

impl<K, V> NodeArena<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn alloc(&mut self, node: Node<K, V>) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = Some(node);
            id
        } else {
            self.slots.push(Some(node));
            (self.slots.len() - 1) as NodeId
        }
    }

    /// Release a slot, returning the node it held.
    pub(crate) fn release(&mut self, id: NodeId) -> DqxResult<Node<K, V>> {
        let node = self
            .slots
            .get_mut(id as usize)
            .and_then(Option::take)
            .ok_or_else(|| dangling(id))?;
        self.free.push(id);
        Ok(node)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    /// Number of live nodes.
    pub(crate) fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn try_get(&self, id: NodeId) -> Option<&Node<K, V>> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    pub(crate) fn get(&self, id: NodeId) -> DqxResult<&Node<K, V>> {
        self.try_get(id).ok_or_else(|| dangling(id))
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> DqxResult<&mut Node<K, V>> {
        self.slots
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| dangling(id))
    }

    pub(crate) fn leaf(&self, id: NodeId) -> DqxResult<&LeafNode<K, V>> {
        match self.get(id)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Interior(_) => Err(wrong_kind(id, "leaf")),
        }
    }

    pub(crate) fn leaf_mut(&mut self, id: NodeId) -> DqxResult<&mut LeafNode<K, V>> {
        match self.get_mut(id)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Interior(_) => Err(wrong_kind(id, "leaf")),
        }
    }

    pub(crate) fn interior(&self, id: NodeId) -> DqxResult<&InteriorNode<K>> {
        match self.get(id)? {
            Node::Interior(interior) => Ok(interior),
            Node::Leaf(_) => Err(wrong_kind(id, "interior")),
        }
    }

    pub(crate) fn interior_mut(&mut self, id: NodeId) -> DqxResult<&mut InteriorNode<K>> {
        match self.get_mut(id)? {
            Node::Interior(interior) => Ok(interior),
            Node::Leaf(_) => Err(wrong_kind(id, "interior")),
        }
    }
}

fn dangling(id: NodeId) -> DqxError {
    DqxError::TreeCorruption(format!("dangling node handle {id}"))
}

fn wrong_kind(id: NodeId, expected: &str) -> DqxError {
    DqxError::TreeCorruption(format!("node {id} is not a {expected} node"))
}
