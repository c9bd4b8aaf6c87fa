//! Removal path: redistribute-then-merge, root collapse, invariant checks

use super::IndexTree;
use super::node::{Node, NodeId};
use crate::error::{DqxError, DqxResult};
use std::hash::Hash;
use tracing::{error, trace};

/// Which neighbour of an underflowing child takes part in a fix-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// Summary of a subtree, collected by `check_invariants`.
struct SubtreeInfo<K> {
    depth: usize,
    min: Option<K>,
    max: Option<K>,
    entries: usize,
}

impl<K, V> IndexTree<K, V>
where
    K: Ord + Clone + Hash,
    V: Clone,
{
    /// Remove a key. Returns `true` when it was present.
    ///
    /// A structural inconsistency found while rebalancing (e.g. an
    /// underflowing node with no sibling) is returned as
    /// [`DqxError::TreeCorruption`]; the tree must not be used afterwards.
    pub fn remove(&mut self, key: &K) -> DqxResult<bool> {
        self.invalidate(key);
        let removed = self.remove_from(self.root, key).inspect_err(|e| {
            if matches!(e, DqxError::TreeCorruption(_)) {
                error!(error = %e, "index tree corrupted during remove");
            }
        })?;
        if removed {
            self.len -= 1;
            self.collapse_root()?;
        }
        Ok(removed)
    }

    fn remove_from(&mut self, node_id: NodeId, key: &K) -> DqxResult<bool> {
        let Some((idx, child)) = self.route(node_id, key)? else {
            let leaf = self.arena.leaf_mut(node_id)?;
            return Ok(match leaf.entries.binary_search_by(|(k, _)| k.cmp(key)) {
                Ok(pos) => {
                    leaf.entries.remove(pos);
                    true
                }
                Err(_) => false,
            });
        };

        if !self.remove_from(child, key)? {
            return Ok(false);
        }

        // the child's minimum may have been the removed key
        self.refresh_separator(node_id, idx)?;
        if self.underflows(child)? {
            self.rebalance_child(node_id, idx)?;
            let len = self.arena.interior(node_id)?.children.len();
            for i in idx.saturating_sub(1)..=(idx + 1).min(len.saturating_sub(1)) {
                self.refresh_separator(node_id, i)?;
            }
        }
        Ok(true)
    }

    fn min_size(&self, node: &Node<K, V>) -> usize {
        match node {
            Node::Leaf(_) => self.merge_threshold,
            Node::Interior(_) => self.merge_threshold.max(2),
        }
    }

    fn underflows(&self, node_id: NodeId) -> DqxResult<bool> {
        let node = self.arena.get(node_id)?;
        Ok(node.size() < self.min_size(node))
    }

    /// Siblings of `children[idx]` within the parent.
    fn identify_siblings(
        &self,
        parent: NodeId,
        idx: usize,
    ) -> DqxResult<(Option<NodeId>, Option<NodeId>)> {
        let children = &self.arena.interior(parent)?.children;
        let left = idx.checked_sub(1).map(|i| children[i]);
        let right = children.get(idx + 1).copied();
        Ok((left, right))
    }

    pub(super) fn rebalance_child(&mut self, parent: NodeId, idx: usize) -> DqxResult<()> {
        let (left, right) = self.identify_siblings(parent, idx)?;

        // borrow from whichever sibling has the larger surplus
        let mut donor: Option<(Side, usize)> = None;
        for (side, sibling) in [(Side::Left, left), (Side::Right, right)] {
            let Some(sibling) = sibling else { continue };
            let node = self.arena.get(sibling)?;
            let surplus = node.size().saturating_sub(self.min_size(node));
            if surplus > 0 && donor.is_none_or(|(_, best)| surplus > best) {
                donor = Some((side, surplus));
            }
        }

        match (donor, left, right) {
            (Some((side, _)), _, _) => self.redistribute(parent, idx, side),
            (None, Some(_), _) => self.merge(parent, idx - 1),
            (None, None, Some(_)) => self.merge(parent, idx),
            (None, None, None) => Err(DqxError::TreeCorruption(format!(
                "node {} underflows but parent {parent} has no sibling to merge with",
                self.arena.interior(parent)?.children[idx]
            ))),
        }
    }

    /// Move entries (or children) from a sibling into `children[idx]` until
    /// both are about even.
    fn redistribute(&mut self, parent: NodeId, idx: usize, side: Side) -> DqxResult<()> {
        let (child, sibling, separator_slot) = {
            let p = self.arena.interior(parent)?;
            match side {
                Side::Left => (p.children[idx], p.children[idx - 1], idx - 1),
                Side::Right => (p.children[idx], p.children[idx + 1], idx),
            }
        };
        let child_size = self.arena.get(child)?.size();
        let sibling_size = self.arena.get(sibling)?.size();
        let moves = ((child_size + sibling_size) / 2).saturating_sub(child_size).max(1);

        if self.arena.get(child)?.is_leaf() {
            let moved = {
                let donor = self.arena.leaf_mut(sibling)?;
                match side {
                    Side::Left => donor.entries.split_off(donor.entries.len() - moves),
                    Side::Right => donor.entries.drain(..moves).collect(),
                }
            };
            let target = self.arena.leaf_mut(child)?;
            match side {
                Side::Left => {
                    let tail = std::mem::replace(&mut target.entries, moved);
                    target.entries.extend(tail);
                }
                Side::Right => target.entries.extend(moved),
            }
        } else {
            // rotate through the parent separator, one child at a time
            for _ in 0..moves {
                let separator = self.arena.interior(parent)?.keys[separator_slot].clone();
                let (moved_child, promoted) = {
                    let donor = self.arena.interior_mut(sibling)?;
                    match side {
                        Side::Left => (donor.children.pop(), donor.keys.pop()),
                        Side::Right => (Some(donor.children.remove(0)), Some(donor.keys.remove(0))),
                    }
                };
                let (Some(moved_child), Some(promoted)) = (moved_child, promoted) else {
                    return Err(DqxError::TreeCorruption(format!(
                        "sibling {sibling} ran out of children while redistributing"
                    )));
                };
                let target = self.arena.interior_mut(child)?;
                match side {
                    Side::Left => {
                        target.children.insert(0, moved_child);
                        target.keys.insert(0, separator);
                    }
                    Side::Right => {
                        target.children.push(moved_child);
                        target.keys.push(separator);
                    }
                }
                self.arena.interior_mut(parent)?.keys[separator_slot] = promoted;
            }
        }
        trace!(parent, child, sibling, moves, ?side, "redistribute");
        Ok(())
    }

    /// Merge `children[left_idx + 1]` into `children[left_idx]`, collapsing
    /// `[left, key, right]` in the parent into `[left]`.
    fn merge(&mut self, parent: NodeId, left_idx: usize) -> DqxResult<()> {
        let (left, right, separator) = {
            let p = self.arena.interior_mut(parent)?;
            if left_idx + 1 >= p.children.len() {
                return Err(DqxError::TreeCorruption(format!(
                    "merge at slot {left_idx} of node {parent} has no right sibling"
                )));
            }
            let right = p.children.remove(left_idx + 1);
            let separator = p.keys.remove(left_idx);
            (p.children[left_idx], right, separator)
        };

        match self.arena.release(right)? {
            Node::Leaf(right_leaf) => {
                let target = self.arena.leaf_mut(left)?;
                target.entries.extend(right_leaf.entries);
                target.right = right_leaf.right;
                if let Some(next) = right_leaf.right {
                    self.arena.leaf_mut(next)?.left = Some(left);
                }
            }
            Node::Interior(right_interior) => {
                let target = self.arena.interior_mut(left)?;
                target.keys.push(separator);
                target.keys.extend(right_interior.keys);
                target.children.extend(right_interior.children);
            }
        }
        trace!(parent, left, right, "merge");
        Ok(())
    }

    /// Re-derive `keys[idx - 1]` from the subtree at `children[idx]`.
    fn refresh_separator(&mut self, parent: NodeId, idx: usize) -> DqxResult<()> {
        if idx == 0 {
            return Ok(());
        }
        let child = self.arena.interior(parent)?.children[idx];
        if let Some(min) = self.subtree_min(child)? {
            self.arena.interior_mut(parent)?.keys[idx - 1] = min;
        }
        Ok(())
    }

    fn subtree_min(&self, node_id: NodeId) -> DqxResult<Option<K>> {
        let leaf = self.arena.leaf(self.leftmost_leaf_of(node_id)?)?;
        Ok(leaf.entries.first().map(|(k, _)| k.clone()))
    }

    /// An interior root left with one child is replaced by that child.
    fn collapse_root(&mut self) -> DqxResult<()> {
        loop {
            let only_child = match self.arena.get(self.root)? {
                Node::Interior(interior) if interior.children.len() == 1 => interior.children[0],
                _ => return Ok(()),
            };
            let old_root = self.root;
            self.arena.release(old_root)?;
            self.root = only_child;
            trace!(old_root, new_root = only_child, "root collapse");
        }
    }

    /// Depth of every leaf, left to right.
    pub fn leaf_depths(&self) -> DqxResult<Vec<usize>> {
        let mut depths = Vec::new();
        let mut stack = vec![(self.root, 1usize)];
        while let Some((id, depth)) = stack.pop() {
            match self.arena.get(id)? {
                Node::Leaf(_) => depths.push(depth),
                Node::Interior(interior) => {
                    stack.extend(interior.children.iter().rev().map(|&c| (c, depth + 1)));
                }
            }
        }
        Ok(depths)
    }

    /// Verify every structural invariant of the tree.
    ///
    /// - entries sorted within and across leaves, all leaves at one depth
    /// - node sizes within `[min, order]` (the root is exempt from the minimum)
    /// - `keys[i]` equals the minimum key under `children[i + 1]`
    /// - the leaf chain is a consistent doubly linked list in key order
    /// - `len()` matches the number of stored entries
    pub fn check_invariants(&self) -> DqxResult<()> {
        let mut leaves = Vec::new();
        let info = self.check_subtree(self.root, true, &mut leaves)?;
        if info.entries != self.len {
            return Err(corrupt(format!(
                "len() is {} but leaves hold {} entries",
                self.len, info.entries
            )));
        }

        for (pos, &id) in leaves.iter().enumerate() {
            let leaf = self.arena.leaf(id)?;
            let expected_left = pos.checked_sub(1).map(|p| leaves[p]);
            let expected_right = leaves.get(pos + 1).copied();
            if leaf.left != expected_left || leaf.right != expected_right {
                return Err(corrupt(format!(
                    "leaf {id} links ({:?}, {:?}), expected ({:?}, {:?})",
                    leaf.left, leaf.right, expected_left, expected_right
                )));
            }
            if let Some(right) = leaf.right
                && self.arena.leaf(right)?.left != Some(id)
            {
                return Err(corrupt(format!("leaf {id}: right.left does not point back")));
            }
        }
        Ok(())
    }

    fn check_subtree(
        &self,
        id: NodeId,
        is_root: bool,
        leaves: &mut Vec<NodeId>,
    ) -> DqxResult<SubtreeInfo<K>> {
        let node = self.arena.get(id)?;
        let size = node.size();
        if size > self.order || (!is_root && size < self.min_size(node)) {
            return Err(corrupt(format!("node {id} has size {size} outside bounds")));
        }

        match node {
            Node::Leaf(leaf) => {
                if leaf.entries.windows(2).any(|w| w[0].0 >= w[1].0) {
                    return Err(corrupt(format!("leaf {id} entries out of order")));
                }
                leaves.push(id);
                Ok(SubtreeInfo {
                    depth: 1,
                    min: leaf.entries.first().map(|(k, _)| k.clone()),
                    max: leaf.entries.last().map(|(k, _)| k.clone()),
                    entries: leaf.entries.len(),
                })
            }
            Node::Interior(interior) => {
                if interior.keys.len() + 1 != interior.children.len() {
                    return Err(corrupt(format!(
                        "interior {id} has {} keys for {} children",
                        interior.keys.len(),
                        interior.children.len()
                    )));
                }
                let mut depth = None;
                let mut entries = 0;
                let mut min = None;
                let mut max: Option<K> = None;
                for (i, &child) in interior.children.iter().enumerate() {
                    let info = self.check_subtree(child, false, leaves)?;
                    if *depth.get_or_insert(info.depth) != info.depth {
                        return Err(corrupt(format!("leaves under {id} at unequal depth")));
                    }
                    if i > 0 {
                        let separator = &interior.keys[i - 1];
                        if info.min.as_ref() != Some(separator) {
                            return Err(corrupt(format!(
                                "interior {id}: separator {} is not the minimum of child {child}",
                                i - 1
                            )));
                        }
                        if max.as_ref().is_some_and(|m| m >= separator) {
                            return Err(corrupt(format!(
                                "interior {id}: child {} overlaps separator {}",
                                i - 1,
                                i - 1
                            )));
                        }
                    }
                    if i == 0 {
                        min = info.min.clone();
                    }
                    if info.max.is_some() {
                        max = info.max;
                    }
                    entries += info.entries;
                }
                Ok(SubtreeInfo {
                    depth: depth.unwrap_or(0) + 1,
                    min,
                    max,
                    entries,
                })
            }
        }
    }
}

fn corrupt(message: String) -> DqxError {
    DqxError::TreeCorruption(message)
}
