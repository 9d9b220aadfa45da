//! Arena-backed N-ary tree
//!
//! # Architecture
//!
//! ```text
//! arena: [ root | a | b | (free) | c ]      free list: {3}
//!
//! root ── slots [a, b]
//!          a ── slots [c, -]               "-" = tombstone
//!          b ── slots [-, -]
//! ```
//!
//! Nodes live in a single arena and refer to each other by [`NodeId`]. A
//! parent owns its children through its slot array; the child's `parent`
//! link is only used to find and clear that slot on removal. Slot arrays
//! start at the tree's default width and double when full.
//!
//! Every fallible step of a mutation (allocating the new node, reserving an
//! arena slot, reserving room to double a slot array) happens before the
//! first visible change, so `OutOfMemory` leaves the tree untouched.

pub mod free_list;
pub mod node;

pub use free_list::FreeList;
pub use node::{Node, NodeId};

use crate::error::{Error, Result};
use tracing::debug;

struct ArenaSlot<T> {
    generation: u32,
    node: Option<Node<T>>,
}

/// Single-owner N-ary tree with growable child slot arrays
pub struct Tree<T> {
    slots: Vec<ArenaSlot<T>>,
    free: FreeList,
    root: NodeId,
    default_width: usize,
    count: usize,
}

impl<T> Tree<T> {
    /// Create a tree holding only `root_value`
    ///
    /// # Arguments
    /// * `root_value` - Value stored in the root node
    /// * `default_width` - Initial number of child slots of every node (commonly 2)
    pub fn new(root_value: T, default_width: usize) -> Result<Self> {
        if default_width == 0 {
            return Err(Error::InvalidArgument(
                "default node width must be at least 1".to_string(),
            ));
        }
        let root = Node::new(root_value, default_width)?;
        Ok(Self {
            slots: vec![ArenaSlot {
                generation: 0,
                node: Some(root),
            }],
            free: FreeList::new(),
            root: NodeId::new(0, 0),
            default_width,
            count: 1,
        })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn default_width(&self) -> usize {
        self.default_width
    }

    /// Number of live nodes, root included
    pub fn node_count(&self) -> usize {
        self.count
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<T>> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node<T>> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.node(id).map(|n| &n.value)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.node_mut(id).map(|n| &mut n.value)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Occupied children of `id` in slot order (empty if `id` is stale)
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id).into_iter().flat_map(|n| n.children())
    }

    /// True if `id` has no occupied slot. Stale handles count as leaves.
    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.node(id).map_or(true, Node::is_leaf)
    }

    pub fn free_slot_count(&self, id: NodeId) -> Option<usize> {
        self.node(id).map(Node::free_slot_count)
    }

    pub fn slot_count(&self, id: NodeId) -> Option<usize> {
        self.node(id).map(Node::slot_count)
    }

    fn not_found(id: NodeId) -> Error {
        Error::NotFound(format!("{} is not in the tree", id))
    }

    /// Make sure `insert_node` will not need to allocate
    fn reserve_slot(&mut self) -> Result<()> {
        if self.free.is_empty() {
            if self.slots.len() >= u32::MAX as usize {
                return Err(Error::OutOfMemory("node arena exhausted".to_string()));
            }
            self.slots
                .try_reserve(1)
                .map_err(|e| Error::OutOfMemory(format!("node arena: {}", e)))?;
        }
        Ok(())
    }

    fn insert_node(&mut self, node: Node<T>) -> NodeId {
        self.count += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId::new(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(ArenaSlot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId::new(index, 0)
            }
        }
    }

    fn take_node(&mut self, id: NodeId) -> Option<Node<T>> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.count -= 1;
        Some(node)
    }

    /// Insert `value` as a child of `parent`, in its first empty slot
    ///
    /// A full slot array is doubled first. Returns the new node's id.
    pub fn add_child(&mut self, parent: NodeId, value: T) -> Result<NodeId> {
        let growth = self
            .node(parent)
            .ok_or_else(|| Self::not_found(parent))?
            .growth_needed();

        let mut child = Node::new(value, self.default_width)?;
        child.parent = Some(parent);
        self.reserve_slot()?;
        if growth > 0 {
            let parent_node = self.node_mut(parent).ok_or_else(|| Self::not_found(parent))?;
            parent_node
                .children
                .try_reserve_exact(growth)
                .map_err(|e| Error::OutOfMemory(format!("doubling child table: {}", e)))?;
        }

        let id = self.insert_node(child);
        if let Some(parent_node) = self.node_mut(parent) {
            let pos = parent_node.claim_slot();
            parent_node.occupy(pos, id);
            debug!(%parent, child = %id, slot = pos, grown = growth, "Added tree node");
        }
        Ok(id)
    }

    /// Remove `id` and its whole subtree, returning the values in postorder
    ///
    /// Removing the root frees everything below it; the root itself stays
    /// and its slot array is reset to the default width.
    pub fn remove(&mut self, id: NodeId) -> Result<Vec<T>> {
        let parent = self.node(id).ok_or_else(|| Self::not_found(id))?.parent;
        if id == self.root {
            return Ok(self.clear());
        }

        let doomed = self.postorder(id);
        if let Some(parent_node) = parent.and_then(|p| self.node_mut(p)) {
            if let Some(pos) = parent_node.slot_of(id) {
                parent_node.vacate(pos);
            }
        }

        let values: Vec<T> = doomed
            .into_iter()
            .filter_map(|nid| self.take_node(nid))
            .map(|node| node.value)
            .collect();
        debug!(node = %id, removed = values.len(), "Removed subtree");
        Ok(values)
    }

    /// Free every node below the root
    pub fn clear(&mut self) -> Vec<T> {
        let mut doomed = self.postorder(self.root);
        // Postorder ends with the root itself
        doomed.pop();
        let width = self.default_width;
        let root = self.root;
        if let Some(root_node) = self.node_mut(root) {
            root_node.children = vec![None; width];
            root_node.free_slots = width;
        }
        doomed
            .into_iter()
            .filter_map(|nid| self.take_node(nid))
            .map(|node| node.value)
            .collect()
    }

    /// Remove `old` (and its subtree) and put `value` in the same slot
    ///
    /// Fails with `NotFound` if `old` is the root. Returns the new id and the
    /// removed values in postorder.
    pub fn replace(&mut self, old: NodeId, value: T) -> Result<(NodeId, Vec<T>)> {
        let parent = self
            .node(old)
            .ok_or_else(|| Self::not_found(old))?
            .parent
            .ok_or_else(|| Error::NotFound(format!("{} has no parent to replace it in", old)))?;
        let pos = self
            .node(parent)
            .and_then(|p| p.slot_of(old))
            .ok_or_else(|| Self::not_found(old))?;

        let mut fresh = Node::new(value, self.default_width)?;
        fresh.parent = Some(parent);
        self.reserve_slot()?;

        let removed = self.remove(old)?;
        let id = self.insert_node(fresh);
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.occupy(pos, id);
        }
        debug!(old = %old, new = %id, slot = pos, "Replaced tree node");
        Ok((id, removed))
    }

    /// Positional descent from the root; `None` as soon as a slot is empty
    pub fn find_by_path(&self, path: &[usize]) -> Option<NodeId> {
        self.find_from(self.root, path)
    }

    pub fn find_from(&self, start: NodeId, path: &[usize]) -> Option<NodeId> {
        let mut current = start;
        self.node(current)?;
        for &pos in path {
            current = (*self.node(current)?.children.get(pos)?)?;
        }
        Some(current)
    }

    /// Compact the occupied slots of `id` to the front and drop the rest
    ///
    /// Relative order is kept, but positional paths through `id` change.
    pub fn shrink_to_fit(&mut self, id: NodeId) -> Result<()> {
        let node = self.node_mut(id).ok_or_else(|| Self::not_found(id))?;
        node.children.retain(Option::is_some);
        node.children.shrink_to_fit();
        node.free_slots = 0;
        Ok(())
    }

    /// All nodes below `start`, preorder, slot order
    pub fn descendants(&self, start: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self
            .node(start)
            .map(|n| n.children().rev().collect())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            out.push(id);
            if let Some(node) = self.node(id) {
                stack.extend(node.children().rev());
            }
        }
        out
    }

    fn postorder(&self, start: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![(start, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                out.push(id);
                continue;
            }
            stack.push((id, true));
            if let Some(node) = self.node(id) {
                stack.extend(node.children().rev().map(|child| (child, false)));
            }
        }
        out
    }

    /// Verify parent links, free-slot counters and reachability
    pub fn check_integrity(&self) -> Result<()> {
        let root = self.node(self.root).ok_or_else(|| Self::not_found(self.root))?;
        if root.parent.is_some() {
            return Err(Error::InvalidArgument("root has a parent".to_string()));
        }

        let mut reached = 0usize;
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            reached += 1;
            if reached > self.count {
                return Err(Error::InvalidArgument(
                    "node reachable more than once".to_string(),
                ));
            }
            let node = self.node(id).ok_or_else(|| Self::not_found(id))?;
            let free = node.children.iter().filter(|s| s.is_none()).count();
            if free != node.free_slots {
                return Err(Error::InvalidArgument(format!(
                    "{} counts {} free slots but has {}",
                    id, node.free_slots, free
                )));
            }
            for child in node.children() {
                let child_node = self.node(child).ok_or_else(|| Self::not_found(child))?;
                if child_node.parent != Some(id) {
                    return Err(Error::InvalidArgument(format!(
                        "{} is held by {} but points at {:?}",
                        child, id, child_node.parent
                    )));
                }
                stack.push(child);
            }
        }

        if reached != self.count {
            return Err(Error::InvalidArgument(format!(
                "{} live nodes but only {} reachable",
                self.count, reached
            )));
        }
        Ok(())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Tree<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("root", &self.root)
            .field("nodes", &self.count)
            .field("default_width", &self.default_width)
            .finish()
    }
}
