//! Tree nodes and their identifiers

use crate::error::{Error, Result};
use std::fmt;

/// Handle to a node in a [`super::Tree`] arena
///
/// The generation changes every time an arena slot is reused, so a handle to
/// a removed node never aliases whatever is stored there later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node(index={}, gen={})", self.index, self.generation)
    }
}

/// A node: a value, a non-owning parent link and a growable slot array
///
/// Empty child slots are tombstones left by removal. `free_slots` is kept
/// equal to the number of `None` slots at all times.
#[derive(Debug)]
pub struct Node<T> {
    pub(crate) value: T,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<Option<NodeId>>,
    pub(crate) free_slots: usize,
}

impl<T> Node<T> {
    /// Allocate a node with `width` empty child slots
    pub(crate) fn new(value: T, width: usize) -> Result<Self> {
        let mut children = Vec::new();
        children.try_reserve_exact(width).map_err(|e| {
            Error::OutOfMemory(format!("child table of width {}: {}", width, e))
        })?;
        children.resize(width, None);
        Ok(Self {
            value,
            parent: None,
            children,
            free_slots: width,
        })
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Raw slot array, tombstones included
    pub fn slots(&self) -> &[Option<NodeId>] {
        &self.children
    }

    /// Occupied children in slot order
    pub fn children(&self) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        self.children.iter().flatten().copied()
    }

    pub fn slot_count(&self) -> usize {
        self.children.len()
    }

    pub fn free_slot_count(&self) -> usize {
        self.free_slots
    }

    pub fn child_count(&self) -> usize {
        self.children.len() - self.free_slots
    }

    /// O(1): a node is a leaf iff every slot is free
    pub fn is_leaf(&self) -> bool {
        self.free_slots == self.children.len()
    }

    pub(crate) fn slot_of(&self, child: NodeId) -> Option<usize> {
        self.children.iter().position(|slot| *slot == Some(child))
    }

    pub(crate) fn first_free_slot(&self) -> Option<usize> {
        if self.free_slots == 0 {
            return None;
        }
        self.children.iter().position(Option::is_none)
    }

    /// Return the first free slot, growing by `growth_needed()` if none
    ///
    /// Capacity for the growth must already be reserved.
    pub(crate) fn claim_slot(&mut self) -> usize {
        if let Some(pos) = self.first_free_slot() {
            return pos;
        }
        let pos = self.children.len();
        let growth = self.growth_needed();
        self.children.resize(pos + growth, None);
        self.free_slots += growth;
        pos
    }

    pub(crate) fn occupy(&mut self, pos: usize, child: NodeId) {
        if let Some(slot) = self.children.get_mut(pos) {
            if slot.is_none() {
                self.free_slots -= 1;
            }
            *slot = Some(child);
        }
    }

    pub(crate) fn vacate(&mut self, pos: usize) {
        if let Some(slot) = self.children.get_mut(pos) {
            if slot.take().is_some() {
                self.free_slots += 1;
            }
        }
    }

    /// Slots to add on the next insert, or 0 if a free slot exists
    ///
    /// Capacity doubles; a table shrunk to zero grows back to one slot.
    pub(crate) fn growth_needed(&self) -> usize {
        if self.free_slots > 0 {
            0
        } else {
            self.children.len().max(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        let id = NodeId::new(5, 2);
        assert_eq!(id.index(), 5);
        assert_eq!(id.generation(), 2);
        assert_eq!(id.to_string(), "Node(index=5, gen=2)");
    }

    #[test]
    fn test_new_node_is_empty_leaf() -> Result<()> {
        let node = Node::new("root", 2)?;
        assert_eq!(node.slot_count(), 2);
        assert_eq!(node.free_slot_count(), 2);
        assert_eq!(node.child_count(), 0);
        assert!(node.is_leaf());
        assert_eq!(node.first_free_slot(), Some(0));
        assert_eq!(node.growth_needed(), 0);
        Ok(())
    }

    #[test]
    fn test_growth_needed_doubles() -> Result<()> {
        let mut node = Node::new((), 2)?;
        node.children = vec![Some(NodeId::new(1, 0)), Some(NodeId::new(2, 0))];
        node.free_slots = 0;
        assert_eq!(node.growth_needed(), 2);
        assert_eq!(node.first_free_slot(), None);
        assert_eq!(node.slot_of(NodeId::new(2, 0)), Some(1));

        let empty = Node::new((), 0)?;
        assert_eq!(empty.growth_needed(), 1);
        Ok(())
    }

    #[test]
    fn test_claim_occupy_vacate() -> Result<()> {
        let mut node = Node::new((), 1)?;
        let pos = node.claim_slot();
        node.occupy(pos, NodeId::new(1, 0));
        assert_eq!(node.free_slot_count(), 0);

        // Full: claiming doubles the table
        let pos = node.claim_slot();
        assert_eq!(pos, 1);
        assert_eq!(node.slot_count(), 2);
        node.occupy(pos, NodeId::new(2, 0));
        assert_eq!(node.free_slot_count(), 0);

        node.vacate(0);
        node.vacate(0);
        assert_eq!(node.free_slot_count(), 1);
        assert_eq!(node.children().collect::<Vec<_>>(), vec![NodeId::new(2, 0)]);
        Ok(())
    }
}
