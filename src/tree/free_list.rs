//! Free arena indices

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Recycled arena indices
///
/// Uses a min-heap so the lowest freed index is reused first, which keeps
/// the arena dense and allocation order deterministic.
#[derive(Debug, Default)]
pub struct FreeList {
    free: BinaryHeap<Reverse<u32>>,
}

impl FreeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowest free index, without taking it
    pub fn peek(&self) -> Option<u32> {
        self.free.peek().map(|Reverse(index)| *index)
    }

    pub fn pop(&mut self) -> Option<u32> {
        self.free.pop().map(|Reverse(index)| index)
    }

    pub fn push(&mut self, index: u32) {
        self.free.push(Reverse(index));
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}
