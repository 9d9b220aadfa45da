//! Folders: one namespace of entries per publishing subsystem
//!
//! A folder owns a [`Tree`] whose root carries no entry. The root's children
//! are the folder's top-level entries in slot order; an entry that owns
//! children is simply a non-leaf node.

use crate::entry::{Entry, EntryRef, Origin, DEFAULT_WATCHER_CAPACITY};
use crate::error::{Error, Result};
use crate::path;
use crate::tree::{NodeId, Tree};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Folder {
    name: Cow<'static, str>,
    origin: Origin,
    tree: Tree<Option<EntryRef>>,
    watcher_capacity: usize,
}

impl Folder {
    /// Create a dynamic folder
    pub fn new(name: impl Into<Cow<'static, str>>, default_width: usize) -> Result<Self> {
        Self::with_origin(name.into(), default_width, Origin::Dynamic)
    }

    /// Create a folder declared by the static initialization list
    pub fn new_static(name: &'static str, default_width: usize) -> Result<Self> {
        Self::with_origin(Cow::Borrowed(name), default_width, Origin::Static)
    }

    fn with_origin(name: Cow<'static, str>, default_width: usize, origin: Origin) -> Result<Self> {
        path::validate_name(&name)?;
        let tree = Tree::new(None, default_width)?;
        Ok(Self {
            name,
            origin,
            tree,
            watcher_capacity: DEFAULT_WATCHER_CAPACITY,
        })
    }

    /// Watcher capacity given to entries attached from now on
    pub fn set_watcher_capacity(&mut self, capacity: usize) {
        self.watcher_capacity = capacity;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn is_static(&self) -> bool {
        self.origin == Origin::Static
    }

    /// Number of entries at every depth
    pub fn len(&self) -> usize {
        self.tree.node_count() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_leaf(self.tree.root())
    }

    pub fn tree(&self) -> &Tree<Option<EntryRef>> {
        &self.tree
    }

    fn entry_at(&self, id: NodeId) -> Option<&EntryRef> {
        self.tree.get(id).and_then(Option::as_ref)
    }

    /// Top-level entries in slot order
    pub fn entries(&self) -> impl Iterator<Item = &EntryRef> + '_ {
        self.tree
            .children(self.tree.root())
            .filter_map(move |id| self.entry_at(id))
    }

    fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.tree
            .children(parent)
            .find(|&id| self.entry_at(id).map_or(false, |e| e.name() == name))
    }

    /// Linear scan of the top level by name, without taking a reference
    pub fn find_entry(&self, name: &str) -> Option<EntryRef> {
        self.entries().find(|e| e.name() == name).cloned()
    }

    /// [`Folder::find_entry`] plus a counted reference
    pub fn get_entry(&self, name: &str) -> Option<EntryRef> {
        let entry = self.find_entry(name)?;
        entry.acquire().ok()?;
        Some(entry)
    }

    /// Tree node holding `entry`, if it belongs to this folder
    pub fn node_of(&self, entry: &EntryRef) -> Option<NodeId> {
        self.tree
            .descendants(self.tree.root())
            .into_iter()
            .find(|&id| self.entry_at(id).map_or(false, |e| Arc::ptr_eq(e, entry)))
    }

    pub fn contains(&self, entry: &EntryRef) -> bool {
        self.node_of(entry).is_some()
    }

    /// Descend by name; an empty path names the folder root
    pub fn resolve_node(&self, segments: &[&str]) -> Option<NodeId> {
        segments.iter().try_fold(self.tree.root(), |node, segment| {
            self.child_named(node, segment)
        })
    }

    /// Resolve a folder-relative path to its entry, without taking a reference
    pub fn resolve(&self, segments: &[&str]) -> Option<EntryRef> {
        if segments.is_empty() {
            return None;
        }
        let node = self.resolve_node(segments)?;
        self.entry_at(node).cloned()
    }

    /// Positional lookup by child-slot indices from the folder root
    pub fn find_by_position(&self, positions: &[usize]) -> Option<EntryRef> {
        let node = self.tree.find_by_path(positions)?;
        self.entry_at(node).cloned()
    }

    /// Attach `entry` at the top level
    pub fn add_entry(&mut self, entry: Entry) -> Result<EntryRef> {
        let root = self.tree.root();
        self.insert_under(root, entry)
    }

    /// Attach `entry` below `parent`, which must belong to this folder
    pub fn add_child(&mut self, parent: &EntryRef, entry: Entry) -> Result<EntryRef> {
        let node = self.require_node(parent)?;
        self.insert_under(node, entry)
    }

    fn require_node(&self, entry: &EntryRef) -> Result<NodeId> {
        self.node_of(entry).ok_or_else(|| {
            Error::NotFound(format!(
                "entry '{}' is not in folder '{}'",
                entry.name(),
                self.name
            ))
        })
    }

    fn insert_under(&mut self, parent: NodeId, entry: Entry) -> Result<EntryRef> {
        if self.child_named(parent, entry.name()).is_some() {
            return Err(Error::AlreadyExists(format!(
                "entry '{}' in folder '{}'",
                entry.name(),
                self.name
            )));
        }
        let entry = Arc::new(entry);
        self.tree.add_child(parent, Some(Arc::clone(&entry)))?;
        entry.set_watcher_capacity(self.watcher_capacity);
        entry.attach();
        debug!(folder = %self.name, entry = %entry.name(), origin = ?entry.origin(), "Entry attached");
        Ok(entry)
    }

    fn subtree_has_static(&self, node: NodeId) -> bool {
        std::iter::once(node)
            .chain(self.tree.descendants(node))
            .any(|id| self.entry_at(id).map_or(false, |e| e.is_static()))
    }

    fn refuse_static(&self, node: NodeId, what: &str) -> Result<()> {
        if self.subtree_has_static(node) {
            warn!(folder = %self.name, "Refused to {} a static entry", what);
            return Err(Error::InvalidArgument(format!(
                "cannot {} static entries in folder '{}'",
                what, self.name
            )));
        }
        Ok(())
    }

    fn detach_all(removed: Vec<Option<EntryRef>>) -> Vec<EntryRef> {
        let removed: Vec<EntryRef> = removed.into_iter().flatten().collect();
        for entry in &removed {
            entry.detach();
        }
        removed
    }

    /// Detach `entry` and its whole subtree
    ///
    /// Returns the detached entries in postorder. Static entries cannot be
    /// deleted; the folder is left untouched in that case.
    pub fn delete_entry(&mut self, entry: &EntryRef) -> Result<Vec<EntryRef>> {
        let node = self.require_node(entry)?;
        self.refuse_static(node, "delete")?;
        let removed = Self::detach_all(self.tree.remove(node)?);
        debug!(folder = %self.name, entry = %entry.name(), removed = removed.len(), "Entry deleted");
        Ok(removed)
    }

    /// Swap `old` (and its subtree) for `new` in the same slot
    ///
    /// Returns the new handle and the detached entries.
    pub fn replace_entry(
        &mut self,
        old: &EntryRef,
        new: Entry,
    ) -> Result<(EntryRef, Vec<EntryRef>)> {
        let node = self.require_node(old)?;
        self.refuse_static(node, "replace")?;
        if new.name() != old.name() {
            if let Some(parent) = self.tree.parent(node) {
                if self.child_named(parent, new.name()).is_some() {
                    return Err(Error::AlreadyExists(format!(
                        "entry '{}' in folder '{}'",
                        new.name(),
                        self.name
                    )));
                }
            }
        }

        let new = Arc::new(new);
        let (_, removed) = self.tree.replace(node, Some(Arc::clone(&new)))?;
        new.set_watcher_capacity(self.watcher_capacity);
        new.attach();
        let removed = Self::detach_all(removed);
        debug!(folder = %self.name, old = %old.name(), new = %new.name(), "Entry replaced");
        Ok((new, removed))
    }

    /// Detach every entry. Fails if any of them is static.
    pub fn clear(&mut self) -> Result<Vec<EntryRef>> {
        let root = self.tree.root();
        self.refuse_static(root, "clear")?;
        let removed = Self::detach_all(self.tree.clear());
        info!(folder = %self.name, removed = removed.len(), "Folder cleared");
        Ok(removed)
    }

    /// Compact the child slots of `parent`, or of the folder root if `None`
    pub fn shrink_to_fit(&mut self, parent: Option<&EntryRef>) -> Result<()> {
        let node = match parent {
            Some(entry) => self.require_node(entry)?,
            None => self.tree.root(),
        };
        self.tree.shrink_to_fit(node)
    }

    /// Every entry with its full path (`folder/a/b`), depth-first in slot order
    pub fn walk(&self) -> Vec<(String, EntryRef)> {
        let mut out = Vec::with_capacity(self.len());
        let mut stack: Vec<(NodeId, String)> = self
            .tree
            .children(self.tree.root())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|id| (id, self.name.to_string()))
            .collect();
        while let Some((id, prefix)) = stack.pop() {
            let Some(entry) = self.entry_at(id) else {
                continue;
            };
            let full = format!("{}{}{}", prefix, path::SEPARATOR, entry.name());
            let children: Vec<NodeId> = self.tree.children(id).collect();
            stack.extend(children.into_iter().rev().map(|c| (c, full.clone())));
            out.push((full, Arc::clone(entry)));
        }
        out
    }
}

impl std::fmt::Debug for Folder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Folder")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("entries", &self.len())
            .finish()
    }
}
