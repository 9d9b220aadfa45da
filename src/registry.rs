//! The registry: folders, static initialization and path lookup
//!
//! `Registry` is the unsynchronized core. Structural changes take `&mut self`
//! and the caller provides exclusion (see [`crate::SyncRegistry`]). Lookups
//! take `&self`; the handles they return are counted and must be handed back
//! with [`Registry::release`].

use crate::accessor::{Accessor, Getter, Setter};
use crate::cache::{CacheStats, PathCache};
use crate::config::RegistryConfig;
use crate::entry::{Entry, EntryRef, EntrySnapshot, Origin, StaticEntry};
use crate::error::{Error, Result};
use crate::folder::Folder;
use crate::path;
use crate::store_disabled;
use crate::value::{PrimitiveType, Value};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::{debug, info};

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub folders: usize,
    pub entries: usize,
    pub static_entries: usize,
    pub dynamic_entries: usize,
    pub cache: Option<CacheStats>,
}

pub struct Registry {
    config: RegistryConfig,
    folders: Vec<Folder>,
    cache: Option<PathCache>,
}

impl Registry {
    /// Create an empty registry
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let cache = if config.cache_enabled {
            Some(PathCache::new(
                config.cache_buckets,
                config.cache_bucket_capacity,
            )?)
        } else {
            None
        };
        Ok(Self {
            config,
            folders: Vec::new(),
            cache,
        })
    }

    /// Create a registry populated from a static initialization list
    ///
    /// Folders named by the records are created as static folders. A record
    /// whose name is a path is attached below the entry named by its prefix,
    /// which must appear earlier in the list.
    pub fn with_static(config: RegistryConfig, entries: &[StaticEntry]) -> Result<Self> {
        let mut registry = Self::new(config)?;
        store_disabled!(Ok(registry));

        for record in entries {
            let segments = path::split(record.name)?;
            let (&leaf, parents) = match segments.split_last() {
                Some(split) => split,
                None => continue,
            };
            let entry = Entry::from_static(leaf, record.accessor)?;

            let index = match registry.folder_index(record.folder) {
                Some(index) => index,
                None => {
                    let mut folder = Folder::new_static(record.folder, registry.config.default_width)?;
                    folder.set_watcher_capacity(registry.config.watcher_capacity);
                    registry.folders.try_reserve(1)?;
                    registry.folders.push(folder);
                    registry.folders.len() - 1
                }
            };
            let folder = &mut registry.folders[index];
            if parents.is_empty() {
                folder.add_entry(entry)?;
            } else {
                let parent = folder.resolve(parents).ok_or_else(|| {
                    Error::NotFound(format!(
                        "parent of static entry '{}/{}' is not declared before it",
                        record.folder, record.name
                    ))
                })?;
                folder.add_child(&parent, entry)?;
            }
        }

        info!(
            folders = registry.folders.len(),
            entries = entries.len(),
            "Registry initialized from static list"
        );
        Ok(registry)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&PathCache> {
        self.cache.as_ref()
    }

    fn folder_index(&self, name: &str) -> Option<usize> {
        self.folders.iter().position(|f| f.name() == name)
    }

    fn require_folder(&self, name: &str) -> Result<usize> {
        self.folder_index(name)
            .ok_or_else(|| Error::NotFound(format!("folder '{}'", name)))
    }

    pub fn folder(&self, name: &str) -> Option<&Folder> {
        store_disabled!(None);
        self.folder_index(name).map(|i| &self.folders[i])
    }

    pub fn folders(&self) -> impl Iterator<Item = &Folder> + '_ {
        self.folders.iter()
    }

    /// Create an empty dynamic folder
    pub fn add_folder(&mut self, name: impl Into<Cow<'static, str>>) -> Result<()> {
        store_disabled!(Ok(()));
        let name = name.into();
        if self.folder_index(&name).is_some() {
            return Err(Error::AlreadyExists(format!("folder '{}'", name)));
        }
        let mut folder = Folder::new(name, self.config.default_width)?;
        folder.set_watcher_capacity(self.config.watcher_capacity);
        self.folders.try_reserve(1)?;
        info!(folder = %folder.name(), "Folder added");
        self.folders.push(folder);
        Ok(())
    }

    /// Remove a dynamic folder and detach everything in it
    ///
    /// Returns the number of entries detached.
    pub fn remove_folder(&mut self, name: &str) -> Result<usize> {
        store_disabled!(Ok(0));
        let index = self.require_folder(name)?;
        if self.folders[index].is_static() {
            return Err(Error::InvalidArgument(format!(
                "folder '{}' is static",
                name
            )));
        }
        let removed = self.folders[index].clear()?;
        self.folders.remove(index);
        if let Some(cache) = &self.cache {
            cache.invalidate_prefix(name);
        }
        info!(folder = %name, removed = removed.len(), "Folder removed");
        Ok(removed.len())
    }

    /// Create a dynamic entry at `path` (`folder/name` or `folder/parent/name`)
    ///
    /// The folder and any parent entries must exist. The returned handle is
    /// not counted; it identifies the entry for [`Registry::destroy_entry`].
    pub fn create_entry(
        &mut self,
        path: &str,
        getter: Option<Getter>,
        setter: Option<Setter>,
    ) -> Result<EntryRef> {
        store_disabled!(Err(Error::Disabled));
        let (folder_name, segments) = path::split_entry_path(path)?;
        let (leaf, parents) = segments
            .split_last()
            .ok_or_else(|| Error::InvalidArgument(format!("path '{}' has no entry", path)))?;
        let entry = Entry::new(leaf.to_string(), Accessor::new(getter, setter)?)?;

        let index = self.require_folder(folder_name)?;
        let folder = &mut self.folders[index];
        let created = if parents.is_empty() {
            folder.add_entry(entry)?
        } else {
            let parent = folder
                .resolve(parents)
                .ok_or_else(|| Error::NotFound(format!("parent of '{}'", path)))?;
            folder.add_child(&parent, entry)?
        };
        if let Some(cache) = &self.cache {
            cache.invalidate(&path::join(&path::split(path)?));
        }
        Ok(created)
    }

    /// Attach a prebuilt entry at the top level of `folder`
    pub fn add_entry(&mut self, folder: &str, entry: Entry) -> Result<EntryRef> {
        store_disabled!(Err(Error::Disabled));
        let index = self.require_folder(folder)?;
        self.folders[index].add_entry(entry)
    }

    /// Attach a prebuilt entry below `parent`
    pub fn add_child_entry(&mut self, parent: &EntryRef, entry: Entry) -> Result<EntryRef> {
        store_disabled!(Err(Error::Disabled));
        let index = self.folder_of(parent)?;
        self.folders[index].add_child(parent, entry)
    }

    fn folder_of(&self, entry: &EntryRef) -> Result<usize> {
        self.folders
            .iter()
            .position(|f| f.contains(entry))
            .ok_or_else(|| Error::NotFound(format!("entry '{}' is not registered", entry.name())))
    }

    fn forget(&self, removed: &[EntryRef]) {
        if let Some(cache) = &self.cache {
            for entry in removed {
                cache.invalidate_entry(entry);
            }
        }
    }

    /// Delete the entry at `path` and its subtree; returns how many were detached
    pub fn delete_entry(&mut self, path: &str) -> Result<usize> {
        store_disabled!(Ok(0));
        let entry = self.resolve(path)?;
        self.destroy_entry(&entry)
    }

    /// Delete the entry behind `handle` and its subtree
    ///
    /// Outstanding counted handles keep working but fail with `NoAccessor`;
    /// the entry is freed on their final release.
    pub fn destroy_entry(&mut self, handle: &EntryRef) -> Result<usize> {
        store_disabled!(Ok(0));
        let index = self.folder_of(handle)?;
        let removed = self.folders[index].delete_entry(handle)?;
        self.forget(&removed);
        Ok(removed.len())
    }

    /// Replace the entry at `path` with `entry`, keeping its slot
    pub fn replace_entry(&mut self, path: &str, entry: Entry) -> Result<EntryRef> {
        store_disabled!(Err(Error::Disabled));
        let old = self.resolve(path)?;
        let index = self.folder_of(&old)?;
        let (fresh, removed) = self.folders[index].replace_entry(&old, entry)?;
        self.forget(&removed);
        if let Some(cache) = &self.cache {
            // The new entry may carry a different name than the one it replaced
            cache.invalidate_prefix(&path::join(&path::split(path)?));
        }
        Ok(fresh)
    }

    /// Compact the child slots below `path` (a folder or an entry)
    pub fn shrink_to_fit(&mut self, path: &str) -> Result<()> {
        store_disabled!(Ok(()));
        let segments = path::split(path)?;
        let index = self.require_folder(segments[0])?;
        let folder = &mut self.folders[index];
        if segments.len() == 1 {
            return folder.shrink_to_fit(None);
        }
        let entry = folder
            .resolve(&segments[1..])
            .ok_or_else(|| Error::NotFound(format!("entry '{}'", path)))?;
        folder.shrink_to_fit(Some(&entry))
    }

    /// Resolve `path` by tree descent, without the cache or a reference
    pub fn resolve(&self, path: &str) -> Result<EntryRef> {
        store_disabled!(Err(Error::Disabled));
        let (folder, segments) = path::split_entry_path(path)?;
        let index = self.require_folder(folder)?;
        self.folders[index]
            .resolve(&segments)
            .ok_or_else(|| Error::NotFound(format!("entry '{}'", path)))
    }

    /// Resolve `path` through the path cache and take a counted reference
    pub fn resolve_cached(&self, path: &str) -> Result<EntryRef> {
        store_disabled!(Err(Error::Disabled));
        let key = path::join(&path::split(path)?);
        let cache = match &self.cache {
            Some(cache) => cache,
            None => return self.resolve_counted(path),
        };

        if let Some(entry) = cache.get(&key) {
            if entry.acquire().is_ok() {
                return Ok(entry);
            }
            cache.invalidate(&key);
        }

        let entry = self.resolve_counted(path)?;
        cache.insert(&key, entry.clone());
        debug!(path = %key, "Path cached");
        Ok(entry)
    }

    fn resolve_counted(&self, path: &str) -> Result<EntryRef> {
        let entry = self.resolve(path)?;
        entry.acquire()?;
        Ok(entry)
    }

    /// Counted lookup; `None` when the path does not resolve
    pub fn lookup(&self, path: &str) -> Option<EntryRef> {
        store_disabled!(None);
        self.try_lookup(path).ok()
    }

    /// Counted lookup that says why it failed
    pub fn try_lookup(&self, path: &str) -> Result<EntryRef> {
        store_disabled!(Err(Error::Disabled));
        self.resolve_cached(path)
    }

    /// Top-level entry of `folder` by name, counted
    pub fn get_entry(&self, folder: &str, name: &str) -> Option<EntryRef> {
        store_disabled!(None);
        self.folder(folder)?.get_entry(name)
    }

    /// Top-level entry of `folder` by name, not counted
    pub fn find_entry(&self, folder: &str, name: &str) -> Option<EntryRef> {
        store_disabled!(None);
        self.folder(folder)?.find_entry(name)
    }

    /// Entry by child-slot positions within `folder`, not counted
    pub fn find_by_position(&self, folder: &str, positions: &[usize]) -> Option<EntryRef> {
        store_disabled!(None);
        self.folder(folder)?.find_by_position(positions)
    }

    /// Hand back a counted reference; returns the remaining count
    pub fn release(&self, handle: &EntryRef) -> Result<usize> {
        store_disabled!(Ok(0));
        handle.release()
    }

    pub fn read(&self, handle: &EntryRef, ty: PrimitiveType) -> Result<Value> {
        store_disabled!(Err(Error::Disabled));
        handle.read(ty)
    }

    pub fn write(&self, handle: &EntryRef, value: Value) -> Result<()> {
        store_disabled!(Err(Error::Disabled));
        handle.write(value)
    }

    /// Lookup, read and release in one call
    pub fn read_path(&self, path: &str, ty: PrimitiveType) -> Result<Value> {
        store_disabled!(Err(Error::Disabled));
        let entry = self.try_lookup(path)?;
        let result = entry.read(ty);
        entry.release()?;
        result
    }

    /// Lookup, write and release in one call
    pub fn write_path(&self, path: &str, value: Value) -> Result<()> {
        store_disabled!(Err(Error::Disabled));
        let entry = self.try_lookup(path)?;
        let result = entry.write(value);
        entry.release()?;
        result
    }

    /// Drop `path` from the cache. Returns true if it was cached.
    pub fn invalidate(&self, path: &str) -> bool {
        store_disabled!(false);
        let Ok(segments) = path::split(path) else {
            return false;
        };
        self.cache
            .as_ref()
            .map_or(false, |cache| cache.invalidate(&path::join(&segments)))
    }

    /// Every entry with its full path, folder by folder, depth-first
    pub fn walk(&self) -> Vec<(String, EntryRef)> {
        store_disabled!(Vec::new());
        self.folders.iter().flat_map(Folder::walk).collect()
    }

    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        self.walk()
            .into_iter()
            .map(|(path, entry)| entry.snapshot(path))
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        store_disabled!(RegistryStats::default());
        let walked = self.walk();
        let static_entries = walked
            .iter()
            .filter(|(_, e)| e.origin() == Origin::Static)
            .count();
        RegistryStats {
            folders: self.folders.len(),
            entries: walked.len(),
            static_entries,
            dynamic_entries: walked.len() - static_entries,
            cache: self.cache.as_ref().map(PathCache::stats),
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("folders", &self.folders)
            .field("cache", &self.cache)
            .finish()
    }
}
