//! Serialized registry
//!
//! [`SyncRegistry`] wraps a [`Registry`] in one mutex. Every structural or
//! lookup operation holds it for the duration of the call. Reference release
//! needs no lock, and accessor callbacks always run after the lock is
//! dropped, against a copy of the accessor taken while it was held.

use crate::accessor::{Getter, Setter};
use crate::config::RegistryConfig;
use crate::entry::{Entry, EntryRef, EntrySnapshot, StaticEntry};
use crate::error::{Error, Result};
use crate::registry::{Registry, RegistryStats};
use crate::store_disabled;
use crate::value::{PrimitiveType, Value};
use parking_lot::{Mutex, MutexGuard};
use std::borrow::Cow;

/// Early-return `$ret` when `thread-safe` is compiled out
macro_rules! thread_safe_disabled {
    ($ret:expr) => {
        if !cfg!(feature = "thread-safe") {
            return $ret;
        }
    };
}

pub struct SyncRegistry {
    inner: Mutex<Registry>,
}

impl SyncRegistry {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        Ok(Self::from(Registry::new(config)?))
    }

    pub fn with_static(config: RegistryConfig, entries: &[StaticEntry]) -> Result<Self> {
        Ok(Self::from(Registry::with_static(config, entries)?))
    }

    /// Exclusive access to the core for batches of operations
    pub fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock()
    }

    pub fn into_inner(self) -> Registry {
        self.inner.into_inner()
    }

    pub fn add_folder(&self, name: impl Into<Cow<'static, str>>) -> Result<()> {
        thread_safe_disabled!(Ok(()));
        self.inner.lock().add_folder(name)
    }

    pub fn remove_folder(&self, name: &str) -> Result<usize> {
        thread_safe_disabled!(Ok(0));
        self.inner.lock().remove_folder(name)
    }

    pub fn create_entry(
        &self,
        path: &str,
        getter: Option<Getter>,
        setter: Option<Setter>,
    ) -> Result<EntryRef> {
        thread_safe_disabled!(Err(Error::Disabled));
        self.inner.lock().create_entry(path, getter, setter)
    }

    pub fn add_entry(&self, folder: &str, entry: Entry) -> Result<EntryRef> {
        thread_safe_disabled!(Err(Error::Disabled));
        self.inner.lock().add_entry(folder, entry)
    }

    pub fn add_child_entry(&self, parent: &EntryRef, entry: Entry) -> Result<EntryRef> {
        thread_safe_disabled!(Err(Error::Disabled));
        self.inner.lock().add_child_entry(parent, entry)
    }

    pub fn delete_entry(&self, path: &str) -> Result<usize> {
        thread_safe_disabled!(Ok(0));
        self.inner.lock().delete_entry(path)
    }

    pub fn destroy_entry(&self, handle: &EntryRef) -> Result<usize> {
        thread_safe_disabled!(Ok(0));
        self.inner.lock().destroy_entry(handle)
    }

    pub fn replace_entry(&self, path: &str, entry: Entry) -> Result<EntryRef> {
        thread_safe_disabled!(Err(Error::Disabled));
        self.inner.lock().replace_entry(path, entry)
    }

    pub fn shrink_to_fit(&self, path: &str) -> Result<()> {
        thread_safe_disabled!(Ok(()));
        self.inner.lock().shrink_to_fit(path)
    }

    pub fn lookup(&self, path: &str) -> Option<EntryRef> {
        thread_safe_disabled!(None);
        self.inner.lock().lookup(path)
    }

    pub fn try_lookup(&self, path: &str) -> Result<EntryRef> {
        thread_safe_disabled!(Err(Error::Disabled));
        self.inner.lock().try_lookup(path)
    }

    pub fn get_entry(&self, folder: &str, name: &str) -> Option<EntryRef> {
        thread_safe_disabled!(None);
        self.inner.lock().get_entry(folder, name)
    }

    pub fn find_entry(&self, folder: &str, name: &str) -> Option<EntryRef> {
        thread_safe_disabled!(None);
        self.inner.lock().find_entry(folder, name)
    }

    /// Atomic decrement; does not take the registry lock
    pub fn release(&self, handle: &EntryRef) -> Result<usize> {
        thread_safe_disabled!(Ok(0));
        handle.release()
    }

    pub fn read(&self, handle: &EntryRef, ty: PrimitiveType) -> Result<Value> {
        thread_safe_disabled!(Err(Error::Disabled));
        store_disabled!(Err(Error::Disabled));
        let accessor = {
            let _registry = self.inner.lock();
            handle.accessor()
        };
        accessor.read(ty)
    }

    pub fn write(&self, handle: &EntryRef, value: Value) -> Result<()> {
        thread_safe_disabled!(Err(Error::Disabled));
        store_disabled!(Err(Error::Disabled));
        let accessor = {
            let _registry = self.inner.lock();
            handle.accessor()
        };
        accessor.write(value)
    }

    pub fn read_path(&self, path: &str, ty: PrimitiveType) -> Result<Value> {
        thread_safe_disabled!(Err(Error::Disabled));
        let entry = self.try_lookup(path)?;
        let result = entry.accessor().read(ty);
        entry.release()?;
        result
    }

    pub fn write_path(&self, path: &str, value: Value) -> Result<()> {
        thread_safe_disabled!(Err(Error::Disabled));
        let entry = self.try_lookup(path)?;
        let result = entry.accessor().write(value);
        entry.release()?;
        result
    }

    pub fn invalidate(&self, path: &str) -> bool {
        thread_safe_disabled!(false);
        self.inner.lock().invalidate(path)
    }

    pub fn walk(&self) -> Vec<(String, EntryRef)> {
        thread_safe_disabled!(Vec::new());
        self.inner.lock().walk()
    }

    /// Snapshot of every entry; getters run after the lock is released
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        self.walk()
            .into_iter()
            .map(|(path, entry)| entry.snapshot(path))
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        thread_safe_disabled!(RegistryStats::default());
        self.inner.lock().stats()
    }
}

impl From<Registry> for SyncRegistry {
    fn from(registry: Registry) -> Self {
        Self {
            inner: Mutex::new(registry),
        }
    }
}

impl std::fmt::Debug for SyncRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRegistry").finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "store", feature = "thread-safe"))]
mod tests {
    use super::*;
    use crate::accessor::Accessor;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;

    static TICKS: AtomicU64 = AtomicU64::new(0);

    fn get_ticks() -> u64 {
        TICKS.load(Ordering::SeqCst)
    }

    fn set_ticks(v: u64) {
        TICKS.store(v, Ordering::SeqCst);
    }

    const STATICS: &[StaticEntry] = &[StaticEntry::new(
        "sched",
        "ticks",
        Accessor::read_write(Getter::U64(get_ticks), Setter::U64(set_ticks)),
    )];

    #[test]
    fn test_serialized_roundtrip() -> Result<()> {
        let reg = SyncRegistry::with_static(RegistryConfig::default(), STATICS)?;
        reg.write_path("sched/ticks", Value::U64(42))?;
        let entry = reg.try_lookup("sched/ticks")?;
        assert_eq!(reg.read(&entry, PrimitiveType::U64)?, Value::U64(42));
        reg.release(&entry)?;
        assert_eq!(entry.refcount(), 0);
        Ok(())
    }

    #[test]
    fn test_parallel_lookups_balance() -> Result<()> {
        let reg = Arc::new(SyncRegistry::with_static(RegistryConfig::default(), STATICS)?);
        reg.add_folder("net")?;

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || -> Result<()> {
                    let path = format!("net/q{}", i);
                    reg.create_entry(&path, Some(Getter::U64(get_ticks)), None)?;
                    for _ in 0..200 {
                        let entry = reg.try_lookup("sched/ticks")?;
                        reg.release(&entry)?;
                    }
                    reg.delete_entry(&path)?;
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked")?;
        }

        let entry = reg.find_entry("sched", "ticks").unwrap();
        assert_eq!(entry.refcount(), 0);
        assert_eq!(reg.stats().entries, 1);
        Ok(())
    }

    #[test]
    fn test_lock_for_batches() -> Result<()> {
        let reg = SyncRegistry::new(RegistryConfig::default())?;
        {
            let mut core = reg.lock();
            core.add_folder("mem")?;
            core.create_entry("mem/a", Some(Getter::U64(get_ticks)), None)?;
        }
        assert!(reg.lookup("mem/a").map(|e| e.release().is_ok()).unwrap_or(false));
        assert_eq!(reg.into_inner().stats().entries, 1);
        Ok(())
    }
}
