//! Named, typed, reference-counted properties
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──attach──→ Registered ⇄ Referenced
//!                                │ detach (accessor cleared)
//!                                ↓
//!                            Detached ──last release──→ Freed (dynamic only)
//! ```
//!
//! The reference count and the lifecycle share one atomic word, so a
//! count can only move while the entry is attached or draining. The
//! accessor sits behind a reader/writer lock and is copied out before a
//! callback runs, so a single read or write always sees one consistent
//! (tag, callback) pair and no lock is held while subsystem code executes.

use crate::accessor::{Accessor, AccessorKind, Getter, Setter};
use crate::error::{Error, Result};
use crate::path;
use crate::value::{Primitive, PrimitiveType, Value};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared handle to an entry
pub type EntryRef = Arc<Entry>;

/// Default number of watchers an entry accepts
pub const DEFAULT_WATCHER_CAPACITY: usize = 4;

const UNATTACHED: u8 = 0;
const ATTACHED: u8 = 1;
const DETACHED: u8 = 2;
const FREED: u8 = 3;

/// Lifecycle in the top byte, reference count in the rest
const STATE_SHIFT: u32 = 56;
const COUNT_MASK: u64 = (1 << STATE_SHIFT) - 1;

const fn pack(state: u8, count: u64) -> u64 {
    ((state as u64) << STATE_SHIFT) | count
}

const fn unpack(word: u64) -> (u8, u64) {
    ((word >> STATE_SHIFT) as u8, word & COUNT_MASK)
}

/// Where an entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Declared in the initialization list; lives as long as the registry
    Static,
    /// Created at runtime; reclaimed once detached and unreferenced
    Dynamic,
}

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Uninitialized,
    Registered,
    Referenced,
    Detached,
    Freed,
}

/// Token returned by [`Entry::watch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

#[derive(Debug)]
struct Watchers {
    capacity: usize,
    list: Vec<(WatchId, Setter)>,
}

static NEXT_WATCH_ID: AtomicU64 = AtomicU64::new(1);

/// A named property with an accessor and a reference count
pub struct Entry {
    name: Cow<'static, str>,
    origin: Origin,
    accessor: RwLock<Accessor>,
    word: AtomicU64,
    watchers: Mutex<Watchers>,
}

impl Entry {
    /// Create a dynamic entry
    pub fn new(name: impl Into<Cow<'static, str>>, accessor: Accessor) -> Result<Self> {
        Self::with_origin(name.into(), accessor, Origin::Dynamic)
    }

    /// Create a static entry from an initialization-list record
    pub fn from_static(name: &'static str, accessor: Accessor) -> Result<Self> {
        Self::with_origin(Cow::Borrowed(name), accessor, Origin::Static)
    }

    fn with_origin(name: Cow<'static, str>, accessor: Accessor, origin: Origin) -> Result<Self> {
        path::validate_name(&name)?;
        if !accessor.is_consistent() {
            return Err(Error::InvalidArgument(format!(
                "accessor of '{}' disagrees with its type tag",
                name
            )));
        }
        Ok(Self {
            name,
            origin,
            accessor: RwLock::new(accessor),
            word: AtomicU64::new(pack(UNATTACHED, 0)),
            watchers: Mutex::new(Watchers {
                capacity: DEFAULT_WATCHER_CAPACITY,
                list: Vec::new(),
            }),
        })
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

    /// Copy of the current accessor
    pub fn accessor(&self) -> Accessor {
        *self.accessor.read()
    }

    pub fn ty(&self) -> Option<PrimitiveType> {
        self.accessor.read().ty()
    }

    fn load(&self) -> (u8, u64) {
        unpack(self.word.load(Ordering::SeqCst))
    }

    pub fn refcount(&self) -> usize {
        self.load().1 as usize
    }

    pub fn is_attached(&self) -> bool {
        self.load().0 == ATTACHED
    }

    pub fn state(&self) -> EntryState {
        match self.load() {
            (UNATTACHED, _) => EntryState::Uninitialized,
            (ATTACHED, 0) => EntryState::Registered,
            (ATTACHED, _) => EntryState::Referenced,
            (DETACHED, _) => EntryState::Detached,
            _ => EntryState::Freed,
        }
    }

    /// Install a getter. A different type drops the setter and all watchers.
    pub fn update_getter(&self, getter: Getter) {
        let mut accessor = self.accessor.write();
        if accessor.update_getter(getter) {
            self.watchers.lock().list.clear();
            debug!(entry = %self.name, ty = %getter.ty(), "Getter changed type, setter cleared");
        }
    }

    /// Install a setter. A different type drops the getter and all watchers.
    pub fn update_setter(&self, setter: Setter) {
        let mut accessor = self.accessor.write();
        if accessor.update_setter(setter) {
            self.watchers.lock().list.clear();
            debug!(entry = %self.name, ty = %setter.ty(), "Setter changed type, getter cleared");
        }
    }

    pub fn clear_getter(&self) {
        self.accessor.write().clear_getter();
    }

    pub fn clear_setter(&self) {
        self.accessor.write().clear_setter();
    }

    /// Invoke the getter into an untyped buffer; returns bytes written
    pub fn get_value(&self, out: &mut [u8]) -> Result<usize> {
        let accessor = self.accessor();
        accessor.get_value(out)
    }

    /// Feed exactly `ty().size()` bytes from `input` to the setter
    pub fn set_value(&self, input: &[u8]) -> Result<()> {
        let accessor = self.accessor();
        accessor.set_value(input)
    }

    pub fn read(&self, ty: PrimitiveType) -> Result<Value> {
        let accessor = self.accessor();
        accessor.read(ty)
    }

    pub fn write(&self, value: Value) -> Result<()> {
        let accessor = self.accessor();
        accessor.write(value)
    }

    /// Typed read into a Rust scalar
    pub fn get<T: Primitive>(&self) -> Result<T> {
        let value = self.read(T::TYPE)?;
        T::from_value(value).ok_or(Error::TypeMismatch {
            expected: T::TYPE,
            found: value.ty(),
        })
    }

    pub fn set<T: Primitive>(&self, value: T) -> Result<()> {
        self.write(value.into_value())
    }

    /// Take a counted reference. Fails with `NotFound` unless attached.
    ///
    /// Returns the new count.
    pub fn acquire(&self) -> Result<usize> {
        let update = self
            .word
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |word| {
                let (state, count) = unpack(word);
                (state == ATTACHED && count < COUNT_MASK).then(|| pack(state, count + 1))
            });
        match update {
            Ok(prev) => Ok(unpack(prev).1 as usize + 1),
            Err(word) if unpack(word).0 == ATTACHED => Err(Error::OutOfMemory(format!(
                "entry '{}' reference count saturated",
                self.name
            ))),
            Err(_) => Err(Error::NotFound(format!(
                "entry '{}' is no longer attached",
                self.name
            ))),
        }
    }

    /// Drop a counted reference
    ///
    /// Releasing with a count of zero is rejected and leaves the count at
    /// zero. The last release of a detached dynamic entry frees it.
    pub fn release(&self) -> Result<usize> {
        let dynamic = self.origin == Origin::Dynamic;
        let update = self
            .word
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |word| {
                let (state, count) = unpack(word);
                let count = count.checked_sub(1)?;
                let state = if state == DETACHED && count == 0 && dynamic {
                    FREED
                } else {
                    state
                };
                Some(pack(state, count))
            });
        match update {
            Ok(prev) => {
                let (state, count) = unpack(prev);
                if state == DETACHED && count == 1 && dynamic {
                    debug!(entry = %self.name, "Entry freed");
                }
                Ok(count as usize - 1)
            }
            Err(_) => {
                warn!(entry = %self.name, "Release without a matching acquire");
                Err(Error::InvalidArgument(format!(
                    "entry '{}' has no outstanding references",
                    self.name
                )))
            }
        }
    }

    /// Mark the entry as a member of a folder. Returns false if it already
    /// was attached once.
    pub(crate) fn attach(&self) -> bool {
        self.word
            .compare_exchange(
                pack(UNATTACHED, 0),
                pack(ATTACHED, 0),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Make the entry inert and unreachable for new references
    ///
    /// Existing handles stay valid but every access fails with
    /// `NoAccessor`. A dynamic entry nobody references is freed at once.
    pub(crate) fn detach(&self) {
        {
            let mut accessor = self.accessor.write();
            accessor.clear();
            self.watchers.lock().list.clear();
        }
        let dynamic = self.origin == Origin::Dynamic;
        let update = self
            .word
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |word| {
                let (state, count) = unpack(word);
                if state >= DETACHED {
                    return None;
                }
                let state = if count == 0 && dynamic { FREED } else { DETACHED };
                Some(pack(state, count))
            });
        if let Ok(prev) = update {
            if unpack(prev).1 == 0 && dynamic {
                debug!(entry = %self.name, "Entry freed");
            }
        }
    }

    pub(crate) fn set_watcher_capacity(&self, capacity: usize) {
        self.watchers.lock().capacity = capacity;
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().list.len()
    }

    /// Register a watcher that receives the getter's value on [`Entry::notify`]
    ///
    /// The entry must have a getter of the watcher's type.
    pub fn watch(&self, watcher: Setter) -> Result<WatchId> {
        if !cfg!(feature = "callbacks") {
            return Err(Error::Disabled);
        }
        let accessor = self.accessor.read();
        let getter = accessor.getter().ok_or(Error::NoAccessor {
            kind: AccessorKind::Getter,
        })?;
        if getter.ty() != watcher.ty() {
            return Err(Error::TypeMismatch {
                expected: getter.ty(),
                found: watcher.ty(),
            });
        }

        let mut watchers = self.watchers.lock();
        if watchers.list.len() >= watchers.capacity {
            return Err(Error::OutOfMemory(format!(
                "entry '{}' already has {} watchers",
                self.name, watchers.capacity
            )));
        }
        watchers.list.try_reserve(1)?;
        let id = WatchId(NEXT_WATCH_ID.fetch_add(1, Ordering::Relaxed));
        watchers.list.push((id, watcher));
        Ok(id)
    }

    pub fn unwatch(&self, id: WatchId) -> bool {
        if !cfg!(feature = "callbacks") {
            return false;
        }
        let mut watchers = self.watchers.lock();
        let before = watchers.list.len();
        watchers.list.retain(|(wid, _)| *wid != id);
        watchers.list.len() != before
    }

    /// Read the getter once and hand the value to every watcher
    ///
    /// Returns how many watchers were called. No lock is held while the
    /// getter or the watchers run.
    pub fn notify(&self) -> Result<usize> {
        if !cfg!(feature = "callbacks") {
            return Ok(0);
        }
        let accessor = self.accessor();
        let getter = accessor.getter().ok_or(Error::NoAccessor {
            kind: AccessorKind::Getter,
        })?;
        let targets: Vec<Setter> = self.watchers.lock().list.iter().map(|(_, s)| *s).collect();
        let value = getter.call();
        for watcher in &targets {
            watcher.call(value)?;
        }
        Ok(targets.len())
    }

    /// Serializable view of the entry at `path`; calls the getter if any
    pub fn snapshot(&self, path: impl Into<String>) -> EntrySnapshot {
        let accessor = self.accessor();
        EntrySnapshot {
            path: path.into(),
            name: self.name.to_string(),
            ty: accessor.ty(),
            origin: self.origin,
            state: self.state(),
            refcount: self.refcount(),
            readable: accessor.has_getter(),
            writable: accessor.has_setter(),
            value: accessor.getter().map(|g| g.call()),
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("ty", &self.ty())
            .field("refcount", &self.refcount())
            .field("state", &self.state())
            .finish()
    }
}

/// Point-in-time description of an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Option<PrimitiveType>,
    pub origin: Origin,
    pub state: EntryState,
    pub refcount: usize,
    pub readable: bool,
    pub writable: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<Value>,
}

/// One record of the static initialization list
///
/// `name` is relative to `folder` and may itself be a path
/// (`"alloc_count/peak"`) whose parent appears earlier in the list.
#[derive(Debug, Clone, Copy)]
pub struct StaticEntry {
    pub folder: &'static str,
    pub name: &'static str,
    pub accessor: Accessor,
}

impl StaticEntry {
    pub const fn new(folder: &'static str, name: &'static str, accessor: Accessor) -> Self {
        Self {
            folder,
            name,
            accessor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    static LEVEL: AtomicU32 = AtomicU32::new(10);
    #[cfg(feature = "callbacks")]
    static SEEN: AtomicU32 = AtomicU32::new(0);
    #[cfg(feature = "callbacks")]
    static SEEN_TOO: AtomicU32 = AtomicU32::new(0);

    fn get_level() -> u32 {
        LEVEL.load(Ordering::SeqCst)
    }

    fn set_level(v: u32) {
        LEVEL.store(v, Ordering::SeqCst);
    }

    fn get_const() -> u32 {
        7
    }

    #[cfg(feature = "callbacks")]
    fn see(v: u32) {
        SEEN.store(v, Ordering::SeqCst);
    }

    #[cfg(feature = "callbacks")]
    fn see_too(v: u32) {
        SEEN_TOO.store(v, Ordering::SeqCst);
    }

    fn sink_i64(_: i64) {}

    fn attached(name: &'static str, accessor: Accessor) -> Entry {
        let entry = Entry::new(name, accessor).unwrap();
        assert!(entry.attach());
        entry
    }

    #[test]
    fn test_invalid_name_rejected() {
        assert!(matches!(
            Entry::new("a/b", Accessor::none()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_refcount_never_negative() -> Result<()> {
        let entry = attached("x", Accessor::read_only(Getter::U32(get_const)));
        assert_eq!(entry.acquire()?, 1);
        assert_eq!(entry.acquire()?, 2);
        assert_eq!(entry.state(), EntryState::Referenced);
        assert_eq!(entry.release()?, 1);
        assert_eq!(entry.release()?, 0);
        assert!(matches!(entry.release(), Err(Error::InvalidArgument(_))));
        assert_eq!(entry.refcount(), 0);
        assert_eq!(entry.state(), EntryState::Registered);
        Ok(())
    }

    #[test]
    fn test_unattached_cannot_be_acquired() {
        let entry = Entry::new("x", Accessor::none()).unwrap();
        assert_eq!(entry.state(), EntryState::Uninitialized);
        assert!(entry.acquire().is_err());
        assert_eq!(entry.refcount(), 0);
    }

    #[test]
    fn test_detach_defers_free_until_release() -> Result<()> {
        let entry = attached("x", Accessor::read_only(Getter::U32(get_const)));
        entry.acquire()?;
        entry.detach();
        assert_eq!(entry.state(), EntryState::Detached);
        // In-flight handles fail fast
        assert!(matches!(
            entry.read(PrimitiveType::U32),
            Err(Error::NoAccessor { .. })
        ));
        assert!(entry.acquire().is_err());
        entry.release()?;
        assert_eq!(entry.state(), EntryState::Freed);
        Ok(())
    }

    #[test]
    fn test_detach_unreferenced_frees_immediately() {
        let entry = attached("x", Accessor::none());
        entry.detach();
        assert_eq!(entry.state(), EntryState::Freed);
        entry.detach();
        assert_eq!(entry.state(), EntryState::Freed);
    }

    #[test]
    fn test_static_never_freed() -> Result<()> {
        let entry = Entry::from_static("x", Accessor::read_only(Getter::U32(get_const)))?;
        assert!(entry.attach());
        entry.acquire()?;
        entry.release()?;
        assert_eq!(entry.state(), EntryState::Registered);
        entry.detach();
        assert_eq!(entry.state(), EntryState::Detached);
        Ok(())
    }

    #[test]
    fn test_typed_helpers() -> Result<()> {
        let entry = attached(
            "level",
            Accessor::read_write(Getter::U32(get_level), Setter::U32(set_level)),
        );
        entry.set(33u32)?;
        assert_eq!(entry.get::<u32>()?, 33);
        assert!(matches!(
            entry.get::<i32>(),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(entry.set(1i64).is_err());
        Ok(())
    }

    #[test]
    fn test_update_setter_type_change_clears_getter() {
        let entry = attached("x", Accessor::read_only(Getter::U32(get_const)));
        entry.update_setter(Setter::I64(sink_i64));
        let acc = entry.accessor();
        assert_eq!(acc.ty(), Some(PrimitiveType::I64));
        assert!(!acc.has_getter());
    }

    #[cfg(feature = "callbacks")]
    #[test]
    fn test_watchers_fan_out() -> Result<()> {
        let entry = attached("x", Accessor::read_only(Getter::U32(get_const)));
        let first = entry.watch(Setter::U32(see))?;
        entry.watch(Setter::U32(see_too))?;
        assert_eq!(entry.notify()?, 2);
        assert_eq!(SEEN.load(Ordering::SeqCst), 7);
        assert_eq!(SEEN_TOO.load(Ordering::SeqCst), 7);

        assert!(entry.unwatch(first));
        assert!(!entry.unwatch(first));
        assert_eq!(entry.watcher_count(), 1);
        Ok(())
    }

    #[cfg(feature = "callbacks")]
    #[test]
    fn test_watch_requires_matching_getter() {
        let entry = attached("x", Accessor::write_only(Setter::I64(sink_i64)));
        assert!(matches!(
            entry.watch(Setter::I64(sink_i64)),
            Err(Error::NoAccessor { .. })
        ));
        let entry = attached("y", Accessor::read_only(Getter::U32(get_const)));
        assert!(matches!(
            entry.watch(Setter::I64(sink_i64)),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[cfg(feature = "callbacks")]
    #[test]
    fn test_watcher_capacity_and_type_change() -> Result<()> {
        let entry = attached("x", Accessor::read_only(Getter::U32(get_const)));
        entry.set_watcher_capacity(1);
        entry.watch(Setter::U32(see))?;
        assert!(matches!(
            entry.watch(Setter::U32(see)),
            Err(Error::OutOfMemory(_))
        ));
        entry.update_getter(Getter::U32(get_level));
        assert_eq!(entry.watcher_count(), 1);
        entry.update_setter(Setter::I64(sink_i64));
        assert_eq!(entry.watcher_count(), 0);
        Ok(())
    }

    #[cfg(not(feature = "callbacks"))]
    #[test]
    fn test_watchers_disabled() -> Result<()> {
        let entry = attached("x", Accessor::read_only(Getter::U32(get_const)));
        assert_eq!(entry.watch(Setter::U32(set_level)), Err(Error::Disabled));
        assert!(!entry.unwatch(WatchId(1)));
        assert_eq!(entry.notify()?, 0);
        assert_eq!(entry.watcher_count(), 0);
        Ok(())
    }

    #[test]
    fn test_detached_acquire_leaves_count_untouched() {
        let entry = attached("x", Accessor::none());
        entry.detach();
        assert_eq!(entry.state(), EntryState::Freed);
        for _ in 0..3 {
            assert!(entry.acquire().is_err());
            assert!(entry.release().is_err());
            assert_eq!(entry.refcount(), 0);
        }
        assert_eq!(entry.state(), EntryState::Freed);
    }

    #[test]
    fn test_snapshot() {
        let entry = attached("x", Accessor::read_only(Getter::U32(get_const)));
        let snap = entry.snapshot("mem/x");
        assert_eq!(snap.path, "mem/x");
        assert_eq!(snap.ty, Some(PrimitiveType::U32));
        assert!(snap.readable);
        assert!(!snap.writable);
        assert_eq!(snap.value, Some(Value::U32(7)));
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["type"], "u32");
        assert_eq!(json["origin"], "dynamic");
    }
}
