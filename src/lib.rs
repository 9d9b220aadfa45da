// kstore - Hierarchical typed property registry
// Subsystems publish named, typed properties; consumers read and write them by path

//! # Architecture
//!
//! ```text
//! Registry
//!   ├─→ Folder "mem"    (static)
//!   │     ├─→ Entry "total"        u64  get
//!   │     └─→ Entry "alloc_count"  u32  get/set
//!   │           └─→ Entry "peak"   u32  get
//!   ├─→ Folder "sched"  (static)
//!   │     └─→ Entry "quantum_us"   u32  get/set
//!   └─→ PathCache (djb2 buckets → per-bucket LRU)
//!         └─→ "mem/alloc_count" → Entry
//! ```
//!
//! Each folder owns an arena-backed N-ary [`tree::Tree`] whose nodes hold
//! reference-counted [`entry::Entry`] values. Structural operations take
//! `&mut Registry`; [`sync::SyncRegistry`] serializes them behind one mutex.
//! Reference counts are atomic and never need the lock.

#![warn(rust_2018_idioms)]

pub mod accessor;
pub mod cache;
pub mod config;
pub mod entry;
pub mod folder;
pub mod path;
pub mod registry;
pub mod sync;
pub mod tree;
pub mod value;

// Re-exports for convenience
pub use accessor::{Accessor, AccessorKind, Getter, Setter};
pub use cache::{CacheStats, PathCache};
pub use config::RegistryConfig;
pub use entry::{Entry, EntryRef, EntrySnapshot, EntryState, Origin, StaticEntry, WatchId};
pub use folder::Folder;
pub use registry::{Registry, RegistryStats};
pub use sync::SyncRegistry;
pub use tree::{NodeId, Tree};
pub use value::{Primitive, PrimitiveType, Value};

/// Registry error types
pub mod error {
    use crate::accessor::AccessorKind;
    use crate::value::PrimitiveType;
    use std::collections::TryReserveError;
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Type mismatch: expected {expected}, found {found}")]
        TypeMismatch {
            expected: PrimitiveType,
            found: PrimitiveType,
        },

        #[error("Not found: {0}")]
        NotFound(String),

        #[error("No {kind} registered")]
        NoAccessor { kind: AccessorKind },

        #[error("Out of memory: {0}")]
        OutOfMemory(String),

        #[error("Already exists: {0}")]
        AlreadyExists(String),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Feature compiled out")]
        Disabled,
    }

    impl Error {
        /// Lookup misses are ordinary control flow; this lets callers
        /// branch on them (create-on-miss) without matching every variant.
        pub fn is_not_found(&self) -> bool {
            matches!(self, Error::NotFound(_))
        }
    }

    impl From<TryReserveError> for Error {
        fn from(e: TryReserveError) -> Self {
            Error::OutOfMemory(e.to_string())
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Early-return `$ret` from a public entry point when `store` is compiled out
macro_rules! store_disabled {
    ($ret:expr) => {
        if !cfg!(feature = "store") {
            return $ret;
        }
    };
}
pub(crate) use store_disabled;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
