//! Property tests for reference counting, accessor policy, tree structure
//! and cache coherence

#![cfg(feature = "store")]

use kstore::{
    Accessor, Entry, EntryRef, Getter, PrimitiveType, Registry, RegistryConfig, Setter, Tree,
};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

macro_rules! callbacks {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        fn getter_for(ty: PrimitiveType) -> Getter {
            match ty {
                $(PrimitiveType::$variant => {
                    fn get() -> $ty {
                        1
                    }
                    Getter::$variant(get)
                })*
            }
        }

        fn setter_for(ty: PrimitiveType) -> Setter {
            match ty {
                $(PrimitiveType::$variant => {
                    fn set(_: $ty) {}
                    Setter::$variant(set)
                })*
            }
        }
    };
}

callbacks! {
    I8 => i8,
    U8 => u8,
    I16 => i16,
    U16 => u16,
    I32 => i32,
    U32 => u32,
    I64 => i64,
    U64 => u64,
    Ptr => usize,
}

fn arb_type() -> impl Strategy<Value = PrimitiveType> {
    prop::sample::select(PrimitiveType::ALL.to_vec())
}

#[derive(Debug, Clone)]
enum AccessorOp {
    Getter(PrimitiveType),
    Setter(PrimitiveType),
    ClearGetter,
    ClearSetter,
}

fn arb_accessor_op() -> impl Strategy<Value = AccessorOp> {
    prop_oneof![
        arb_type().prop_map(AccessorOp::Getter),
        arb_type().prop_map(AccessorOp::Setter),
        Just(AccessorOp::ClearGetter),
        Just(AccessorOp::ClearSetter),
    ]
}

#[derive(Debug, Clone)]
enum TreeOp {
    /// Add under the n-th live node
    Add(usize),
    /// Remove the n-th live non-root node
    Remove(usize),
}

fn arb_tree_op() -> impl Strategy<Value = TreeOp> {
    prop_oneof![
        3 => any::<usize>().prop_map(TreeOp::Add),
        1 => any::<usize>().prop_map(TreeOp::Remove),
    ]
}

#[derive(Debug, Clone)]
enum RegistryOp {
    Create(usize),
    Lookup(usize),
    Delete(usize),
    Replace(usize),
}

fn arb_registry_op() -> impl Strategy<Value = RegistryOp> {
    prop_oneof![
        (0..6usize).prop_map(RegistryOp::Create),
        (0..6usize).prop_map(RegistryOp::Lookup),
        (0..6usize).prop_map(RegistryOp::Delete),
        (0..6usize).prop_map(RegistryOp::Replace),
    ]
}

const NAMES: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

fn attached_entry() -> (Registry, EntryRef) {
    let mut registry = Registry::new(RegistryConfig::default()).unwrap();
    registry.add_folder("p").unwrap();
    let entry = registry
        .create_entry("p/x", Some(getter_for(PrimitiveType::U32)), None)
        .unwrap();
    (registry, entry)
}

/// Node ids of `tree` reachable from the root, root included
fn reachable<T>(tree: &Tree<T>) -> HashSet<kstore::NodeId> {
    let mut all: HashSet<_> = tree.descendants(tree.root()).into_iter().collect();
    all.insert(tree.root());
    all
}

proptest! {
    /// The count follows the number of outstanding references and never underflows.
    #[test]
    fn prop_refcount_never_negative(ops in prop::collection::vec(any::<bool>(), 1..64)) {
        let (registry, entry) = attached_entry();
        let mut outstanding = 0usize;
        for acquire in ops {
            if acquire {
                let handle = registry.get_entry("p", "x");
                prop_assert!(handle.is_some());
                outstanding += 1;
            } else if outstanding == 0 {
                prop_assert!(registry.release(&entry).is_err());
            } else {
                prop_assert_eq!(registry.release(&entry).unwrap(), outstanding - 1);
                outstanding -= 1;
            }
            prop_assert_eq!(entry.refcount(), outstanding);
        }
    }

    /// No sequence of updates leaves a callback whose type differs from the tag.
    #[test]
    fn prop_accessor_stays_consistent(ops in prop::collection::vec(arb_accessor_op(), 1..32)) {
        let (_registry, entry) = attached_entry();
        for op in ops {
            match op {
                AccessorOp::Getter(ty) => {
                    entry.update_getter(getter_for(ty));
                    let acc = entry.accessor();
                    prop_assert_eq!(acc.ty(), Some(ty));
                    prop_assert!(acc.setter().map_or(true, |s| s.ty() == ty));
                }
                AccessorOp::Setter(ty) => {
                    entry.update_setter(setter_for(ty));
                    let acc = entry.accessor();
                    prop_assert_eq!(acc.ty(), Some(ty));
                    prop_assert!(acc.getter().map_or(true, |g| g.ty() == ty));
                }
                AccessorOp::ClearGetter => entry.clear_getter(),
                AccessorOp::ClearSetter => entry.clear_setter(),
            }
            prop_assert!(entry.accessor().is_consistent());
        }
    }

    /// Parent links, free counts and leaf flags match a plain parent map.
    #[test]
    fn prop_tree_integrity(ops in prop::collection::vec(arb_tree_op(), 1..96)) {
        let mut tree = Tree::new(0usize, 2).unwrap();
        let mut parent_of: HashMap<kstore::NodeId, kstore::NodeId> = HashMap::new();
        let mut live = vec![tree.root()];
        let mut next = 1usize;

        for op in ops {
            match op {
                TreeOp::Add(n) => {
                    let parent = live[n % live.len()];
                    let child = tree.add_child(parent, next).unwrap();
                    next += 1;
                    parent_of.insert(child, parent);
                    live.push(child);
                }
                TreeOp::Remove(n) => {
                    if live.len() == 1 {
                        continue;
                    }
                    let doomed = live[1 + n % (live.len() - 1)];
                    tree.remove(doomed).unwrap();
                    let still: HashSet<_> = reachable(&tree);
                    live.retain(|id| still.contains(id));
                    parent_of.retain(|child, _| still.contains(child));
                }
            }

            prop_assert!(tree.check_integrity().is_ok());
            prop_assert_eq!(tree.node_count(), live.len());
            for &id in &live {
                let has_children = parent_of.values().any(|&p| p == id);
                prop_assert_eq!(tree.is_leaf(id), !has_children);
                prop_assert_eq!(tree.parent(id), parent_of.get(&id).copied());
            }
        }
    }

    /// Removing a node removes exactly its subtree.
    #[test]
    fn prop_delete_is_cascading(
        parents in prop::collection::vec(any::<usize>(), 1..48),
        pick in any::<usize>(),
    ) {
        let mut tree = Tree::new(0usize, 2).unwrap();
        let mut ids = vec![tree.root()];
        for (i, p) in parents.into_iter().enumerate() {
            let parent = ids[p % ids.len()];
            ids.push(tree.add_child(parent, i + 1).unwrap());
        }

        let doomed = ids[1 + pick % (ids.len() - 1)];
        let mut subtree: HashSet<_> = tree.descendants(doomed).into_iter().collect();
        subtree.insert(doomed);
        let before = reachable(&tree);

        let removed = tree.remove(doomed).unwrap();
        prop_assert_eq!(removed.len(), subtree.len());

        let after = reachable(&tree);
        prop_assert!(after.is_disjoint(&subtree));
        let expected: HashSet<_> = before.difference(&subtree).copied().collect();
        prop_assert_eq!(after, expected);
        for id in &subtree {
            prop_assert!(!tree.contains(*id));
        }
        prop_assert!(tree.check_integrity().is_ok());
    }

    /// A cached lookup never returns an entry that was deleted or replaced.
    #[test]
    fn prop_cache_coherence(ops in prop::collection::vec(arb_registry_op(), 1..64)) {
        let config = RegistryConfig {
            cache_buckets: 2,
            cache_bucket_capacity: 2,
            ..RegistryConfig::default()
        };
        let mut registry = Registry::new(config).unwrap();
        registry.add_folder("p").unwrap();
        let mut model: HashMap<&str, EntryRef> = HashMap::new();

        for op in ops {
            match op {
                RegistryOp::Create(i) => {
                    let path = format!("p/{}", NAMES[i]);
                    let created =
                        registry.create_entry(&path, Some(getter_for(PrimitiveType::U8)), None);
                    match model.get(NAMES[i]) {
                        Some(_) => prop_assert!(created.is_err()),
                        None => {
                            model.insert(NAMES[i], created.unwrap());
                        }
                    }
                }
                RegistryOp::Lookup(i) => {
                    let _ = registry.lookup(&format!("p/{}", NAMES[i]))
                        .map(|e| registry.release(&e));
                }
                RegistryOp::Delete(i) => {
                    let deleted = registry.delete_entry(&format!("p/{}", NAMES[i]));
                    prop_assert_eq!(deleted.is_ok(), model.remove(NAMES[i]).is_some());
                }
                RegistryOp::Replace(i) => {
                    let fresh = Entry::new(
                        NAMES[i],
                        Accessor::read_only(getter_for(PrimitiveType::U8)),
                    )
                    .unwrap();
                    match registry.replace_entry(&format!("p/{}", NAMES[i]), fresh) {
                        Ok(entry) => {
                            prop_assert!(model.insert(NAMES[i], entry).is_some());
                        }
                        Err(e) => prop_assert!(e.is_not_found()),
                    }
                }
            }

            for name in NAMES {
                let found = registry.lookup(&format!("p/{}", name));
                match (found, model.get(name)) {
                    (Some(found), Some(expected)) => {
                        prop_assert!(Arc::ptr_eq(&found, expected));
                        registry.release(&found).unwrap();
                    }
                    (None, None) => {}
                    (found, expected) => {
                        prop_assert!(false, "{}: found {:?}, expected {:?}", name, found, expected);
                    }
                }
            }
        }
    }
}
