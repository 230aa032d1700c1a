use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, RwLock};

use crate::error::{RefError, Result};
use crate::names::validate_ref_name;
use crate::traits::RefStore;
use crate::types::{Ref, RefTarget};

/// In-memory reference store.
///
/// Refs live in a `BTreeMap` (sorted listing for free); advisory locks
/// are a set of held names. Intended for tests and embedding.
pub struct InMemoryRefStore {
    refs: RwLock<BTreeMap<String, RefTarget>>,
    locked: Mutex<HashSet<String>>,
}

impl InMemoryRefStore {
    /// Create a new empty ref store.
    pub fn new() -> Self {
        Self {
            refs: RwLock::new(BTreeMap::new()),
            locked: Mutex::new(HashSet::new()),
        }
    }

    /// Number of refs currently stored.
    pub fn len(&self) -> usize {
        self.refs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no refs are stored.
    pub fn is_empty(&self) -> bool {
        self.refs.read().expect("lock poisoned").is_empty()
    }
}

impl Default for InMemoryRefStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RefStore for InMemoryRefStore {
    fn read_ref(&self, name: &str) -> Result<Option<Ref>> {
        let refs = self.refs.read().expect("lock poisoned");
        Ok(refs.get(name).map(|target| Ref {
            name: name.to_string(),
            target: target.clone(),
        }))
    }

    fn write_ref(&self, reference: &Ref) -> Result<()> {
        validate_ref_name(&reference.name)?;
        let mut refs = self.refs.write().expect("lock poisoned");
        refs.insert(reference.name.clone(), reference.target.clone());
        Ok(())
    }

    fn delete_ref(&self, name: &str) -> Result<bool> {
        let mut refs = self.refs.write().expect("lock poisoned");
        Ok(refs.remove(name).is_some())
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<Ref>> {
        let refs = self.refs.read().expect("lock poisoned");
        Ok(refs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, target)| Ref {
                name: name.clone(),
                target: target.clone(),
            })
            .collect())
    }

    fn lock_ref(&self, name: &str) -> Result<()> {
        let mut locked = self.locked.lock().expect("lock poisoned");
        if !locked.insert(name.to_string()) {
            return Err(RefError::Locked {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn unlock_ref(&self, name: &str) -> Result<()> {
        let mut locked = self.locked.lock().expect("lock poisoned");
        if !locked.remove(name) {
            return Err(RefError::NotLocked {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryRefStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRefStore")
            .field("ref_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_types::ObjectId;

    fn oid(b: u8) -> ObjectId {
        ObjectId::from_hash([b; 20])
    }

    #[test]
    fn write_read_roundtrip() {
        let store = InMemoryRefStore::new();
        let r = Ref::direct("refs/heads/main", oid(1));
        store.write_ref(&r).unwrap();
        assert_eq!(store.read_ref("refs/heads/main").unwrap(), Some(r));
    }

    #[test]
    fn read_missing_is_none() {
        let store = InMemoryRefStore::new();
        assert!(store.read_ref("refs/heads/nope").unwrap().is_none());
    }

    #[test]
    fn open_missing_is_not_found() {
        let store = InMemoryRefStore::new();
        let err = store.open_ref("refs/heads/nope").unwrap_err();
        assert!(matches!(err, RefError::NotFound { .. }));
    }

    #[test]
    fn delete_reports_existence() {
        let store = InMemoryRefStore::new();
        store.write_ref(&Ref::direct("refs/heads/gone", oid(2))).unwrap();
        assert!(store.delete_ref("refs/heads/gone").unwrap());
        assert!(!store.delete_ref("refs/heads/gone").unwrap());
    }

    #[test]
    fn list_refs_filters_by_prefix_sorted() {
        let store = InMemoryRefStore::new();
        store.write_ref(&Ref::direct("refs/heads/b", oid(1))).unwrap();
        store.write_ref(&Ref::direct("refs/heads/a", oid(2))).unwrap();
        store.write_ref(&Ref::direct("refs/tags/v1", oid(3))).unwrap();

        let heads = store.list_refs("refs/heads/").unwrap();
        assert_eq!(heads.len(), 2);
        assert_eq!(heads[0].name, "refs/heads/a");
        assert_eq!(heads[1].name, "refs/heads/b");
    }

    #[test]
    fn resolve_follows_symrefs() {
        let store = InMemoryRefStore::new();
        store.write_ref(&Ref::direct("refs/heads/main", oid(7))).unwrap();
        store
            .write_ref(&Ref::symbolic("refs/grove/worktree/x", "refs/heads/main"))
            .unwrap();
        assert_eq!(store.resolve_name("refs/grove/worktree/x").unwrap(), oid(7));
    }

    #[test]
    fn resolve_detects_symref_loop() {
        let store = InMemoryRefStore::new();
        store.write_ref(&Ref::symbolic("refs/a", "refs/b")).unwrap();
        store.write_ref(&Ref::symbolic("refs/b", "refs/a")).unwrap();
        let err = store.resolve_name("refs/a").unwrap_err();
        assert!(matches!(err, RefError::SymrefLoop { .. }));
    }

    #[test]
    fn lock_is_exclusive() {
        let store = InMemoryRefStore::new();
        store.lock_ref("refs/heads/main").unwrap();
        let err = store.lock_ref("refs/heads/main").unwrap_err();
        assert!(matches!(err, RefError::Locked { .. }));
        store.unlock_ref("refs/heads/main").unwrap();
        store.lock_ref("refs/heads/main").unwrap();
    }

    #[test]
    fn unlock_without_lock_fails() {
        let store = InMemoryRefStore::new();
        let err = store.unlock_ref("refs/heads/main").unwrap_err();
        assert!(matches!(err, RefError::NotLocked { .. }));
    }

    #[test]
    fn write_rejects_invalid_names() {
        let store = InMemoryRefStore::new();
        let r = Ref::direct("refs/heads/bad..name", oid(1));
        assert!(store.write_ref(&r).is_err());
    }
}
