//! Path-based lookup over commits and trees.
//!
//! These helpers resolve an in-repository path (always absolute, `/` is
//! the root tree) against a commit, walking tree objects component by
//! component. A missing component is reported as
//! [`StoreError::NoTreeEntry`], which callers distinguish from genuine
//! store failures.

use grove_types::ObjectId;

use crate::error::{StoreError, StoreResult};
use crate::object::{Blob, Commit, Tree, TreeEntry};
use crate::traits::ObjectStore;

/// Read an object as a blob, failing if it is absent or another kind.
pub fn read_blob(store: &dyn ObjectStore, id: &ObjectId) -> StoreResult<Blob> {
    let obj = store.read(id)?.ok_or(StoreError::NotFound(*id))?;
    Blob::from_stored_object(&obj)
}

/// Read an object as a tree, failing if it is absent or another kind.
pub fn read_tree(store: &dyn ObjectStore, id: &ObjectId) -> StoreResult<Tree> {
    let obj = store.read(id)?.ok_or(StoreError::NotFound(*id))?;
    Tree::from_stored_object(&obj)
}

/// Read an object as a commit, failing if it is absent or another kind.
pub fn read_commit(store: &dyn ObjectStore, id: &ObjectId) -> StoreResult<Commit> {
    let obj = store.read(id)?.ok_or(StoreError::NotFound(*id))?;
    Commit::from_stored_object(&obj)
}

/// Resolve a commit's root tree.
pub fn commit_tree(store: &dyn ObjectStore, commit_id: &ObjectId) -> StoreResult<Tree> {
    let commit = read_commit(store, commit_id)?;
    read_tree(store, &commit.tree_id)
}

/// Resolve the tree entry at `path` within the given commit.
///
/// `path` is an in-repository path; leading slashes are ignored and `/`
/// (or the empty path) names the root tree itself, for which a synthetic
/// directory entry referencing the root tree id is returned.
pub fn tree_entry_by_path(
    store: &dyn ObjectStore,
    commit_id: &ObjectId,
    path: &str,
) -> StoreResult<TreeEntry> {
    let commit = read_commit(store, commit_id)?;
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(TreeEntry::new(
            crate::object::EntryMode::Directory,
            "",
            commit.tree_id,
        ));
    }

    let mut tree = read_tree(store, &commit.tree_id)?;
    let mut components = trimmed.split('/').peekable();
    loop {
        let name = components.next().expect("non-empty path");
        let entry = tree
            .find_entry(name)
            .ok_or_else(|| StoreError::NoTreeEntry(path.to_string()))?
            .clone();
        if components.peek().is_none() {
            return Ok(entry);
        }
        if !entry.mode.is_dir() {
            return Err(StoreError::NoTreeEntry(path.to_string()));
        }
        tree = read_tree(store, &entry.object_id)?;
    }
}

/// Flatten a tree into `relpath -> entry` pairs for every file it
/// contains, recursing into subtrees and skipping submodule entries.
pub fn tree_files(
    store: &dyn ObjectStore,
    tree_id: &ObjectId,
    prefix: &str,
) -> StoreResult<std::collections::BTreeMap<String, TreeEntry>> {
    fn walk(
        store: &dyn ObjectStore,
        tree_id: &ObjectId,
        prefix: &str,
        out: &mut std::collections::BTreeMap<String, TreeEntry>,
    ) -> StoreResult<()> {
        let tree = read_tree(store, tree_id)?;
        for entry in &tree.entries {
            if entry.mode.is_submodule() {
                continue;
            }
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            if entry.mode.is_dir() {
                walk(store, &entry.object_id, &path, out)?;
            } else {
                out.insert(path, entry.clone());
            }
        }
        Ok(())
    }
    let mut out = std::collections::BTreeMap::new();
    walk(store, tree_id, prefix, &mut out)?;
    Ok(out)
}

/// Resolve the object id at `path` within the given commit.
pub fn id_by_path(
    store: &dyn ObjectStore,
    commit_id: &ObjectId,
    path: &str,
) -> StoreResult<ObjectId> {
    tree_entry_by_path(store, commit_id, path).map(|e| e.object_id)
}
