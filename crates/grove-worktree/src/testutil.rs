//! Shared fixtures for the engine's tests: in-memory repositories with
//! nested trees, branches, and commit chains.

use std::collections::BTreeMap;
use std::sync::Arc;

use grove_refs::{InMemoryRefStore, Ref, RefStore};
use grove_store::{
    Blob, Commit, EntryMode, InMemoryObjectStore, ObjectStore, Tree, TreeEntry,
};
use grove_types::{Identity, ObjectId};

use crate::repo::Repository;

/// What a path in a test tree holds.
#[derive(Clone, Copy)]
pub enum Spec<'a> {
    /// A regular file with the given content.
    File(&'a str),
    /// An executable file with the given content.
    Exec(&'a str),
    /// A symlink with the given target.
    Link(&'a str),
}

enum Node<'a> {
    Leaf(Spec<'a>),
    Dir(BTreeMap<String, Node<'a>>),
}

fn insert_node<'a>(map: &mut BTreeMap<String, Node<'a>>, path: &str, spec: Spec<'a>) {
    match path.split_once('/') {
        None => {
            map.insert(path.to_string(), Node::Leaf(spec));
        }
        Some((dir, rest)) => {
            let entry = map
                .entry(dir.to_string())
                .or_insert_with(|| Node::Dir(BTreeMap::new()));
            match entry {
                Node::Dir(children) => insert_node(children, rest, spec),
                Node::Leaf(_) => panic!("path collision at {dir}"),
            }
        }
    }
}

fn write_node_tree(store: &dyn ObjectStore, map: &BTreeMap<String, Node<'_>>) -> ObjectId {
    let mut entries = Vec::new();
    for (name, node) in map {
        match node {
            Node::Leaf(spec) => {
                let (mode, content) = match spec {
                    Spec::File(c) => (EntryMode::Regular, *c),
                    Spec::Exec(c) => (EntryMode::Executable, *c),
                    Spec::Link(t) => (EntryMode::Symlink, *t),
                };
                let blob_id = store
                    .write(&Blob::new(content.as_bytes().to_vec()).to_stored_object())
                    .unwrap();
                entries.push(TreeEntry::new(mode, name.clone(), blob_id));
            }
            Node::Dir(children) => {
                let sub = write_node_tree(store, children);
                entries.push(TreeEntry::new(EntryMode::Directory, name.clone(), sub));
            }
        }
    }
    store
        .write(&Tree::new(entries).to_stored_object().unwrap())
        .unwrap()
}

/// Build a nested tree from `(path, spec)` pairs and return its id.
pub fn build_tree(store: &dyn ObjectStore, files: &[(&str, Spec<'_>)]) -> ObjectId {
    let mut root = BTreeMap::new();
    for (path, spec) in files {
        insert_node(&mut root, path, *spec);
    }
    write_node_tree(store, &root)
}

/// The fixed identity test commits carry.
pub fn ident() -> Identity {
    Identity::new("Flan Hacker", "flan@example.com")
}

/// Write a commit over the given tree.
pub fn commit_tree(
    store: &dyn ObjectStore,
    tree_id: ObjectId,
    parents: &[ObjectId],
    message: &str,
    time: i64,
) -> ObjectId {
    let commit = Commit {
        tree_id,
        parents: parents.to_vec(),
        author: ident(),
        author_time: time,
        committer: ident(),
        commit_time: time,
        message: message.to_string(),
    };
    store.write(&commit.to_stored_object().unwrap()).unwrap()
}

/// Build a tree from specs and commit it in one step.
pub fn commit_files(
    repo: &Repository,
    parents: &[ObjectId],
    files: &[(&str, Spec<'_>)],
    message: &str,
    time: i64,
) -> ObjectId {
    let tree_id = build_tree(repo.store(), files);
    commit_tree(repo.store(), tree_id, parents, message, time)
}

/// Point a branch at a commit.
pub fn set_branch(repo: &Repository, name: &str, id: ObjectId) {
    repo.refs().write_ref(&Ref::direct(name, id)).unwrap();
}

/// A fresh in-memory repository with a single commit of regular files
/// on `refs/heads/main`.
pub fn test_repo(files: &[(&str, &str)]) -> (Repository, ObjectId) {
    let specs: Vec<(&str, Spec<'_>)> = files.iter().map(|(p, c)| (*p, Spec::File(c))).collect();
    test_repo_specs(&specs)
}

/// Like [`test_repo`] but with full tree specs (symlinks, executables).
pub fn test_repo_specs(files: &[(&str, Spec<'_>)]) -> (Repository, ObjectId) {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
    let refs: Arc<dyn RefStore> = Arc::new(InMemoryRefStore::new());
    let repo = Repository::new("/nonexistent/repo", store, refs);
    let commit = commit_files(&repo, &[], files, "initial import\n", 1_700_000_000);
    set_branch(&repo, "refs/heads/main", commit);
    (repo, commit)
}
