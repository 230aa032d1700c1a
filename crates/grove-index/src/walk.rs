//! Sorted walk drivers over the file index.
//!
//! Two dual walks share the same three-callback shape:
//!
//! - [`diff_tree`] walks the index against a repository tree, emitting
//!   matched pairs, index-only paths, and tree-only paths. Checkout and
//!   the merge drivers sit on top of it.
//! - [`diff_dir`] walks the on-disk directory tree against the index,
//!   with an additional traverse event fired once per directory entered
//!   so per-directory state can be pushed and popped. The status engine
//!   sits on top of it.
//!
//! Both walks are single-threaded, deterministic under identical
//! inputs, and check the caller's cancellation predicate at every step.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use grove_store::{lookup, ObjectStore, TreeEntry};
use grove_types::ObjectId;

use crate::error::IndexError;
use crate::index::FileIndex;

/// Join a parent path and a name, treating `""` as the root.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Returns `true` if `path` equals `scope` or lies inside it.
fn in_scope(path: &str, scope: &str) -> bool {
    scope.is_empty() || path == scope || path.starts_with(&format!("{scope}/"))
}

// ---------------------------------------------------------------------------
// Index vs repository tree
// ---------------------------------------------------------------------------

/// One step of a [`diff_tree`] walk.
#[derive(Debug)]
pub enum TreeDiffItem<'a> {
    /// The path exists in both the index and the tree.
    Both {
        path: String,
        tree_entry: &'a TreeEntry,
    },
    /// The path exists only in the index.
    IndexOnly { path: String },
    /// The path (a file or a directory) exists only in the tree.
    /// Directory items are emitted before their children.
    TreeOnly {
        path: String,
        tree_entry: &'a TreeEntry,
    },
}

fn flatten_tree(
    store: &dyn ObjectStore,
    tree_id: &ObjectId,
    prefix: &str,
    entry_name: Option<&str>,
    dirs: &mut Vec<(String, TreeEntry)>,
    files: &mut BTreeMap<String, TreeEntry>,
) -> Result<(), IndexError> {
    let tree = lookup::read_tree(store, tree_id)?;
    for entry in &tree.entries {
        if let Some(name) = entry_name {
            if entry.name != name {
                continue;
            }
        }
        if entry.mode.is_submodule() {
            continue;
        }
        let path = join_path(prefix, &entry.name);
        if entry.mode.is_dir() {
            dirs.push((path.clone(), entry.clone()));
            flatten_tree(store, &entry.object_id, &path, None, dirs, files)?;
        } else {
            files.insert(path, entry.clone());
        }
    }
    Ok(())
}

/// Walk the index against a repository tree in sorted order.
///
/// `tree_id` is the tree corresponding to `root_relpath` within the work
/// tree (`""` walks the whole checkout scope). `entry_name` restricts
/// the walk to a single top-level entry of the tree, which is how a
/// single-file checkout is expressed. The callback may mutate the index
/// freely; the walk iterates over a snapshot of the entry paths.
pub fn diff_tree<E: From<IndexError>>(
    index: &mut FileIndex,
    store: &dyn ObjectStore,
    tree_id: &ObjectId,
    root_relpath: &str,
    entry_name: Option<&str>,
    cancel: &dyn Fn() -> bool,
    f: &mut dyn FnMut(&mut FileIndex, TreeDiffItem<'_>) -> Result<(), E>,
) -> Result<(), E> {
    let mut dirs = Vec::new();
    let mut files = BTreeMap::new();
    flatten_tree(store, tree_id, root_relpath, entry_name, &mut dirs, &mut files)
        .map_err(E::from)?;

    let index_paths: Vec<String> = match entry_name {
        Some(name) => {
            let only = join_path(root_relpath, name);
            index.paths().into_iter().filter(|p| *p == only).collect()
        }
        None => index
            .paths()
            .into_iter()
            .filter(|p| in_scope(p, root_relpath))
            .collect(),
    };

    // Directories first so they exist before anything inside them.
    for (path, entry) in &dirs {
        if cancel() {
            return Err(E::from(IndexError::Cancelled));
        }
        f(
            index,
            TreeDiffItem::TreeOnly {
                path: path.clone(),
                tree_entry: entry,
            },
        )?;
    }

    // Sorted merge of index paths against tree file paths.
    let mut index_iter = index_paths.into_iter().peekable();
    let mut tree_iter = files.iter().peekable();
    loop {
        if cancel() {
            return Err(E::from(IndexError::Cancelled));
        }
        match (index_iter.peek(), tree_iter.peek()) {
            (Some(ip), Some((tp, _))) => match ip.as_str().cmp(tp.as_str()) {
                std::cmp::Ordering::Equal => {
                    let path = index_iter.next().expect("peeked");
                    let (_, entry) = tree_iter.next().expect("peeked");
                    f(index, TreeDiffItem::Both { path, tree_entry: entry })?;
                }
                std::cmp::Ordering::Less => {
                    let path = index_iter.next().expect("peeked");
                    f(index, TreeDiffItem::IndexOnly { path })?;
                }
                std::cmp::Ordering::Greater => {
                    let (path, entry) = tree_iter.next().expect("peeked");
                    f(
                        index,
                        TreeDiffItem::TreeOnly {
                            path: path.clone(),
                            tree_entry: entry,
                        },
                    )?;
                }
            },
            (Some(_), None) => {
                let path = index_iter.next().expect("peeked");
                f(index, TreeDiffItem::IndexOnly { path })?;
            }
            (None, Some(_)) => {
                let (path, entry) = tree_iter.next().expect("peeked");
                f(
                    index,
                    TreeDiffItem::TreeOnly {
                        path: path.clone(),
                        tree_entry: entry,
                    },
                )?;
            }
            (None, None) => break,
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// On-disk directory vs index
// ---------------------------------------------------------------------------

/// The type of an on-disk directory entry, from `lstat` (links are never
/// followed).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskFileType {
    Regular,
    Symlink,
    Directory,
    /// Sockets, fifos, devices.
    Other,
}

/// An on-disk directory entry seen by [`diff_dir`].
#[derive(Clone, Debug)]
pub struct DiskEntry {
    /// File name within its directory.
    pub name: String,
    /// Entry type from `lstat`.
    pub file_type: DiskFileType,
}

/// One step of a [`diff_dir`] walk.
#[derive(Debug)]
pub enum DirDiffItem {
    /// A directory is being entered.
    Traverse { path: String },
    /// The path exists on disk and in the index.
    Both { path: String, disk: DiskEntry },
    /// The path exists only in the index.
    IndexOnly { path: String },
    /// The path exists only on disk.
    DiskOnly { path: String, disk: DiskEntry },
}

fn disk_file_type(meta: &fs::Metadata) -> DiskFileType {
    let ft = meta.file_type();
    if ft.is_dir() {
        DiskFileType::Directory
    } else if ft.is_symlink() {
        DiskFileType::Symlink
    } else if ft.is_file() {
        DiskFileType::Regular
    } else {
        DiskFileType::Other
    }
}

struct DirWalker<'w, E> {
    root: &'w Path,
    skip_names: &'w [&'w str],
    index_paths: Vec<String>,
    cancel: &'w dyn Fn() -> bool,
    f: &'w mut dyn FnMut(&mut FileIndex, DirDiffItem) -> Result<(), E>,
}

#[derive(Default)]
struct ChildFlags {
    leaf: bool,
    deeper: bool,
}

impl<E: From<IndexError>> DirWalker<'_, E> {
    fn check_cancel(&self) -> Result<(), E> {
        if (self.cancel)() {
            return Err(E::from(IndexError::Cancelled));
        }
        Ok(())
    }

    /// Emit IndexOnly for every index path strictly under `prefix`.
    fn emit_index_only_under(&mut self, index: &mut FileIndex, prefix: &str) -> Result<(), E> {
        let paths: Vec<String> = self
            .index_paths
            .iter()
            .filter(|p| p.starts_with(&format!("{prefix}/")))
            .cloned()
            .collect();
        for path in paths {
            self.check_cancel()?;
            (self.f)(index, DirDiffItem::IndexOnly { path })?;
        }
        Ok(())
    }

    fn index_children(&self, dir_rel: &str) -> BTreeMap<String, ChildFlags> {
        let mut children: BTreeMap<String, ChildFlags> = BTreeMap::new();
        for p in &self.index_paths {
            let rest = if dir_rel.is_empty() {
                p.as_str()
            } else if let Some(rest) = p.strip_prefix(&format!("{dir_rel}/")) {
                rest
            } else {
                continue;
            };
            match rest.split_once('/') {
                Some((name, _)) => children.entry(name.to_string()).or_default().deeper = true,
                None => children.entry(rest.to_string()).or_default().leaf = true,
            }
        }
        children
    }

    fn walk(&mut self, index: &mut FileIndex, dir_rel: &str) -> Result<(), E> {
        self.check_cancel()?;
        (self.f)(
            index,
            DirDiffItem::Traverse {
                path: dir_rel.to_string(),
            },
        )?;

        let dir_abs = if dir_rel.is_empty() {
            self.root.to_path_buf()
        } else {
            self.root.join(dir_rel)
        };

        let mut disk: BTreeMap<String, DiskFileType> = BTreeMap::new();
        for entry in fs::read_dir(&dir_abs).map_err(|e| E::from(IndexError::Io(e)))? {
            let entry = entry.map_err(|e| E::from(IndexError::Io(e)))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if dir_rel.is_empty() && self.skip_names.contains(&name.as_str()) {
                continue;
            }
            let meta = fs::symlink_metadata(entry.path()).map_err(|e| E::from(IndexError::Io(e)))?;
            disk.insert(name, disk_file_type(&meta));
        }

        let idx_children = self.index_children(dir_rel);

        let mut names: Vec<&String> = disk.keys().chain(idx_children.keys()).collect();
        names.sort();
        names.dedup();
        let names: Vec<String> = names.into_iter().cloned().collect();

        for name in names {
            self.check_cancel()?;
            let path = join_path(dir_rel, &name);
            let on_disk = disk.get(&name).copied();
            let flags = idx_children.get(&name);
            let (leaf, deeper) = flags.map(|f| (f.leaf, f.deeper)).unwrap_or((false, false));

            match on_disk {
                Some(DiskFileType::Directory) => {
                    if leaf {
                        // A directory obstructs a tracked file.
                        (self.f)(
                            index,
                            DirDiffItem::Both {
                                path: path.clone(),
                                disk: DiskEntry {
                                    name: name.clone(),
                                    file_type: DiskFileType::Directory,
                                },
                            },
                        )?;
                    }
                    self.walk(index, &path)?;
                }
                Some(file_type) => {
                    let disk_entry = DiskEntry {
                        name: name.clone(),
                        file_type,
                    };
                    if leaf {
                        (self.f)(
                            index,
                            DirDiffItem::Both {
                                path: path.clone(),
                                disk: disk_entry,
                            },
                        )?;
                    } else {
                        (self.f)(
                            index,
                            DirDiffItem::DiskOnly {
                                path: path.clone(),
                                disk: disk_entry,
                            },
                        )?;
                    }
                    if deeper {
                        // A file obstructs a formerly tracked directory.
                        self.emit_index_only_under(index, &path)?;
                    }
                }
                None => {
                    if leaf {
                        (self.f)(index, DirDiffItem::IndexOnly { path: path.clone() })?;
                    }
                    if deeper {
                        self.emit_index_only_under(index, &path)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Walk the on-disk directory tree at `root`/`scope` against the index.
///
/// `skip_names` lists root-level directory names the walk never enters
/// (the work tree's metadata directory). Index entries whose on-disk
/// directory is missing are still reported as index-only; no traverse
/// event fires for directories that do not exist.
pub fn diff_dir<E: From<IndexError>>(
    index: &mut FileIndex,
    root: &Path,
    scope: &str,
    skip_names: &[&str],
    cancel: &dyn Fn() -> bool,
    f: &mut dyn FnMut(&mut FileIndex, DirDiffItem) -> Result<(), E>,
) -> Result<(), E> {
    let index_paths: Vec<String> = index
        .paths()
        .into_iter()
        .filter(|p| in_scope(p, scope))
        .collect();
    let mut walker = DirWalker {
        root,
        skip_names,
        index_paths,
        cancel,
        f,
    };
    walker.walk(index, scope)
}
