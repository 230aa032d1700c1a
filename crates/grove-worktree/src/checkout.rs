//! Checkout: apply a repository tree to the work tree.
//!
//! Checkout is idempotent: interrupting it leaves a partially complete
//! file index that the next run finishes. Every file decision goes
//! through the status engine, so local modifications are merged rather
//! than overwritten, and every index mutation ends in one atomic
//! rewrite before the lock drops back to shared.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use tracing::{debug, warn};

use grove_index::{walk, FileEntry, FileIndex, IndexFileType, TreeDiffItem};
use grove_refs::{Ref, RefStore};
use grove_store::{lookup, TreeEntry};
use grove_types::ObjectId;

use crate::error::{WorktreeError, WtResult};
use crate::install;
use crate::meta::Worktree;
use crate::path;
use crate::refnames;
use crate::repo::Repository;
use crate::status::{get_file_status, sync_timestamps, FileStatus};
use crate::{CancelFn, ProgressFn};

/// Re-point the entry at a blob and base commit, optionally refreshing
/// the stat fingerprint from disk.
///
/// Timestamps of files with local changes are left stale so a future
/// status walk still runs the full comparison.
pub(crate) fn entry_update(
    entry: &mut FileEntry,
    ondisk: &std::path::Path,
    blob_id: Option<ObjectId>,
    commit_id: Option<ObjectId>,
    update_timestamps: bool,
) {
    entry.blob_id = blob_id;
    entry.commit_id = commit_id;
    if update_timestamps {
        if let Ok(meta) = fs::symlink_metadata(ondisk) {
            entry.update_fingerprint(&meta);
        }
    }
}

/// Add or refresh the index entry for an installed blob.
pub(crate) fn update_blob_fileindex_entry(
    wt: &Worktree,
    index: &mut FileIndex,
    relpath: &str,
    blob_id: ObjectId,
    file_type: IndexFileType,
    update_timestamps: bool,
) -> WtResult<()> {
    let ondisk = wt.ondisk_path(relpath);
    match index.get_mut(relpath) {
        Some(entry) => {
            entry.file_type = file_type;
            entry_update(
                entry,
                &ondisk,
                Some(blob_id),
                Some(wt.base_commit()),
                update_timestamps,
            );
        }
        None => {
            let mut entry = FileEntry::new(relpath);
            entry.file_type = file_type;
            entry_update(
                &mut entry,
                &ondisk,
                Some(blob_id),
                Some(wt.base_commit()),
                update_timestamps,
            );
            index.add(entry)?;
        }
    }
    Ok(())
}

/// Bring one path up to date with its tree entry.
pub(crate) fn update_blob(
    wt: &Worktree,
    index: &mut FileIndex,
    relpath: &str,
    te: &TreeEntry,
    repo: &Repository,
    progress: &mut ProgressFn<'_>,
) -> WtResult<()> {
    let ondisk = wt.ondisk_path(relpath);
    let (status, meta) = get_file_status(index.get(relpath), &ondisk, repo.store())?;

    if status == FileStatus::Obstructed {
        return progress(status, relpath);
    }

    if let Some(entry) = index.get_mut(relpath) {
        if status != FileStatus::Missing {
            if entry.has_commit() && entry.commit_id == Some(wt.base_commit()) {
                if let Some(meta) = &meta {
                    sync_timestamps(entry, status, meta);
                }
                return progress(FileStatus::NoChange, relpath);
            }
            if entry.blob_id == Some(te.object_id) {
                if let Some(meta) = &meta {
                    sync_timestamps(entry, status, meta);
                }
                return Ok(());
            }
        }
    }

    let blob = lookup::read_blob(repo.store(), &te.object_id)?;
    let mergeable = matches!(
        status,
        FileStatus::Modify | FileStatus::Add | FileStatus::Conflict | FileStatus::MergeConflict
    );

    if te.mode.is_symlink() {
        let target = String::from_utf8_lossy(&blob.data).into_owned();
        if mergeable {
            let base_target = match index.get(relpath).and_then(|e| e.blob_id) {
                Some(base_id) => Some(String::from_utf8_lossy(
                    &lookup::read_blob(repo.store(), &base_id)?.data,
                )
                .into_owned()),
                None => None,
            };
            let label_deriv = format!("commit {}", wt.base_commit().to_hex());
            let subsumed = install::merge_symlink(
                wt,
                base_target.as_deref(),
                &ondisk,
                relpath,
                Some(&target),
                &label_deriv,
                "3-way merge base",
                progress,
            )?;
            if let Some(entry) = index.get_mut(relpath) {
                entry_update(
                    entry,
                    &ondisk,
                    Some(te.object_id),
                    Some(wt.base_commit()),
                    subsumed,
                );
            }
        } else {
            let installed = install::install_symlink(
                wt,
                &ondisk,
                relpath,
                &target,
                status == FileStatus::Missing,
                false,
                progress,
            )?;
            update_blob_fileindex_entry(wt, index, relpath, te.object_id, installed, true)?;
        }
        return Ok(());
    }

    if mergeable {
        let base = match index.get(relpath).and_then(|e| e.blob_id) {
            Some(base_id) => Some(lookup::read_blob(repo.store(), &base_id)?.data),
            None => None,
        };
        let mode = meta
            .as_ref()
            .map(|m| m.permissions().mode())
            .unwrap_or(0o644);
        let label = format!("commit {}", wt.base_commit().to_hex());
        let subsumed = install::merge_file(
            wt,
            base.as_deref(),
            &ondisk,
            relpath,
            mode,
            &blob.data,
            &label,
            progress,
        )?;
        if let Some(entry) = index.get_mut(relpath) {
            entry_update(
                entry,
                &ondisk,
                Some(te.object_id),
                Some(wt.base_commit()),
                subsumed,
            );
        }
    } else if status == FileStatus::Delete {
        // A scheduled deletion meets an incoming change: keep the file
        // deleted on disk but re-point the entry at the new blob.
        progress(FileStatus::Merge, relpath)?;
        let file_type = index
            .get(relpath)
            .map(|e| e.file_type)
            .unwrap_or(IndexFileType::Regular);
        update_blob_fileindex_entry(wt, index, relpath, te.object_id, file_type, false)?;
    } else {
        install::install_blob(
            wt,
            &ondisk,
            relpath,
            te.mode.is_executable(),
            &blob.data,
            status == FileStatus::Missing,
            false,
            progress,
        )?;
        update_blob_fileindex_entry(
            wt,
            index,
            relpath,
            te.object_id,
            IndexFileType::Regular,
            true,
        )?;
    }
    Ok(())
}

/// Remove one path that disappeared from the target tree.
pub(crate) fn delete_blob(
    wt: &Worktree,
    index: &mut FileIndex,
    relpath: &str,
    repo: &Repository,
    progress: &mut ProgressFn<'_>,
) -> WtResult<()> {
    let ondisk = wt.ondisk_path(relpath);
    let (status, _) = get_file_status(index.get(relpath), &ondisk, repo.store())?;

    match status {
        FileStatus::Modify
        | FileStatus::Conflict
        | FileStatus::MergeConflict
        | FileStatus::Add => {
            // Preserve the working file: the entry becomes a scheduled
            // addition.
            progress(FileStatus::Merge, relpath)?;
            if let Some(entry) = index.get_mut(relpath) {
                entry.blob_id = None;
                entry.commit_id = None;
            }
        }
        _ => {
            progress(FileStatus::Delete, relpath)?;
            if status == FileStatus::NoChange || status == FileStatus::ModeChange {
                install::remove_ondisk_file(wt.root(), relpath)?;
            }
            index.remove(relpath);
        }
    }
    Ok(())
}

/// Resolve a requested path to the tree the walk starts from.
///
/// Returns `(tree_id, tree_relpath, entry_name)`: a directory request
/// yields its own tree and no entry name; a file request yields the
/// containing tree plus the file's name.
fn find_tree_entry_for_checkout(
    wt: &Worktree,
    repo: &Repository,
    relpath: &str,
) -> WtResult<(ObjectId, String, Option<String>)> {
    let store = repo.store();
    let base = wt.base_commit();

    if relpath.is_empty() {
        let tree_id = lookup::id_by_path(store, &base, wt.path_prefix())?;
        return Ok((tree_id, String::new(), None));
    }

    let in_repo = wt.in_repo_path(relpath);
    let entry = lookup::tree_entry_by_path(store, &base, &in_repo)?;
    if entry.mode.is_dir() {
        Ok((entry.object_id, relpath.to_string(), None))
    } else {
        let dir = path::dirname(relpath);
        let parent_in_repo = wt.in_repo_path(dir);
        let tree_id = lookup::id_by_path(store, &base, &parent_in_repo)?;
        Ok((tree_id, dir.to_string(), Some(path::basename(relpath).to_string())))
    }
}

/// Plant the reference that keeps the base commit alive.
pub(crate) fn ref_base_commit(wt: &Worktree, repo: &Repository) -> WtResult<()> {
    let name = refnames::base_ref(wt);
    repo.refs()
        .write_ref(&Ref::direct(name, wt.base_commit()))?;
    Ok(())
}

fn checkout_files_inner(
    wt: &Worktree,
    repo: &Repository,
    paths: &[&str],
    progress: &mut ProgressFn<'_>,
    cancel: &CancelFn<'_>,
) -> WtResult<()> {
    // A read-only repository cannot take the protection ref; checkout
    // proceeds anyway.
    if let Err(e) = ref_base_commit(wt, repo) {
        warn!(error = %e, "could not write base commit reference");
        progress(FileStatus::BaseRefErr, "")?;
    }

    let mut index = FileIndex::read_from(&wt.fileindex_path())?;

    for relpath in paths {
        let (tree_id, tree_relpath, entry_name) =
            find_tree_entry_for_checkout(wt, repo, relpath)?;

        if let Some(name) = &entry_name {
            let tree = lookup::read_tree(repo.store(), &tree_id)?;
            if tree.find_entry(name).is_none() {
                return Err(WorktreeError::NoTreeEntry(relpath.to_string()));
            }
        }

        walk::diff_tree::<WorktreeError>(
            &mut index,
            repo.store(),
            &tree_id,
            &tree_relpath,
            entry_name.as_deref(),
            cancel,
            &mut |index, item| match item {
                TreeDiffItem::TreeOnly { path, tree_entry } => {
                    if tree_entry.mode.is_dir() {
                        install::add_dir_on_disk(wt, &path)
                    } else {
                        update_blob(wt, index, &path, tree_entry, repo, progress)
                    }
                }
                TreeDiffItem::Both { path, tree_entry } => {
                    update_blob(wt, index, &path, tree_entry, repo, progress)
                }
                TreeDiffItem::IndexOnly { path } => {
                    delete_blob(wt, index, &path, repo, progress)
                }
            },
        )?;

        // Bump base commit ids of all files within the updated scope.
        let base = wt.base_commit();
        index.for_each_entry_safe::<WorktreeError>(|entry| {
            let affected = match &entry_name {
                Some(_) => entry.path == *relpath,
                None => path::is_child(&entry.path, relpath),
            };
            if affected && entry.commit_id != Some(base) {
                progress(FileStatus::BumpBase, &entry.path)?;
                entry.commit_id = Some(base);
            }
            Ok(grove_index::EntryAction::Keep)
        })?;
    }

    index.write_to(&wt.fileindex_path())?;
    debug!(base = %wt.base_commit(), "checkout complete");
    Ok(())
}

/// Check out the requested paths (or the whole work tree for `[""]`)
/// from the work tree's base commit.
pub fn checkout_files(
    wt: &Worktree,
    repo: &Repository,
    paths: &[&str],
    progress: &mut ProgressFn<'_>,
    cancel: &CancelFn<'_>,
) -> WtResult<()> {
    wt.lock_exclusive()?;
    let result = checkout_files_inner(wt, repo, paths, progress, cancel);
    let unlock = wt.lock_shared();
    result.and(unlock)
}
