//! Stage and unstage: the two-stage index.
//!
//! Staging records a blob snapshot per path without touching the
//! working file; the next commit then commits staged state only. With a
//! patch callback, individual hunks can be accepted into (or moved back
//! out of) the staged snapshot; hunk-level unstage splits the staged
//! content into a retained part and an unstaged part that is three-way
//! merged back into the working file.

use tracing::debug;

use grove_diff::{apply_hunks, diff_blobs, DiffHunk};
use grove_index::{FileIndex, IndexFileType, Stage};
use grove_store::{lookup, Blob, ObjectStore};
use grove_types::ObjectId;

use crate::error::{WorktreeError, WtResult};
use crate::install;
use crate::meta::Worktree;
use crate::repo::Repository;
use crate::status::{get_file_status, staged_status, FileStatus, StatusFn, StatusReport};
use crate::ProgressFn;

/// Answer from the interactive patch callback for one hunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchChoice {
    /// Take this hunk.
    Yes,
    /// Skip this hunk.
    No,
    /// Abort the whole operation.
    Quit,
}

/// Per-hunk patch callback.
pub type PatchFn<'a> = dyn FnMut(&DiffHunk) -> WtResult<PatchChoice> + 'a;

fn blob_create(store: &dyn ObjectStore, content: &[u8]) -> WtResult<ObjectId> {
    Ok(store.write(&Blob::new(content.to_vec()).to_stored_object())?)
}

fn read_blob_text(store: &dyn ObjectStore, id: Option<ObjectId>) -> WtResult<Vec<u8>> {
    match id {
        Some(id) => Ok(lookup::read_blob(store, &id)?.data),
        None => Ok(Vec::new()),
    }
}

fn disk_content(wt: &Worktree, relpath: &str) -> WtResult<(Vec<u8>, IndexFileType)> {
    let ondisk = wt.ondisk_path(relpath);
    let meta = std::fs::symlink_metadata(&ondisk)?;
    if meta.file_type().is_symlink() {
        let target = std::fs::read_link(&ondisk)?
            .to_string_lossy()
            .into_owned()
            .into_bytes();
        Ok((target, IndexFileType::Symlink))
    } else {
        Ok((std::fs::read(&ondisk)?, IndexFileType::Regular))
    }
}

/// Select hunks via the patch callback. `Ok(None)` means no hunk was
/// accepted.
fn select_hunks(
    diff: &grove_diff::BlobDiff,
    patch_cb: &mut PatchFn<'_>,
) -> WtResult<Option<Vec<usize>>> {
    let mut accepted = Vec::new();
    for (i, hunk) in diff.hunks.iter().enumerate() {
        match patch_cb(hunk)? {
            PatchChoice::Yes => accepted.push(i),
            PatchChoice::No => {}
            PatchChoice::Quit => return Err(WorktreeError::PatchChoice),
        }
    }
    if accepted.is_empty() {
        Ok(None)
    } else {
        Ok(Some(accepted))
    }
}

/// Stage changes on the given paths.
///
/// With a patch callback, each hunk of a modified text file is offered
/// for acceptance and the staged blob is built from the accepted subset;
/// otherwise the whole on-disk content is staged. At least one change
/// must result.
pub fn stage(
    wt: &Worktree,
    repo: &Repository,
    paths: &[&str],
    mut patch_cb: Option<&mut PatchFn<'_>>,
    status_cb: &mut StatusFn<'_>,
) -> WtResult<()> {
    wt.lock_exclusive()?;
    let result = stage_inner(wt, repo, paths, patch_cb.as_deref_mut(), status_cb);
    let unlock = wt.lock_shared();
    result.and(unlock)
}

fn stage_inner(
    wt: &Worktree,
    repo: &Repository,
    paths: &[&str],
    mut patch_cb: Option<&mut PatchFn<'_>>,
    status_cb: &mut StatusFn<'_>,
) -> WtResult<()> {
    let mut index = FileIndex::read_from(&wt.fileindex_path())?;
    let store = repo.store();

    // Pre-flight: conflicted or non-existent paths abort before any
    // staging happens.
    for relpath in paths {
        let ondisk = wt.ondisk_path(relpath);
        let (status, _) = get_file_status(index.get(relpath), &ondisk, store)?;
        match status {
            FileStatus::Conflict => {
                return Err(WorktreeError::StageConflict(relpath.to_string()))
            }
            FileStatus::NonExistent | FileStatus::Unversioned | FileStatus::Obstructed => {
                return Err(WorktreeError::FileStatus(relpath.to_string()))
            }
            _ => {}
        }
    }

    let mut staged_count = 0usize;
    for relpath in paths {
        let ondisk = wt.ondisk_path(relpath);
        let (status, _) = get_file_status(index.get(relpath), &ondisk, store)?;
        match status {
            FileStatus::Modify | FileStatus::Add | FileStatus::ModeChange => {
                let (content, disk_type) = disk_content(wt, relpath)?;
                let entry = index
                    .get(relpath)
                    .ok_or_else(|| WorktreeError::BadPath(relpath.to_string()))?;
                let base_id = entry.staged_blob_id.or(entry.blob_id);

                let staged_blob = match (&mut patch_cb, disk_type) {
                    (Some(cb), IndexFileType::Regular) => {
                        let base = read_blob_text(store, base_id)?;
                        match (std::str::from_utf8(&base), std::str::from_utf8(&content)) {
                            (Ok(base_s), Ok(new_s)) => {
                                let diff = diff_blobs(base_s, new_s);
                                if diff.is_empty() {
                                    continue;
                                }
                                let Some(accepted) = select_hunks(&diff, cb)? else {
                                    continue;
                                };
                                let staged_text = apply_hunks(base_s, &diff, &accepted);
                                blob_create(store, staged_text.as_bytes())?
                            }
                            // Binary content cannot be split into hunks.
                            _ => blob_create(store, &content)?,
                        }
                    }
                    _ => blob_create(store, &content)?,
                };

                let entry = index.get_mut(relpath).expect("entry fetched above");
                entry.staged_blob_id = Some(staged_blob);
                entry.stage = if entry.has_blob() {
                    Stage::Modify
                } else {
                    Stage::Add
                };
                entry.file_type = match disk_type {
                    IndexFileType::Symlink => IndexFileType::Symlink,
                    _ if entry.file_type == IndexFileType::BadSymlink => IndexFileType::BadSymlink,
                    _ => IndexFileType::Regular,
                };
                staged_count += 1;

                let entry = index.get(relpath).expect("entry exists");
                status_cb(&StatusReport {
                    status,
                    staged_status: staged_status(entry.stage),
                    path: relpath,
                    blob_id: entry.blob_id,
                    staged_blob_id: entry.staged_blob_id,
                    commit_id: entry.commit_id,
                })?;
            }
            FileStatus::Delete | FileStatus::Missing => {
                let entry = index
                    .get_mut(relpath)
                    .ok_or_else(|| WorktreeError::BadPath(relpath.to_string()))?;
                entry.stage = Stage::Delete;
                entry.staged_blob_id = None;
                staged_count += 1;

                let entry = index.get(relpath).expect("entry exists");
                status_cb(&StatusReport {
                    status,
                    staged_status: FileStatus::Delete,
                    path: relpath,
                    blob_id: entry.blob_id,
                    staged_blob_id: None,
                    commit_id: entry.commit_id,
                })?;
            }
            _ => {}
        }
    }

    if staged_count == 0 {
        return Err(WorktreeError::NoChanges);
    }
    index.write_to(&wt.fileindex_path())?;
    debug!(count = staged_count, "staged paths");
    Ok(())
}

/// Unstage changes on the given paths.
///
/// Without a patch callback, the staged state is simply cleared; the
/// working file was never touched by stage, so index and file return to
/// their pre-stage form. With a patch callback, accepted hunks move
/// back into the working file (three-way merged over it with the base
/// blob as ancestor) and the remaining hunks form the new staged blob.
pub fn unstage(
    wt: &Worktree,
    repo: &Repository,
    paths: &[&str],
    mut patch_cb: Option<&mut PatchFn<'_>>,
    progress: &mut ProgressFn<'_>,
) -> WtResult<()> {
    wt.lock_exclusive()?;
    let result = unstage_inner(wt, repo, paths, patch_cb.as_deref_mut(), progress);
    let unlock = wt.lock_shared();
    result.and(unlock)
}

fn unstage_inner(
    wt: &Worktree,
    repo: &Repository,
    paths: &[&str],
    mut patch_cb: Option<&mut PatchFn<'_>>,
    progress: &mut ProgressFn<'_>,
) -> WtResult<()> {
    let mut index = FileIndex::read_from(&wt.fileindex_path())?;
    let store = repo.store();

    let mut unstaged_count = 0usize;
    for relpath in paths {
        let Some(entry) = index.get(relpath) else {
            continue;
        };
        if !entry.is_staged() {
            continue;
        }
        let old_stage = entry.stage;

        match old_stage {
            Stage::Delete => {
                let entry = index.get_mut(relpath).expect("entry exists");
                entry.clear_stage();
                unstaged_count += 1;
                progress(FileStatus::Delete, relpath)?;
            }
            Stage::Add | Stage::Modify => {
                let staged_id = entry.staged_blob_id;
                let base_id = entry.blob_id;
                match &mut patch_cb {
                    None => {
                        let entry = index.get_mut(relpath).expect("entry exists");
                        entry.clear_stage();
                        unstaged_count += 1;
                        progress(staged_status(old_stage), relpath)?;
                    }
                    Some(cb) => {
                        let staged = read_blob_text(store, staged_id)?;
                        let base = read_blob_text(store, base_id)?;
                        let (Ok(base_s), Ok(staged_s)) =
                            (std::str::from_utf8(&base), std::str::from_utf8(&staged))
                        else {
                            // Binary staged content unstages whole.
                            let entry = index.get_mut(relpath).expect("entry exists");
                            entry.clear_stage();
                            unstaged_count += 1;
                            progress(staged_status(old_stage), relpath)?;
                            continue;
                        };

                        let diff = diff_blobs(base_s, staged_s);
                        if diff.is_empty() {
                            let entry = index.get_mut(relpath).expect("entry exists");
                            entry.clear_stage();
                            unstaged_count += 1;
                            progress(staged_status(old_stage), relpath)?;
                            continue;
                        }
                        let Some(to_unstage) = select_hunks(&diff, cb)? else {
                            continue;
                        };
                        let retained: Vec<usize> = (0..diff.hunks.len())
                            .filter(|i| !to_unstage.contains(i))
                            .collect();

                        // Hunks moving back to the working file.
                        let unstaged_text = apply_hunks(base_s, &diff, &to_unstage);
                        let ondisk = wt.ondisk_path(relpath);
                        let meta = std::fs::symlink_metadata(&ondisk)?;
                        use std::os::unix::fs::PermissionsExt;
                        install::merge_file(
                            wt,
                            Some(&base),
                            &ondisk,
                            relpath,
                            meta.permissions().mode(),
                            unstaged_text.as_bytes(),
                            "unstaged changes",
                            progress,
                        )?;

                        // Hunks that remain staged, if any.
                        let entry = index.get_mut(relpath).expect("entry exists");
                        if retained.is_empty() {
                            entry.clear_stage();
                        } else {
                            let retained_text = apply_hunks(base_s, &diff, &retained);
                            entry.staged_blob_id =
                                Some(blob_create(store, retained_text.as_bytes())?);
                        }
                        unstaged_count += 1;
                    }
                }
            }
            Stage::None => {}
        }
    }

    if unstaged_count == 0 {
        return Err(WorktreeError::NoChanges);
    }
    index.write_to(&wt.fileindex_path())?;
    debug!(count = unstaged_count, "unstaged paths");
    Ok(())
}
