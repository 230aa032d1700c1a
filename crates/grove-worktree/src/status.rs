//! The status engine.
//!
//! Classifies each path by comparing its on-disk state with the file
//! index and the object store. The decision ladder stats first and
//! reads content last: when the cached fingerprint matches, no blob is
//! ever opened, and when a full content comparison comes back clean the
//! fingerprint is refreshed so the next status call is O(stat).

use std::fs::{self, Metadata};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use grove_index::{DirDiffItem, FileEntry, FileIndex, Stage};
use grove_store::{lookup, ObjectStore};
use grove_types::ObjectId;

use crate::error::{oserr, WorktreeError, WtResult};
use crate::meta::{Worktree, GROVE_DIR};
use crate::repo::Repository;
use crate::CancelFn;

/// Classification of a path, also used for per-file progress events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileStatus {
    /// On-disk state matches the index and object store.
    NoChange,
    /// Content differs from the base blob.
    Modify,
    /// Scheduled for addition; no base blob yet.
    Add,
    /// An existing file's content was replaced during checkout.
    Update,
    /// Scheduled for deletion, or gone from the target tree.
    Delete,
    /// The file content carries conflict markers.
    Conflict,
    /// Tracked, expected on disk, but not found.
    Missing,
    /// On disk but not tracked by the index.
    Unversioned,
    /// A non-regular, non-symlink file sits on a tracked path.
    Obstructed,
    /// The path exists neither on disk nor in the index.
    NonExistent,
    /// Content matches but the executable bit differs.
    ModeChange,
    /// Incoming changes were merged into the file.
    Merge,
    /// Incoming changes conflicted with local changes.
    MergeConflict,
    /// The protective base-commit reference could not be written.
    BaseRefErr,
    /// The entry's base commit was bumped to the new base.
    BumpBase,
    /// Local changes prevent deleting the file.
    CannotDelete,
    /// The file's status prevents updating it.
    CannotUpdate,
    /// Local changes were reverted to the base content.
    Revert,
}

impl FileStatus {
    /// One-character abbreviation for progress output.
    pub fn abbrev(&self) -> char {
        match self {
            FileStatus::NoChange => ' ',
            FileStatus::Modify => 'M',
            FileStatus::Add => 'A',
            FileStatus::Update => 'U',
            FileStatus::Delete => 'D',
            FileStatus::Conflict => 'C',
            FileStatus::Missing => '!',
            FileStatus::Unversioned => '?',
            FileStatus::Obstructed => '~',
            FileStatus::NonExistent => 'N',
            FileStatus::ModeChange => 'm',
            FileStatus::Merge => 'G',
            FileStatus::MergeConflict => 'C',
            FileStatus::BaseRefErr => 'B',
            FileStatus::BumpBase => 'b',
            FileStatus::CannotDelete => 'd',
            FileStatus::CannotUpdate => '#',
            FileStatus::Revert => 'R',
        }
    }
}

/// The staged-status view of an entry's stage code.
pub fn staged_status(stage: Stage) -> FileStatus {
    match stage {
        Stage::None => FileStatus::NoChange,
        Stage::Add => FileStatus::Add,
        Stage::Modify => FileStatus::Modify,
        Stage::Delete => FileStatus::Delete,
    }
}

/// One status-walk result.
#[derive(Debug)]
pub struct StatusReport<'a> {
    pub status: FileStatus,
    pub staged_status: FileStatus,
    pub path: &'a str,
    pub blob_id: Option<ObjectId>,
    pub staged_blob_id: Option<ObjectId>,
    pub commit_id: Option<ObjectId>,
}

/// Status callback invoked once per reported path.
pub type StatusFn<'a> = dyn FnMut(&StatusReport<'_>) -> WtResult<()> + 'a;

/// Upgrade Modify to Conflict if the content carries an ordered set of
/// conflict markers at line starts.
fn content_conflict_status(content: &[u8]) -> FileStatus {
    let markers = [
        grove_merge::CONFLICT_MARKER_BEGIN,
        grove_merge::CONFLICT_MARKER_SEP,
        grove_merge::CONFLICT_MARKER_END,
    ];
    let mut next = 0;
    for line in content.split(|b| *b == b'\n') {
        if line.starts_with(markers[next].as_bytes()) {
            next += 1;
            if next == markers.len() {
                return FileStatus::Conflict;
            }
        }
    }
    FileStatus::Modify
}

fn stat_missing(e: &std::io::Error) -> bool {
    // ENOTDIR means a parent component is no longer a directory, which
    // for status purposes equals absence.
    oserr::missing(e) || e.raw_os_error() == Some(20)
}

/// Classify `ondisk` against its (optional) index entry.
///
/// Returns the status plus the stat buffer when the path exists.
pub fn get_file_status(
    entry: Option<&FileEntry>,
    ondisk: &Path,
    store: &dyn ObjectStore,
) -> WtResult<(FileStatus, Option<Metadata>)> {
    let meta = match fs::symlink_metadata(ondisk) {
        Ok(meta) => meta,
        Err(e) if stat_missing(&e) => {
            let status = match entry {
                Some(entry) => {
                    if entry.has_file_on_disk() {
                        FileStatus::Missing
                    } else {
                        FileStatus::Delete
                    }
                }
                None => FileStatus::NonExistent,
            };
            return Ok((status, None));
        }
        Err(e) => return Err(e.into()),
    };

    let ft = meta.file_type();
    if !ft.is_file() && !ft.is_symlink() {
        return Ok((FileStatus::Obstructed, Some(meta)));
    }

    let Some(entry) = entry else {
        return Ok((FileStatus::Unversioned, Some(meta)));
    };

    if !entry.has_file_on_disk() {
        return Ok((FileStatus::Delete, Some(meta)));
    }

    // Compare against the staged blob when one is recorded.
    let compare_id = match entry.stage {
        Stage::Add | Stage::Modify => entry.staged_blob_id.or(entry.blob_id),
        _ => entry.blob_id,
    };
    let Some(compare_id) = compare_id else {
        return Ok((FileStatus::Add, Some(meta)));
    };

    if !entry.fingerprint_differs(&meta) {
        return Ok((FileStatus::NoChange, Some(meta)));
    }

    // The on-disk representation must agree with the tracked one.
    let entry_is_symlink = entry.file_type == grove_index::IndexFileType::Symlink;
    if ft.is_symlink() != entry_is_symlink {
        return Ok((FileStatus::Modify, Some(meta)));
    }

    let blob = lookup::read_blob(store, &compare_id)?;
    let disk_content: Vec<u8> = if ft.is_symlink() {
        fs::read_link(ondisk)?
            .to_string_lossy()
            .into_owned()
            .into_bytes()
    } else {
        fs::read(ondisk)?
    };

    if disk_content == blob.data {
        let exec_on_disk = meta.mode() & 0o100 != 0;
        if !ft.is_symlink() && exec_on_disk != entry.executable {
            return Ok((FileStatus::ModeChange, Some(meta)));
        }
        return Ok((FileStatus::NoChange, Some(meta)));
    }

    let status = if ft.is_symlink() {
        FileStatus::Modify
    } else {
        content_conflict_status(&disk_content)
    };
    Ok((status, Some(meta)))
}

/// Refresh the fingerprint after a clean full-content comparison so the
/// next status call stops at the stat.
pub fn sync_timestamps(entry: &mut FileEntry, status: FileStatus, meta: &Metadata) {
    if status == FileStatus::NoChange && entry.fingerprint_differs(meta) {
        entry.update_fingerprint(meta);
    }
}

/// Classify one tracked path and feed the result to the status
/// callback. Clean results refresh the entry's fingerprint and are not
/// reported.
pub fn report_file_status(
    index: &mut FileIndex,
    relpath: &str,
    abspath: &Path,
    store: &dyn ObjectStore,
    cb: &mut StatusFn<'_>,
) -> WtResult<()> {
    let Some(entry) = index.get_mut(relpath) else {
        return Ok(());
    };
    let (status, meta) = get_file_status(Some(entry), abspath, store)?;
    if let Some(meta) = &meta {
        sync_timestamps(entry, status, meta);
    }
    if status != FileStatus::NoChange || entry.is_staged() {
        let report = StatusReport {
            status,
            staged_status: staged_status(entry.stage),
            path: relpath,
            blob_id: entry.blob_id,
            staged_blob_id: entry.staged_blob_id,
            commit_id: entry.commit_id,
        };
        cb(&report)?;
    }
    Ok(())
}

fn report_unversioned(relpath: &str, cb: &mut StatusFn<'_>) -> WtResult<()> {
    cb(&StatusReport {
        status: FileStatus::Unversioned,
        staged_status: FileStatus::NoChange,
        path: relpath,
        blob_id: None,
        staged_blob_id: None,
        commit_id: None,
    })
}

pub(crate) fn status_walk(
    wt: &Worktree,
    repo: &Repository,
    index: &mut FileIndex,
    scope: &str,
    cb: &mut StatusFn<'_>,
    cancel: &CancelFn<'_>,
) -> WtResult<()> {
    let ondisk = wt.ondisk_path(scope);
    let is_dir = fs::symlink_metadata(&ondisk)
        .map(|m| m.is_dir())
        .unwrap_or(false);

    if !is_dir {
        // A single file, a missing path, or an obstructed parent.
        if index.get(scope).is_none() {
            return report_unversioned(scope, cb);
        }
        return report_file_status(index, scope, &ondisk, repo.store(), cb);
    }

    let store = repo.store();
    grove_index::walk::diff_dir::<WorktreeError>(
        index,
        wt.root(),
        scope,
        &[GROVE_DIR],
        cancel,
        &mut |index, item| match item {
            DirDiffItem::Traverse { .. } => Ok(()),
            DirDiffItem::Both { path, .. } => {
                let abspath = wt.ondisk_path(&path);
                report_file_status(index, &path, &abspath, store, cb)
            }
            DirDiffItem::IndexOnly { path } => {
                let Some(entry) = index.get(&path) else {
                    return Ok(());
                };
                let status = if entry.has_file_on_disk() {
                    FileStatus::Missing
                } else {
                    FileStatus::Delete
                };
                cb(&StatusReport {
                    status,
                    staged_status: staged_status(entry.stage),
                    path: &path,
                    blob_id: entry.blob_id,
                    staged_blob_id: entry.staged_blob_id,
                    commit_id: entry.commit_id,
                })
            }
            DirDiffItem::DiskOnly { path, .. } => report_unversioned(&path, cb),
        },
    )
}

/// Report the status of every path under the given scopes.
///
/// Runs under the shared lock the work tree already holds; nothing on
/// disk is mutated (fingerprints refreshed by clean comparisons live in
/// memory only until the next mutating operation rewrites the index).
pub fn worktree_status(
    wt: &Worktree,
    repo: &Repository,
    paths: &[&str],
    cb: &mut StatusFn<'_>,
    cancel: &CancelFn<'_>,
) -> WtResult<()> {
    let mut index = FileIndex::read_from(&wt.fileindex_path())?;
    for path in paths {
        status_walk(wt, repo, &mut index, path, cb, cancel)?;
    }
    Ok(())
}
