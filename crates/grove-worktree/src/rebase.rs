//! Rebase: journaled replay of a branch's commits onto the work tree's
//! base.
//!
//! All state lives in repository references derived from the work-tree
//! uuid, so an interrupted rebase survives process exit: the tmp branch
//! carries the commits already replayed, the commit ref names the source
//! commit in flight, and two symbolic refs remember the branches
//! involved. Continue picks up exactly where the journal points; abort
//! walks everything back.

use std::collections::HashSet;

use tracing::debug;

use grove_index::FileIndex;
use grove_refs::{Ref, RefStore};
use grove_store::lookup;
use grove_types::ObjectId;

use crate::checkout::checkout_files;
use crate::commit::{commit_worktree, Commitable};
use crate::error::{WorktreeError, WtResult};
use crate::merge;
use crate::meta::Worktree;
use crate::refnames;
use crate::repo::Repository;
use crate::revert::revert_file;
use crate::status::{get_file_status, status_walk, FileStatus};
use crate::{CancelFn, ProgressFn};

/// Where a driver-level rebase or histedit run ended up.
#[derive(Debug)]
pub enum RebaseOutcome {
    /// Every commit was replayed and the branch was moved.
    Complete {
        /// The replayed commits, oldest first. Elided commits are
        /// absent.
        new_commits: Vec<ObjectId>,
    },
    /// A replay produced conflicts; the journal refs are left in place
    /// so the operation can be continued or aborted.
    Conflict {
        /// The source commit whose replay conflicted.
        commit: ObjectId,
    },
}

/// Verify the work tree is fit for (or mid-way through) a rewrite.
pub(crate) fn check_rewrite_ok(
    wt: &Worktree,
    repo: &Repository,
    index: &mut FileIndex,
    in_progress: bool,
) -> WtResult<()> {
    let base = wt.base_commit();
    for path in index.paths() {
        let Some(entry) = index.get(&path) else {
            continue;
        };
        if !in_progress {
            if entry.commit_id != Some(base) {
                return Err(WorktreeError::MixedCommits);
            }
            if entry.is_staged() {
                return Err(WorktreeError::FileStaged(path.clone()));
            }
        }
        let ondisk = wt.ondisk_path(&path);
        let (status, _) = get_file_status(index.get(&path), &ondisk, repo.store())?;
        if in_progress {
            if status == FileStatus::Conflict {
                return Err(WorktreeError::Conflicts);
            }
        } else if status != FileStatus::NoChange {
            return Err(WorktreeError::Modified);
        }
    }
    Ok(())
}

/// Record the source commit being replayed. Resuming over an existing
/// record requires the same commit.
pub(crate) fn store_commit_id(
    refname: &str,
    commit_id: &ObjectId,
    mismatch: WorktreeError,
    repo: &Repository,
) -> WtResult<()> {
    match repo.refs().read_ref(refname)? {
        None => {
            repo.refs()
                .write_ref(&Ref::direct(refname, *commit_id))?;
            Ok(())
        }
        Some(existing) => {
            let stored = repo.refs().resolve(&existing)?;
            if stored != *commit_id {
                return Err(mismatch);
            }
            Ok(())
        }
    }
}

/// Delete a ref, tolerating its absence.
pub(crate) fn delete_ref_if_exists(repo: &Repository, name: &str) -> WtResult<()> {
    repo.refs().delete_ref(name)?;
    Ok(())
}

fn delete_rebase_refs(wt: &Worktree, repo: &Repository) -> WtResult<()> {
    delete_ref_if_exists(repo, &refnames::rebase_tmp_ref(wt))?;
    delete_ref_if_exists(repo, &refnames::rebase_newbase_symref(wt))?;
    delete_ref_if_exists(repo, &refnames::rebase_branch_symref(wt))?;
    delete_ref_if_exists(repo, &refnames::rebase_commit_ref(wt))?;
    Ok(())
}

/// Returns `true` when a rebase journal owns this work tree.
pub fn rebase_in_progress(wt: &Worktree) -> bool {
    wt.head_ref() == refnames::rebase_tmp_ref(wt)
}

/// Begin a rebase of `branch` onto the work tree's current base.
///
/// The work tree must be clean: no modifications, no conflicts, no
/// staged files, no mixed base commits. On success the work tree's head
/// points at the tmp branch and the exclusive lock is retained for the
/// replay loop.
pub fn rebase_prepare(wt: &mut Worktree, repo: &Repository, branch: &str) -> WtResult<()> {
    wt.lock_exclusive()?;
    let result = (|| {
        let mut index = FileIndex::read_from(&wt.fileindex_path())?;
        check_rewrite_ok(wt, repo, &mut index, false)?;

        repo.refs().write_ref(&Ref::symbolic(
            refnames::rebase_newbase_symref(wt),
            wt.head_ref(),
        ))?;
        repo.refs().write_ref(&Ref::symbolic(
            refnames::rebase_branch_symref(wt),
            branch,
        ))?;
        repo.refs().write_ref(&Ref::direct(
            refnames::rebase_tmp_ref(wt),
            wt.base_commit(),
        ))?;
        wt.set_head_ref(&refnames::rebase_tmp_ref(wt))?;
        debug!(branch, "rebase prepared");
        Ok(())
    })();
    if result.is_err() {
        let _ = wt.lock_shared();
    }
    result
}

/// Resume an interrupted rebase: re-take the exclusive lock and read the
/// journal. Returns the source commit in flight and the branch being
/// rebased.
pub fn rebase_continue(wt: &Worktree, repo: &Repository) -> WtResult<(ObjectId, String)> {
    wt.lock_exclusive()?;
    let result = (|| {
        let branch_ref = repo.refs().open_ref(&refnames::rebase_branch_symref(wt))?;
        let branch = branch_ref
            .symref_target()
            .ok_or_else(|| WorktreeError::MetaCorrupt("rebase branch ref not symbolic".into()))?
            .to_string();
        let commit_id = repo
            .refs()
            .resolve_name(&refnames::rebase_commit_ref(wt))?;
        Ok((commit_id, branch))
    })();
    if result.is_err() {
        let _ = wt.lock_shared();
    }
    result
}

/// Release the work tree mid-rebase, keeping the journal refs intact.
pub fn rebase_postpone(wt: &Worktree) -> WtResult<()> {
    wt.lock_shared()
}

/// Merge one source commit's changes into the work tree, journaling the
/// commit id first. Returns the merged paths for the commit step.
pub(crate) fn rewrite_merge_files(
    wt: &Worktree,
    repo: &Repository,
    commit_refname: &str,
    mismatch: WorktreeError,
    parent: Option<&ObjectId>,
    commit_id: &ObjectId,
    progress: &mut ProgressFn<'_>,
    cancel: &CancelFn<'_>,
) -> WtResult<Vec<String>> {
    store_commit_id(commit_refname, commit_id, mismatch, repo)?;

    let mut merged_paths: Vec<String> = Vec::new();
    let mut index = FileIndex::read_from(&wt.fileindex_path())?;
    {
        let mut collecting = |status: FileStatus, path: &str| -> WtResult<()> {
            progress(status, path)?;
            if matches!(
                status,
                FileStatus::Merge
                    | FileStatus::MergeConflict
                    | FileStatus::Conflict
                    | FileStatus::Add
                    | FileStatus::Delete
            ) && !merged_paths.iter().any(|p| p == path)
            {
                merged_paths.push(path.to_string());
            }
            Ok(())
        };
        merge::merge_files(wt, &mut index, parent, commit_id, repo, &mut collecting, cancel)?;
    }
    index.write_to(&wt.fileindex_path())?;
    Ok(merged_paths)
}

/// Merge one source commit during a rebase.
pub fn rebase_merge_files(
    wt: &Worktree,
    repo: &Repository,
    parent: Option<&ObjectId>,
    commit_id: &ObjectId,
    progress: &mut ProgressFn<'_>,
    cancel: &CancelFn<'_>,
) -> WtResult<Vec<String>> {
    rewrite_merge_files(
        wt,
        repo,
        &refnames::rebase_commit_ref(wt),
        WorktreeError::RebaseCommitId,
        parent,
        commit_id,
        progress,
        cancel,
    )
}

/// Commit the merged changes of one replayed source commit.
///
/// The commit carries the source author and author time, the source
/// committer with the current time, and the source log message unless
/// `new_logmsg` overrides it. An empty change set elides the commit and
/// returns `None`.
pub(crate) fn rewrite_commit(
    wt: &mut Worktree,
    repo: &Repository,
    commit_refname: &str,
    mismatch: WorktreeError,
    merged_paths: Option<&[String]>,
    orig_commit_id: &ObjectId,
    new_logmsg: Option<&str>,
) -> WtResult<Option<ObjectId>> {
    let stored = repo.refs().resolve_name(commit_refname)?;
    if stored != *orig_commit_id {
        return Err(mismatch);
    }

    let mut index = FileIndex::read_from(&wt.fileindex_path())?;
    let mut commitables: Vec<Commitable> = Vec::new();
    let cancel = crate::never_cancel();
    let scopes: Vec<String> = match merged_paths {
        Some(paths) => paths.to_vec(),
        None => vec![String::new()],
    };
    for scope in &scopes {
        collect_rewrite_commitables(wt, repo, &mut index, scope, &mut commitables, &cancel)?;
    }
    commitables.sort_by(|a, b| a.in_repo_path.cmp(&b.in_repo_path));

    if commitables.is_empty() {
        // No-op change; the commit is elided.
        delete_ref_if_exists(repo, commit_refname)?;
        return Ok(None);
    }

    let orig = lookup::read_commit(repo.store(), orig_commit_id)?;
    let logmsg = new_logmsg.map(str::to_string).unwrap_or(orig.message);
    let head_commit_id = repo.refs().resolve_name(wt.head_ref())?;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let new_commit_id = commit_worktree(
        wt,
        repo,
        &mut commitables,
        &head_commit_id,
        &orig.author,
        orig.author_time,
        &orig.committer,
        now,
        &mut move |_| Ok(logmsg.clone()),
        &mut |_, _| Ok(()),
    )?;

    delete_ref_if_exists(repo, commit_refname)?;
    update_index_after_rewrite(wt, &commitables, new_commit_id, &mut index)?;
    index.write_to(&wt.fileindex_path())?;
    debug!(from = %orig_commit_id, to = %new_commit_id, "replayed commit");
    Ok(Some(new_commit_id))
}

fn collect_rewrite_commitables(
    wt: &Worktree,
    repo: &Repository,
    index: &mut FileIndex,
    scope: &str,
    commitables: &mut Vec<Commitable>,
    cancel: &CancelFn<'_>,
) -> WtResult<()> {
    let mut pending: Vec<(FileStatus, String, Option<ObjectId>, Option<ObjectId>, Option<ObjectId>)> =
        Vec::new();
    {
        let mut cb = |report: &crate::status::StatusReport<'_>| -> WtResult<()> {
            match report.status {
                FileStatus::Conflict => {
                    Err(WorktreeError::CommitConflict(report.path.to_string()))
                }
                FileStatus::Modify
                | FileStatus::Add
                | FileStatus::Delete
                | FileStatus::ModeChange => {
                    pending.push((
                        report.status,
                        report.path.to_string(),
                        report.blob_id,
                        report.staged_blob_id,
                        report.commit_id,
                    ));
                    Ok(())
                }
                _ => Ok(()),
            }
        };
        status_walk(wt, repo, index, scope, &mut cb, cancel)?;
    }
    for (status, path, blob_id, staged_blob_id, commit_id) in pending {
        if commitables.iter().any(|c| c.path == path) {
            continue;
        }
        let ondisk = wt.ondisk_path(&path);
        let (executable, is_symlink) = if status == FileStatus::Delete {
            (false, false)
        } else {
            let meta = std::fs::symlink_metadata(&ondisk)?;
            use std::os::unix::fs::PermissionsExt;
            (
                meta.permissions().mode() & 0o100 != 0,
                meta.file_type().is_symlink(),
            )
        };
        commitables.push(Commitable {
            path: path.clone(),
            in_repo_path: wt.in_repo_path(&path),
            ondisk_path: ondisk,
            status,
            staged_status: FileStatus::NoChange,
            executable,
            is_symlink,
            blob_id: None,
            base_blob_id: blob_id,
            staged_blob_id,
            base_commit_id: commit_id,
            added_to_tree: false,
        });
    }
    Ok(())
}

fn update_index_after_rewrite(
    wt: &Worktree,
    commitables: &[Commitable],
    new_commit: ObjectId,
    index: &mut FileIndex,
) -> WtResult<()> {
    for ct in commitables {
        match index.get_mut(&ct.path) {
            Some(entry) => {
                if ct.status == FileStatus::Delete {
                    index.remove(&ct.path);
                } else {
                    entry.blob_id = ct.blob_id;
                    entry.commit_id = Some(new_commit);
                    entry.clear_stage();
                    if let Ok(meta) = std::fs::symlink_metadata(&ct.ondisk_path) {
                        entry.update_fingerprint(&meta);
                    }
                }
            }
            None => {
                let mut entry = grove_index::FileEntry::new(&ct.path);
                entry.blob_id = ct.blob_id;
                entry.commit_id = Some(new_commit);
                if ct.is_symlink {
                    entry.file_type = grove_index::IndexFileType::Symlink;
                }
                if let Ok(meta) = std::fs::symlink_metadata(&ct.ondisk_path) {
                    entry.update_fingerprint(&meta);
                }
                index.add(entry)?;
            }
        }
    }
    Ok(())
}

/// Commit one replayed source commit during a rebase.
pub fn rebase_commit(
    wt: &mut Worktree,
    repo: &Repository,
    merged_paths: Option<&[String]>,
    orig_commit_id: &ObjectId,
) -> WtResult<Option<ObjectId>> {
    rewrite_commit(
        wt,
        repo,
        &refnames::rebase_commit_ref(wt),
        WorktreeError::RebaseCommitId,
        merged_paths,
        orig_commit_id,
        None,
    )
}

/// Finish a rebase: point the rebased branch at the tmp-branch tip,
/// switch the work tree to it, and drop the journal refs.
pub fn rebase_complete(wt: &mut Worktree, repo: &Repository) -> WtResult<()> {
    let result = (|| {
        let new_head = repo.refs().resolve_name(&refnames::rebase_tmp_ref(wt))?;
        let branch_ref = repo.refs().open_ref(&refnames::rebase_branch_symref(wt))?;
        let branch = branch_ref
            .symref_target()
            .ok_or_else(|| WorktreeError::MetaCorrupt("rebase branch ref not symbolic".into()))?
            .to_string();

        repo.refs().write_ref(&Ref::direct(branch.clone(), new_head))?;
        wt.set_head_ref(&branch)?;
        delete_rebase_refs(wt, repo)?;
        debug!(branch, head = %new_head, "rebase complete");
        Ok(())
    })();
    let unlock = wt.lock_shared();
    result.and(unlock)
}

/// Revert local changes and restore the pre-rewrite checkout; shared by
/// rebase and histedit aborts.
pub(crate) fn restore_worktree(
    wt: &Worktree,
    repo: &Repository,
    progress: &mut ProgressFn<'_>,
) -> WtResult<()> {
    let mut index = FileIndex::read_from(&wt.fileindex_path())?;

    let mut revertible: Vec<(FileStatus, String)> = Vec::new();
    {
        let cancel = crate::never_cancel();
        let mut cb = |report: &crate::status::StatusReport<'_>| -> WtResult<()> {
            if matches!(
                report.status,
                FileStatus::Add
                    | FileStatus::Delete
                    | FileStatus::Modify
                    | FileStatus::Conflict
                    | FileStatus::Missing
            ) {
                revertible.push((report.status, report.path.to_string()));
            }
            Ok(())
        };
        status_walk(wt, repo, &mut index, "", &mut cb, &cancel)?;
    }
    for (status, path) in &revertible {
        if *status == FileStatus::Add {
            // Files the rewrite brought in must disappear again: the
            // abort contract restores the on-disk content exactly.
            progress(FileStatus::Revert, path)?;
            crate::install::remove_ondisk_file(wt.root(), path)?;
            index.remove(path);
        } else {
            revert_file(wt, &mut index, path, repo, progress)?;
        }
    }
    index.write_to(&wt.fileindex_path())?;

    let cancel = crate::never_cancel();
    checkout_files(wt, repo, &[""], progress, &cancel)
}

/// Abandon a rebase: restore the original branch, base commit, and
/// on-disk content, and drop the journal refs.
pub fn rebase_abort(
    wt: &mut Worktree,
    repo: &Repository,
    progress: &mut ProgressFn<'_>,
) -> WtResult<()> {
    wt.lock_exclusive()?;
    let result = (|| {
        let newbase = repo.refs().open_ref(&refnames::rebase_newbase_symref(wt))?;
        let branch = newbase
            .symref_target()
            .ok_or_else(|| WorktreeError::MetaCorrupt("rebase newbase ref not symbolic".into()))?
            .to_string();
        wt.set_head_ref(&branch)?;
        let commit_id = repo.refs().resolve_name(&branch)?;
        wt.set_base_commit(repo, commit_id)?;
        delete_rebase_refs(wt, repo)?;
        restore_worktree(wt, repo, progress)
    })();
    let unlock = wt.lock_shared();
    result.and(unlock)
}

/// The source commits a rebase of `tip` onto `base` must replay:
/// first-parent history from `tip` back to (excluding) the youngest
/// ancestor shared with `base`, oldest first.
pub(crate) fn commits_to_replay(
    repo: &Repository,
    tip: &ObjectId,
    base: &ObjectId,
) -> WtResult<Vec<ObjectId>> {
    let mut base_ancestors: HashSet<ObjectId> = HashSet::new();
    let mut cursor = Some(*base);
    while let Some(id) = cursor {
        base_ancestors.insert(id);
        cursor = lookup::read_commit(repo.store(), &id)?.first_parent().copied();
    }

    let mut commits = Vec::new();
    let mut cursor = Some(*tip);
    while let Some(id) = cursor {
        if base_ancestors.contains(&id) {
            break;
        }
        commits.push(id);
        cursor = lookup::read_commit(repo.store(), &id)?.first_parent().copied();
    }
    commits.reverse();
    Ok(commits)
}

/// Rebase `branch` onto the work tree's current base commit, driving
/// the whole journaled loop.
///
/// Stops at the first conflicting replay, leaving the journal in place
/// for continue or abort.
pub fn rebase_branch(
    wt: &mut Worktree,
    repo: &Repository,
    branch: &str,
    progress: &mut ProgressFn<'_>,
    cancel: &CancelFn<'_>,
) -> WtResult<RebaseOutcome> {
    let tip = repo.refs().resolve_name(branch)?;
    let commits = commits_to_replay(repo, &tip, &wt.base_commit())?;

    rebase_prepare(wt, repo, branch)?;

    let mut new_commits = Vec::new();
    for commit_id in &commits {
        let parent = lookup::read_commit(repo.store(), commit_id)?
            .first_parent()
            .copied();
        let mut conflicted = false;
        let merged = {
            let mut watching = |status: FileStatus, path: &str| -> WtResult<()> {
                if status == FileStatus::MergeConflict {
                    conflicted = true;
                }
                progress(status, path)
            };
            rebase_merge_files(wt, repo, parent.as_ref(), commit_id, &mut watching, cancel)?
        };
        if conflicted {
            rebase_postpone(wt)?;
            return Ok(RebaseOutcome::Conflict { commit: *commit_id });
        }
        if let Some(new_id) = rebase_commit(wt, repo, Some(&merged), commit_id)? {
            new_commits.push(new_id);
        }
    }

    rebase_complete(wt, repo)?;
    Ok(RebaseOutcome::Complete { new_commits })
}
