//! Merging the changes between two commits into the work tree.
//!
//! This is the engine behind the three-way merge operation and the
//! per-commit replay step of rebase and histedit: diff the trees of
//! `commit1` (ancestor side) and `commit2` (incoming side) at the work
//! tree's path prefix, then fold each change into the on-disk files,
//! using the ancestor blob as the merge base. Local modifications are
//! never discarded; disagreements produce conflict markers.

use grove_index::{FileIndex, FileEntry, EntryAction};
use grove_store::{lookup, TreeEntry};
use grove_types::ObjectId;

use crate::error::{WorktreeError, WtResult};
use crate::install;
use crate::meta::Worktree;
use crate::repo::Repository;
use crate::status::{get_file_status, FileStatus};
use crate::{CancelFn, ProgressFn};

/// Reject merges into an unsuitable work tree: every entry must be
/// based on the work tree's base commit and none may be conflicted.
pub(crate) fn check_merge_ok(
    wt: &Worktree,
    repo: &Repository,
    index: &mut FileIndex,
) -> WtResult<()> {
    let base = wt.base_commit();
    index.for_each_entry_safe::<WorktreeError>(|entry| {
        if entry.commit_id != Some(base) {
            return Err(WorktreeError::MixedCommits);
        }
        Ok(EntryAction::Keep)
    })?;

    // The conflict scan needs the full status ladder, which wants the
    // store; run it in a second pass.
    for path in index.paths() {
        let ondisk = wt.ondisk_path(&path);
        let (status, _) = get_file_status(index.get(&path), &ondisk, repo.store())?;
        if status == FileStatus::Conflict {
            return Err(WorktreeError::Conflicts);
        }
    }
    Ok(())
}

fn statuses_mergeable(status: FileStatus) -> bool {
    matches!(
        status,
        FileStatus::NoChange | FileStatus::Modify | FileStatus::Conflict | FileStatus::Add
    )
}

fn merge_changed_file(
    wt: &Worktree,
    index: &mut FileIndex,
    relpath: &str,
    te1: &TreeEntry,
    te2: &TreeEntry,
    commit2: &ObjectId,
    repo: &Repository,
    progress: &mut ProgressFn<'_>,
) -> WtResult<()> {
    if index.get(relpath).is_none() {
        return progress(FileStatus::Missing, relpath);
    }

    let ondisk = wt.ondisk_path(relpath);
    let (status, meta) = get_file_status(index.get(relpath), &ondisk, repo.store())?;

    if status == FileStatus::Delete {
        return progress(FileStatus::Merge, relpath);
    }
    if !statuses_mergeable(status) {
        return progress(status, relpath);
    }

    let blob1 = lookup::read_blob(repo.store(), &te1.object_id)?;
    let blob2 = lookup::read_blob(repo.store(), &te2.object_id)?;
    let label_deriv = format!("commit {}", commit2.to_hex());

    if te2.mode.is_symlink() {
        let base_target = String::from_utf8_lossy(&blob1.data).into_owned();
        let deriv_target = String::from_utf8_lossy(&blob2.data).into_owned();
        install::merge_symlink(
            wt,
            Some(&base_target),
            &ondisk,
            relpath,
            Some(&deriv_target),
            &label_deriv,
            "3-way merge base",
            progress,
        )?;
    } else {
        let mode = meta
            .map(|m| {
                use std::os::unix::fs::PermissionsExt;
                m.permissions().mode()
            })
            .unwrap_or(0o644);
        install::merge_file(
            wt,
            Some(&blob1.data),
            &ondisk,
            relpath,
            mode,
            &blob2.data,
            &label_deriv,
            progress,
        )?;
    }
    Ok(())
}

fn merge_deleted_file(
    wt: &Worktree,
    index: &mut FileIndex,
    relpath: &str,
    repo: &Repository,
    progress: &mut ProgressFn<'_>,
) -> WtResult<()> {
    if index.get(relpath).is_none() {
        return progress(FileStatus::Missing, relpath);
    }
    let ondisk = wt.ondisk_path(relpath);
    let (status, _) = get_file_status(index.get(relpath), &ondisk, repo.store())?;

    match status {
        FileStatus::NoChange => {
            progress(FileStatus::Delete, relpath)?;
            install::remove_ondisk_file(wt.root(), relpath)?;
            if let Some(entry) = index.get_mut(relpath) {
                entry.mark_deleted_from_disk();
            }
        }
        FileStatus::Delete | FileStatus::Missing => {
            progress(FileStatus::Delete, relpath)?;
            if let Some(entry) = index.get_mut(relpath) {
                entry.mark_deleted_from_disk();
            }
        }
        FileStatus::Add | FileStatus::Modify | FileStatus::Conflict => {
            progress(FileStatus::CannotDelete, relpath)?;
        }
        FileStatus::Obstructed => {
            progress(status, relpath)?;
        }
        _ => {}
    }
    Ok(())
}

fn merge_added_file(
    wt: &Worktree,
    index: &mut FileIndex,
    relpath: &str,
    te2: &TreeEntry,
    commit2: &ObjectId,
    repo: &Repository,
    progress: &mut ProgressFn<'_>,
) -> WtResult<()> {
    let ondisk = wt.ondisk_path(relpath);
    let blob2 = lookup::read_blob(repo.store(), &te2.object_id)?;

    if index.get(relpath).is_some() {
        let (status, meta) = get_file_status(index.get(relpath), &ondisk, repo.store())?;
        if !statuses_mergeable(status) {
            return progress(status, relpath);
        }
        // Both sides added the path: merge with an empty ancestor.
        let label_deriv = format!("commit {}", commit2.to_hex());
        if te2.mode.is_symlink() {
            let deriv_target = String::from_utf8_lossy(&blob2.data).into_owned();
            install::merge_symlink(
                wt,
                None,
                &ondisk,
                relpath,
                Some(&deriv_target),
                &label_deriv,
                "3-way merge base",
                progress,
            )?;
        } else {
            let mode = meta
                .map(|m| {
                    use std::os::unix::fs::PermissionsExt;
                    m.permissions().mode()
                })
                .unwrap_or(0o644);
            install::merge_file(
                wt,
                None,
                &ondisk,
                relpath,
                mode,
                &blob2.data,
                &label_deriv,
                progress,
            )?;
        }
        return Ok(());
    }

    // No local counterpart: install and track as a scheduled addition
    // so the next commit picks it up.
    let mut entry = FileEntry::new(relpath);
    if te2.mode.is_symlink() {
        let target = String::from_utf8_lossy(&blob2.data).into_owned();
        entry.file_type =
            install::install_symlink(wt, &ondisk, relpath, &target, false, false, progress)?;
    } else {
        install::install_blob(
            wt,
            &ondisk,
            relpath,
            te2.mode.is_executable(),
            &blob2.data,
            false,
            false,
            progress,
        )?;
    }
    if let Ok(meta) = std::fs::symlink_metadata(&ondisk) {
        entry.update_fingerprint(&meta);
    }
    // No blob and no base commit: the entry reads as an addition.
    entry.blob_id = None;
    entry.commit_id = None;
    index.add(entry)?;
    Ok(())
}

/// Merge the tree difference `commit1..commit2` into the work tree.
///
/// `commit1` is the ancestor side (`None` merges `commit2`'s full tree
/// as additions). The index is mutated in memory; the caller rewrites
/// it.
pub(crate) fn merge_files(
    wt: &Worktree,
    index: &mut FileIndex,
    commit1: Option<&ObjectId>,
    commit2: &ObjectId,
    repo: &Repository,
    progress: &mut ProgressFn<'_>,
    cancel: &CancelFn<'_>,
) -> WtResult<()> {
    let store = repo.store();
    let files1 = match commit1 {
        Some(c) => {
            let tree1 = lookup::id_by_path(store, c, wt.path_prefix())?;
            lookup::tree_files(store, &tree1, "")?
        }
        None => Default::default(),
    };
    let tree2 = lookup::id_by_path(store, commit2, wt.path_prefix())?;
    let files2 = lookup::tree_files(store, &tree2, "")?;

    let mut paths: Vec<&String> = files1.keys().chain(files2.keys()).collect();
    paths.sort();
    paths.dedup();
    let paths: Vec<String> = paths.into_iter().cloned().collect();

    for relpath in &paths {
        if cancel() {
            return Err(WorktreeError::Cancelled);
        }
        match (files1.get(relpath), files2.get(relpath)) {
            (Some(te1), Some(te2)) => {
                if te1.object_id == te2.object_id && te1.mode == te2.mode {
                    continue;
                }
                merge_changed_file(wt, index, relpath, te1, te2, commit2, repo, progress)?;
            }
            (Some(_), None) => merge_deleted_file(wt, index, relpath, repo, progress)?,
            (None, Some(te2)) => {
                merge_added_file(wt, index, relpath, te2, commit2, repo, progress)?
            }
            (None, None) => unreachable!("path came from one of the maps"),
        }
    }
    Ok(())
}

/// Merge the changes between two commits into the work tree.
///
/// Pre-flight requires a uniform base (no mixed commits) and no
/// conflicted files. Partial results are never rolled back: conflict
/// markers and schedule-add entries are left for the user to resolve.
pub fn merge_files_into_worktree(
    wt: &Worktree,
    repo: &Repository,
    commit1: Option<&ObjectId>,
    commit2: &ObjectId,
    progress: &mut ProgressFn<'_>,
    cancel: &CancelFn<'_>,
) -> WtResult<()> {
    wt.lock_exclusive()?;
    let result = (|| {
        let mut index = FileIndex::read_from(&wt.fileindex_path())?;
        check_merge_ok(wt, repo, &mut index)?;
        merge_files(wt, &mut index, commit1, commit2, repo, progress, cancel)?;
        index.write_to(&wt.fileindex_path())?;
        Ok(())
    })();
    let unlock = wt.lock_shared();
    result.and(unlock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::checkout_files;
    use crate::never_cancel;
    use crate::status::{worktree_status, StatusReport};
    use crate::testutil::{self, Spec};
    use std::fs;

    fn checked_out(
        files: &[(&str, &str)],
    ) -> (tempfile::TempDir, Worktree, Repository, ObjectId) {
        let (repo, commit) = testutil::test_repo(files);
        let dir = tempfile::tempdir().unwrap();
        let wtpath = dir.path().join("wt");
        Worktree::init(&wtpath, &repo, "refs/heads/main", "/").unwrap();
        let wt = Worktree::open(&wtpath).unwrap();
        let cancel = never_cancel();
        checkout_files(&wt, &repo, &[""], &mut |_, _| Ok(()), &cancel).unwrap();
        (dir, wt, repo, commit)
    }

    fn run_merge(
        wt: &Worktree,
        repo: &Repository,
        commit1: Option<&ObjectId>,
        commit2: &ObjectId,
    ) -> Vec<(FileStatus, String)> {
        let mut events = Vec::new();
        let cancel = never_cancel();
        merge_files_into_worktree(
            wt,
            repo,
            commit1,
            commit2,
            &mut |s, p| {
                events.push((s, p.to_string()));
                Ok(())
            },
            &cancel,
        )
        .unwrap();
        events
    }

    fn statuses(wt: &Worktree, repo: &Repository) -> Vec<(FileStatus, String)> {
        let mut out = Vec::new();
        let cancel = never_cancel();
        worktree_status(
            wt,
            repo,
            &[""],
            &mut |r: &StatusReport<'_>| {
                out.push((r.status, r.path.to_string()));
                Ok(())
            },
            &cancel,
        )
        .unwrap();
        out
    }

    #[test]
    fn merge_applies_incoming_edit() {
        let (_dir, wt, repo, base) = checked_out(&[("alpha", "one\ntwo\n")]);
        let incoming = testutil::commit_files(
            &repo,
            &[base],
            &[("alpha", Spec::File("one\nTWO\n"))],
            "edit alpha\n",
            1_700_000_100,
        );

        let events = run_merge(&wt, &repo, Some(&base), &incoming);
        assert!(events.contains(&(FileStatus::Merge, "alpha".to_string())));
        assert_eq!(
            fs::read_to_string(wt.ondisk_path("alpha")).unwrap(),
            "one\nTWO\n"
        );
        // The merged edit is a local modification until committed.
        assert_eq!(statuses(&wt, &repo), vec![(FileStatus::Modify, "alpha".to_string())]);
    }

    #[test]
    fn merge_installs_added_file_as_scheduled_add() {
        let (_dir, wt, repo, base) = checked_out(&[("alpha", "a\n")]);
        let incoming = testutil::commit_files(
            &repo,
            &[base],
            &[("alpha", Spec::File("a\n")), ("fresh", Spec::File("new\n"))],
            "add fresh\n",
            1_700_000_100,
        );

        let events = run_merge(&wt, &repo, Some(&base), &incoming);
        assert!(events.contains(&(FileStatus::Add, "fresh".to_string())));
        assert_eq!(statuses(&wt, &repo), vec![(FileStatus::Add, "fresh".to_string())]);
    }

    #[test]
    fn merge_deletes_unmodified_file() {
        let (_dir, wt, repo, base) = checked_out(&[("alpha", "a\n"), ("beta", "b\n")]);
        let incoming = testutil::commit_files(
            &repo,
            &[base],
            &[("alpha", Spec::File("a\n"))],
            "drop beta\n",
            1_700_000_100,
        );

        let events = run_merge(&wt, &repo, Some(&base), &incoming);
        assert!(events.contains(&(FileStatus::Delete, "beta".to_string())));
        assert!(!wt.ondisk_path("beta").exists());
        // The deletion is journaled, not yet committed.
        assert_eq!(statuses(&wt, &repo), vec![(FileStatus::Delete, "beta".to_string())]);
    }

    #[test]
    fn merge_refuses_to_delete_modified_file() {
        let (_dir, wt, repo, base) = checked_out(&[("alpha", "a\n"), ("beta", "b\n")]);
        fs::write(wt.ondisk_path("beta"), "locally changed\n").unwrap();
        let incoming = testutil::commit_files(
            &repo,
            &[base],
            &[("alpha", Spec::File("a\n"))],
            "drop beta\n",
            1_700_000_100,
        );

        let events = run_merge(&wt, &repo, Some(&base), &incoming);
        assert!(events.contains(&(FileStatus::CannotDelete, "beta".to_string())));
        assert!(wt.ondisk_path("beta").exists());
    }

    #[test]
    fn merge_conflicting_edits_leaves_markers() {
        let (_dir, wt, repo, base) = checked_out(&[("alpha", "one\ntwo\n")]);
        fs::write(wt.ondisk_path("alpha"), "one\nLOCAL\n").unwrap();
        let incoming = testutil::commit_files(
            &repo,
            &[base],
            &[("alpha", Spec::File("one\nINCOMING\n"))],
            "edit alpha\n",
            1_700_000_100,
        );

        let events = run_merge(&wt, &repo, Some(&base), &incoming);
        assert!(events.contains(&(FileStatus::MergeConflict, "alpha".to_string())));
        assert_eq!(statuses(&wt, &repo), vec![(FileStatus::Conflict, "alpha".to_string())]);
    }

    #[test]
    fn merge_rejects_conflicted_worktree() {
        let (_dir, wt, repo, base) = checked_out(&[("alpha", "one\ntwo\n")]);
        fs::write(
            wt.ondisk_path("alpha"),
            "<<<<<<< a\nx\n=======\ny\n>>>>>>> b\n",
        )
        .unwrap();
        let incoming = testutil::commit_files(
            &repo,
            &[base],
            &[("alpha", Spec::File("z\n"))],
            "edit\n",
            1_700_000_100,
        );

        let cancel = never_cancel();
        let err = merge_files_into_worktree(
            &wt,
            &repo,
            Some(&base),
            &incoming,
            &mut |_, _| Ok(()),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, WorktreeError::Conflicts));
    }

    #[test]
    fn merge_rejects_mixed_base_commits() {
        let (_dir, wt, repo, base) = checked_out(&[("alpha", "a\n")]);
        let incoming = testutil::commit_files(
            &repo,
            &[base],
            &[("alpha", Spec::File("a2\n"))],
            "edit\n",
            1_700_000_100,
        );

        // Doctor one entry's base commit.
        let mut index = FileIndex::read_from(&wt.fileindex_path()).unwrap();
        index.get_mut("alpha").unwrap().commit_id = Some(ObjectId::from_bytes(b"other"));
        index.write_to(&wt.fileindex_path()).unwrap();

        let cancel = never_cancel();
        let err = merge_files_into_worktree(
            &wt,
            &repo,
            Some(&base),
            &incoming,
            &mut |_, _| Ok(()),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, WorktreeError::MixedCommits));
    }
}
