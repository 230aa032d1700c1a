//! Scheduling additions and deletions, and reverting local changes.

use tracing::debug;

use grove_index::{FileEntry, FileIndex};
use grove_store::lookup;

use crate::error::{WorktreeError, WtResult};
use crate::install;
use crate::meta::Worktree;
use crate::repo::Repository;
use crate::status::{get_file_status, report_file_status, FileStatus, StatusFn};
use crate::ProgressFn;

/// Schedule unversioned files for addition.
///
/// Re-adding an already tracked path is a no-op. The new entry carries
/// no blob and no base commit, which is what makes it read as an
/// addition.
pub fn schedule_add(
    wt: &Worktree,
    repo: &Repository,
    paths: &[&str],
    status_cb: &mut StatusFn<'_>,
) -> WtResult<()> {
    wt.lock_exclusive()?;
    let result = (|| {
        let mut index = FileIndex::read_from(&wt.fileindex_path())?;
        for relpath in paths {
            if index.get(relpath).is_some() {
                continue;
            }
            let ondisk = wt.ondisk_path(relpath);
            let mut entry = FileEntry::new(*relpath);
            if let Ok(meta) = std::fs::symlink_metadata(&ondisk) {
                if meta.file_type().is_symlink() {
                    entry.file_type = grove_index::IndexFileType::Symlink;
                }
            }
            index.add(entry)?;
            report_file_status(&mut index, relpath, &ondisk, repo.store(), status_cb)?;
        }
        index.write_to(&wt.fileindex_path())?;
        Ok(())
    })();
    let unlock = wt.lock_shared();
    result.and(unlock)
}

/// Schedule tracked files for deletion: unlink them and journal the
/// removal in the index until the next commit.
///
/// Locally modified files are refused unless `delete_local_mods` is
/// set; any other dirty status refuses outright.
pub fn schedule_delete(
    wt: &Worktree,
    repo: &Repository,
    paths: &[&str],
    delete_local_mods: bool,
    status_cb: &mut StatusFn<'_>,
) -> WtResult<()> {
    wt.lock_exclusive()?;
    let result = (|| {
        let mut index = FileIndex::read_from(&wt.fileindex_path())?;
        for relpath in paths {
            if index.get(relpath).is_none() {
                return Err(WorktreeError::BadPath(relpath.to_string()));
            }
            let ondisk = wt.ondisk_path(relpath);
            let (status, _) = get_file_status(index.get(relpath), &ondisk, repo.store())?;
            match status {
                FileStatus::NoChange => {}
                FileStatus::Delete => {
                    return Err(WorktreeError::Io(std::io::Error::from(
                        std::io::ErrorKind::NotFound,
                    )))
                }
                FileStatus::Modify if delete_local_mods => {}
                FileStatus::Modify => {
                    return Err(WorktreeError::FileModified(relpath.to_string()))
                }
                _ => return Err(WorktreeError::FileStatus(relpath.to_string())),
            }
            std::fs::remove_file(&ondisk)?;
            if let Some(entry) = index.get_mut(relpath) {
                entry.mark_deleted_from_disk();
            }
            report_file_status(&mut index, relpath, &ondisk, repo.store(), status_cb)?;
        }
        index.write_to(&wt.fileindex_path())?;
        Ok(())
    })();
    let unlock = wt.lock_shared();
    result.and(unlock)
}

/// Revert one tracked path to its base content.
pub(crate) fn revert_file(
    wt: &Worktree,
    index: &mut FileIndex,
    relpath: &str,
    repo: &Repository,
    progress: &mut ProgressFn<'_>,
) -> WtResult<()> {
    if index.get(relpath).is_none() {
        return Err(WorktreeError::BadPath(relpath.to_string()));
    }

    let ondisk = wt.ondisk_path(relpath);
    let (status, _) = get_file_status(index.get(relpath), &ondisk, repo.store())?;

    // Locate the tree entry carrying the base mode bits.
    let in_repo = wt.in_repo_path(relpath);
    let te = match lookup::tree_entry_by_path(repo.store(), &wt.base_commit(), &in_repo) {
        Ok(te) => Some(te),
        Err(grove_store::StoreError::NoTreeEntry(_)) => None,
        Err(e) => return Err(e.into()),
    };
    if te.is_none() && status != FileStatus::Add {
        return Err(WorktreeError::NoTreeEntry(relpath.to_string()));
    }

    match status {
        FileStatus::Add => {
            progress(FileStatus::Revert, relpath)?;
            index.remove(relpath);
        }
        FileStatus::Delete
        | FileStatus::Modify
        | FileStatus::Conflict
        | FileStatus::ModeChange
        | FileStatus::Missing => {
            let te = te.expect("tree entry checked above");
            let entry_blob = index
                .get(relpath)
                .and_then(|e| e.blob_id)
                .unwrap_or(te.object_id);
            let blob = lookup::read_blob(repo.store(), &entry_blob)?;

            if te.mode.is_symlink() {
                let target = String::from_utf8_lossy(&blob.data).into_owned();
                let installed =
                    install::install_symlink(wt, &ondisk, relpath, &target, false, true, progress)?;
                if let Some(entry) = index.get_mut(relpath) {
                    entry.file_type = installed;
                }
            } else {
                install::install_blob(
                    wt,
                    &ondisk,
                    relpath,
                    te.mode.is_executable(),
                    &blob.data,
                    false,
                    true,
                    progress,
                )?;
            }
            if let Some(entry) = index.get_mut(relpath) {
                if let Ok(meta) = std::fs::symlink_metadata(&ondisk) {
                    entry.update_fingerprint(&meta);
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Revert local changes on the given paths back to the base commit.
pub fn revert(
    wt: &Worktree,
    repo: &Repository,
    paths: &[&str],
    progress: &mut ProgressFn<'_>,
) -> WtResult<()> {
    wt.lock_exclusive()?;
    let result = (|| {
        let mut index = FileIndex::read_from(&wt.fileindex_path())?;
        for relpath in paths {
            revert_file(wt, &mut index, relpath, repo, progress)?;
        }
        index.write_to(&wt.fileindex_path())?;
        debug!(count = paths.len(), "reverted paths");
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
    use crate::testutil;
    use std::fs;

    fn checked_out(files: &[(&str, &str)]) -> (tempfile::TempDir, Worktree, Repository) {
        let (repo, _) = testutil::test_repo(files);
        let dir = tempfile::tempdir().unwrap();
        let wtpath = dir.path().join("wt");
        Worktree::init(&wtpath, &repo, "refs/heads/main", "/").unwrap();
        let wt = Worktree::open(&wtpath).unwrap();
        let cancel = never_cancel();
        checkout_files(&wt, &repo, &[""], &mut |_, _| Ok(()), &cancel).unwrap();
        (dir, wt, repo)
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
    fn schedule_add_tracks_unversioned_file() {
        let (_dir, wt, repo) = checked_out(&[("alpha", "a\n")]);
        fs::write(wt.ondisk_path("fresh"), "f\n").unwrap();

        let mut reported = Vec::new();
        schedule_add(&wt, &repo, &["fresh"], &mut |r| {
            reported.push((r.status, r.path.to_string()));
            Ok(())
        })
        .unwrap();
        assert_eq!(reported, vec![(FileStatus::Add, "fresh".to_string())]);
        assert_eq!(statuses(&wt, &repo), vec![(FileStatus::Add, "fresh".to_string())]);
    }

    #[test]
    fn schedule_add_is_idempotent() {
        let (_dir, wt, repo) = checked_out(&[("alpha", "a\n")]);
        fs::write(wt.ondisk_path("fresh"), "f\n").unwrap();
        schedule_add(&wt, &repo, &["fresh"], &mut |_| Ok(())).unwrap();
        // Re-adding reports nothing and keeps the entry.
        let mut reported = Vec::new();
        schedule_add(&wt, &repo, &["fresh"], &mut |r| {
            reported.push(r.path.to_string());
            Ok(())
        })
        .unwrap();
        assert!(reported.is_empty());
    }

    #[test]
    fn schedule_delete_unlinks_and_journals() {
        let (_dir, wt, repo) = checked_out(&[("alpha", "a\n"), ("beta", "b\n")]);

        let mut reported = Vec::new();
        schedule_delete(&wt, &repo, &["beta"], false, &mut |r| {
            reported.push((r.status, r.path.to_string()));
            Ok(())
        })
        .unwrap();
        assert_eq!(reported, vec![(FileStatus::Delete, "beta".to_string())]);
        assert!(!wt.ondisk_path("beta").exists());
        assert_eq!(statuses(&wt, &repo), vec![(FileStatus::Delete, "beta".to_string())]);
    }

    #[test]
    fn schedule_delete_refuses_local_mods() {
        let (_dir, wt, repo) = checked_out(&[("alpha", "a\n")]);
        fs::write(wt.ondisk_path("alpha"), "changed\n").unwrap();

        let err =
            schedule_delete(&wt, &repo, &["alpha"], false, &mut |_| Ok(())).unwrap_err();
        assert!(matches!(err, WorktreeError::FileModified(_)));

        schedule_delete(&wt, &repo, &["alpha"], true, &mut |_| Ok(())).unwrap();
        assert!(!wt.ondisk_path("alpha").exists());
    }

    #[test]
    fn schedule_delete_unknown_path_is_bad_path() {
        let (_dir, wt, repo) = checked_out(&[("alpha", "a\n")]);
        let err = schedule_delete(&wt, &repo, &["ghost"], false, &mut |_| Ok(())).unwrap_err();
        assert!(matches!(err, WorktreeError::BadPath(_)));
    }

    #[test]
    fn revert_restores_modified_file() {
        let (_dir, wt, repo) = checked_out(&[("alpha", "original\n")]);
        fs::write(wt.ondisk_path("alpha"), "hacked\n").unwrap();

        let mut events = Vec::new();
        revert(&wt, &repo, &["alpha"], &mut |s, p| {
            events.push((s, p.to_string()));
            Ok(())
        })
        .unwrap();

        assert_eq!(events, vec![(FileStatus::Revert, "alpha".to_string())]);
        assert_eq!(
            fs::read_to_string(wt.ondisk_path("alpha")).unwrap(),
            "original\n"
        );
        assert!(statuses(&wt, &repo).is_empty());
    }

    #[test]
    fn revert_restores_scheduled_deletion() {
        let (_dir, wt, repo) = checked_out(&[("alpha", "content\n")]);
        schedule_delete(&wt, &repo, &["alpha"], false, &mut |_| Ok(())).unwrap();
        assert!(!wt.ondisk_path("alpha").exists());

        revert(&wt, &repo, &["alpha"], &mut |_, _| Ok(())).unwrap();
        assert_eq!(
            fs::read_to_string(wt.ondisk_path("alpha")).unwrap(),
            "content\n"
        );
        assert!(statuses(&wt, &repo).is_empty());
    }

    #[test]
    fn revert_drops_scheduled_addition() {
        let (_dir, wt, repo) = checked_out(&[("alpha", "a\n")]);
        fs::write(wt.ondisk_path("fresh"), "f\n").unwrap();
        schedule_add(&wt, &repo, &["fresh"], &mut |_| Ok(())).unwrap();

        revert(&wt, &repo, &["fresh"], &mut |_, _| Ok(())).unwrap();
        // The file itself stays; it just becomes unversioned again.
        assert!(wt.ondisk_path("fresh").exists());
        assert_eq!(
            statuses(&wt, &repo),
            vec![(FileStatus::Unversioned, "fresh".to_string())]
        );
    }

    #[test]
    fn revert_restores_conflicted_file() {
        let (_dir, wt, repo) = checked_out(&[("alpha", "clean\n")]);
        fs::write(
            wt.ondisk_path("alpha"),
            "<<<<<<< a\nx\n=======\ny\n>>>>>>> b\n",
        )
        .unwrap();

        revert(&wt, &repo, &["alpha"], &mut |_, _| Ok(())).unwrap();
        assert_eq!(fs::read_to_string(wt.ondisk_path("alpha")).unwrap(), "clean\n");
    }

    #[test]
    fn revert_untracked_path_is_bad_path() {
        let (_dir, wt, repo) = checked_out(&[("alpha", "a\n")]);
        let err = revert(&wt, &repo, &["ghost"], &mut |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, WorktreeError::BadPath(_)));
    }
}
