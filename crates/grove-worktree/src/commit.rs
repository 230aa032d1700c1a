//! The commit pipeline.
//!
//! Collect the commitable set, verify none of it is out of date with
//! the branch head, create blobs, recursively write new trees reusing
//! unmodified subtrees, create the commit object, and move the head
//! reference under its lock. The head move is the single atomic
//! observable: failure before it leaves no new commit visible, and the
//! index sync after it is reconciled by a later status walk if a crash
//! intervenes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use grove_index::{FileEntry, FileIndex};
use grove_refs::{Ref, RefStore};
use grove_store::{lookup, Blob, Commit, EntryMode, ObjectStore, Tree, TreeEntry};
use grove_types::{Identity, ObjectId};

use crate::checkout::ref_base_commit;
use crate::error::{WorktreeError, WtResult};
use crate::meta::Worktree;
use crate::path;
use crate::repo::Repository;
use crate::status::{staged_status, status_walk, FileStatus, StatusReport};
use crate::CancelFn;

/// A path contributing to the commit being built.
#[derive(Clone, Debug)]
pub struct Commitable {
    /// Work-tree-relative path.
    pub path: String,
    /// Absolute in-repository path.
    pub in_repo_path: String,
    /// On-disk location.
    pub ondisk_path: PathBuf,
    /// Unstaged (or effective) status being committed.
    pub status: FileStatus,
    /// Staged status, if the path was staged.
    pub staged_status: FileStatus,
    /// Whether the committed entry carries the executable bit.
    pub executable: bool,
    /// Whether the committed entry is a symlink.
    pub is_symlink: bool,
    /// Blob created for this commit (filled during the pipeline).
    pub blob_id: Option<ObjectId>,
    /// The blob the entry was based on.
    pub base_blob_id: Option<ObjectId>,
    /// Staged blob, when committing staged state.
    pub staged_blob_id: Option<ObjectId>,
    /// The entry's base commit.
    pub base_commit_id: Option<ObjectId>,
    pub(crate) added_to_tree: bool,
}

/// Commit-message callback over the commitable set.
pub type CommitMsgFn<'a> = dyn FnMut(&[Commitable]) -> WtResult<String> + 'a;

/// Per-commitable status callback invoked while trees are written.
pub type CtStatusFn<'a> = dyn FnMut(FileStatus, &str) -> WtResult<()> + 'a;

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn commitable_from_report(wt: &Worktree, report: &StatusReport<'_>) -> WtResult<Commitable> {
    let ondisk = wt.ondisk_path(report.path);
    let (executable, is_symlink) = if report.status == FileStatus::Delete {
        (false, false)
    } else {
        let meta = std::fs::symlink_metadata(&ondisk)?;
        use std::os::unix::fs::PermissionsExt;
        (
            meta.permissions().mode() & 0o100 != 0,
            meta.file_type().is_symlink(),
        )
    };
    Ok(Commitable {
        path: report.path.to_string(),
        in_repo_path: wt.in_repo_path(report.path),
        ondisk_path: ondisk,
        status: report.status,
        staged_status: FileStatus::NoChange,
        executable,
        is_symlink,
        blob_id: None,
        base_blob_id: report.blob_id,
        staged_blob_id: report.staged_blob_id,
        base_commit_id: report.commit_id,
        added_to_tree: false,
    })
}

/// Collect commitables over unstaged changes under one scope path.
fn collect_commitables(
    wt: &Worktree,
    repo: &Repository,
    index: &mut FileIndex,
    scope: &str,
    commitables: &mut Vec<Commitable>,
    cancel: &CancelFn<'_>,
) -> WtResult<()> {
    let mut pending: Vec<Commitable> = Vec::new();
    let mut error: Option<WorktreeError> = None;
    {
        let mut cb = |report: &StatusReport<'_>| -> WtResult<()> {
            match report.status {
                FileStatus::Conflict => {
                    return Err(WorktreeError::CommitConflict(report.path.to_string()))
                }
                FileStatus::Modify
                | FileStatus::Add
                | FileStatus::Delete
                | FileStatus::ModeChange => match commitable_from_report(wt, report) {
                    Ok(ct) => pending.push(ct),
                    Err(e) => error = Some(e),
                },
                _ => {}
            }
            Ok(())
        };
        status_walk(wt, repo, index, scope, &mut cb, cancel)?;
    }
    if let Some(e) = error {
        return Err(e);
    }
    for ct in pending {
        if !commitables.iter().any(|c| c.path == ct.path) {
            commitables.push(ct);
        }
    }
    Ok(())
}

/// Build commitables from staged index entries covered by the scopes.
fn collect_staged_commitables(
    wt: &Worktree,
    index: &FileIndex,
    scopes: &[&str],
    commitables: &mut Vec<Commitable>,
) -> WtResult<()> {
    for scope in scopes {
        let mut any = false;
        for entry in index.iter() {
            if !path::is_child(&entry.path, scope) || !entry.is_staged() {
                continue;
            }
            any = true;
            if commitables.iter().any(|c| c.path == entry.path) {
                continue;
            }
            let status = staged_status(entry.stage);
            commitables.push(Commitable {
                path: entry.path.clone(),
                in_repo_path: wt.in_repo_path(&entry.path),
                ondisk_path: wt.ondisk_path(&entry.path),
                status,
                staged_status: status,
                executable: entry.executable,
                is_symlink: entry.file_type == grove_index::IndexFileType::Symlink,
                blob_id: None,
                base_blob_id: entry.blob_id,
                staged_blob_id: entry.staged_blob_id,
                base_commit_id: entry.commit_id,
                added_to_tree: false,
            });
        }
        if !any {
            return Err(WorktreeError::NotStaged(scope.to_string()));
        }
    }
    Ok(())
}

/// Every requested path must be covered by some commitable.
fn check_path_coverage(paths: &[&str], commitables: &[Commitable]) -> WtResult<()> {
    for requested in paths {
        let covered = commitables
            .iter()
            .any(|ct| path::is_child(&ct.path, requested));
        if !covered {
            return Err(WorktreeError::BadPath(requested.to_string()));
        }
    }
    Ok(())
}

/// The out-of-date check: a commitable may only land on a head whose
/// tree still carries its base.
fn check_ct_out_of_date(
    ct: &Commitable,
    repo: &Repository,
    head_commit_id: &ObjectId,
) -> WtResult<()> {
    if ct.status == FileStatus::Add {
        // Added files must not exist in the branch head.
        match lookup::id_by_path(repo.store(), head_commit_id, &ct.in_repo_path) {
            Ok(_) => Err(WorktreeError::OutOfDate(ct.path.clone())),
            Err(grove_store::StoreError::NoTreeEntry(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    } else {
        // Trivial case: base commit equals the head commit.
        if ct.base_commit_id == Some(*head_commit_id) {
            return Ok(());
        }
        match lookup::id_by_path(repo.store(), head_commit_id, &ct.in_repo_path) {
            Ok(id) if Some(id) == ct.base_blob_id => Ok(()),
            Ok(_) => Err(WorktreeError::OutOfDate(ct.path.clone())),
            Err(grove_store::StoreError::NoTreeEntry(_)) => {
                Err(WorktreeError::OutOfDate(ct.path.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn read_ondisk_content(ct: &Commitable) -> WtResult<Vec<u8>> {
    if ct.is_symlink {
        Ok(std::fs::read_link(&ct.ondisk_path)?
            .to_string_lossy()
            .into_owned()
            .into_bytes())
    } else {
        Ok(std::fs::read(&ct.ondisk_path)?)
    }
}

/// Create blobs for added and modified commitables.
fn create_blobs(commitables: &mut [Commitable], store: &dyn ObjectStore) -> WtResult<()> {
    for ct in commitables.iter_mut() {
        if !matches!(
            ct.status,
            FileStatus::Add | FileStatus::Modify | FileStatus::ModeChange
        ) {
            continue;
        }
        if let Some(staged) = ct.staged_blob_id {
            if ct.staged_status != FileStatus::NoChange {
                ct.blob_id = Some(staged);
                continue;
            }
        }
        let content = read_ondisk_content(ct)?;
        let id = store.write(&Blob::new(content).to_stored_object())?;
        ct.blob_id = Some(id);
    }
    Ok(())
}

fn ct_entry_mode(ct: &Commitable) -> EntryMode {
    if ct.is_symlink {
        EntryMode::Symlink
    } else if ct.executable {
        EntryMode::Executable
    } else {
        EntryMode::Regular
    }
}

fn report_ct_status(ct: &Commitable, cb: &mut CtStatusFn<'_>) -> WtResult<()> {
    cb(ct.status, &ct.path)
}

/// Recursively write the new tree at `tree_path`, reusing unmodified
/// base entries verbatim and dropping subtrees that empty out.
///
/// Returns the new tree id plus its entry count so the caller can omit
/// entries for emptied subtrees.
fn write_tree(
    store: &dyn ObjectStore,
    base_tree: Option<&Tree>,
    tree_path: &str,
    commitables: &mut [Commitable],
    cb: &mut CtStatusFn<'_>,
) -> WtResult<(ObjectId, usize)> {
    let mut new_entries: BTreeMap<String, TreeEntry> = BTreeMap::new();

    // Insert, and recurse into, newly added entries first.
    for i in 0..commitables.len() {
        let (ct_path, status, added) = {
            let ct = &commitables[i];
            (ct.in_repo_path.clone(), ct.status, ct.added_to_tree)
        };
        if status != FileStatus::Add || added || !path::is_child(&ct_path, tree_path) {
            continue;
        }
        let child = path::skip_common_ancestor(tree_path, &ct_path)?;
        match child.find('/') {
            None => {
                let ct = &mut commitables[i];
                let te = TreeEntry::new(
                    ct_entry_mode(ct),
                    child.clone(),
                    ct.blob_id.expect("blob created before tree write"),
                );
                ct.added_to_tree = true;
                new_entries.insert(child, te);
                report_ct_status(&commitables[i], cb)?;
            }
            Some(slash) => {
                let first = child[..slash].to_string();
                let in_base = base_tree
                    .map(|t| t.find_entry(&first).is_some())
                    .unwrap_or(false);
                if in_base || new_entries.contains_key(&first) {
                    // The base pass (or an earlier addition) descends
                    // into this directory.
                    continue;
                }
                let subtree_path = if path::is_root_dir(tree_path) {
                    format!("/{first}")
                } else {
                    format!("{tree_path}/{first}")
                };
                let (sub_id, n) = write_tree(store, None, &subtree_path, commitables, cb)?;
                if n > 0 {
                    new_entries.insert(
                        first.clone(),
                        TreeEntry::new(EntryMode::Directory, first, sub_id),
                    );
                }
            }
        }
    }

    // Handle modified and deleted entries, copying the rest verbatim.
    if let Some(base_tree) = base_tree {
        for te in &base_tree.entries {
            let te_path = if path::is_root_dir(tree_path) {
                format!("/{}", te.name)
            } else {
                format!("{tree_path}/{}", te.name)
            };

            if te.mode.is_dir() {
                let modified = commitables
                    .iter()
                    .any(|ct| path::is_child(&ct.in_repo_path, &te_path));
                if modified {
                    let subtree = lookup::read_tree(store, &te.object_id)?;
                    let (sub_id, n) =
                        write_tree(store, Some(&subtree), &te_path, commitables, cb)?;
                    // An emptied subtree loses its entry entirely.
                    if n > 0 {
                        new_entries.insert(
                            te.name.clone(),
                            TreeEntry::new(EntryMode::Directory, te.name.clone(), sub_id),
                        );
                    }
                } else {
                    new_entries.insert(te.name.clone(), te.clone());
                }
                continue;
            }

            let matched = commitables.iter().position(|ct| {
                ct.in_repo_path == te_path
                    && matches!(
                        ct.status,
                        FileStatus::Modify | FileStatus::Delete | FileStatus::ModeChange
                    )
            });
            match matched {
                Some(i) => {
                    let status = commitables[i].status;
                    if status != FileStatus::Delete {
                        let ct = &commitables[i];
                        new_entries.insert(
                            te.name.clone(),
                            TreeEntry::new(
                                ct_entry_mode(ct),
                                te.name.clone(),
                                ct.blob_id.expect("blob created before tree write"),
                            ),
                        );
                    }
                    // Deleted entries are simply not re-inserted.
                    report_ct_status(&commitables[i], cb)?;
                }
                None => {
                    new_entries.insert(te.name.clone(), te.clone());
                }
            }
        }
    }

    let entries: Vec<TreeEntry> = new_entries.into_values().collect();
    let count = entries.len();
    let tree_id = store.write(&Tree::new(entries).to_stored_object()?)?;
    Ok((tree_id, count))
}

/// Update the index to describe the new base commit.
fn update_fileindex_after_commit(
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
                let mut entry = FileEntry::new(&ct.path);
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

/// The shared back half of commit: message, blobs, trees, commit
/// object, locked head move, base bump.
pub(crate) fn commit_worktree(
    wt: &mut Worktree,
    repo: &Repository,
    commitables: &mut Vec<Commitable>,
    head_commit_id: &ObjectId,
    author: &Identity,
    author_time: i64,
    committer: &Identity,
    commit_time: i64,
    msg_cb: &mut CommitMsgFn<'_>,
    status_cb: &mut CtStatusFn<'_>,
) -> WtResult<ObjectId> {
    let store = repo.store();
    let head_commit = lookup::read_commit(store, head_commit_id)?;
    let head_tree = lookup::read_tree(store, &head_commit.tree_id)?;

    let logmsg = msg_cb(commitables)?;
    if logmsg.trim().is_empty() {
        return Err(WorktreeError::EmptyMessage);
    }

    create_blobs(commitables, store)?;

    let (new_tree_id, _) = write_tree(store, Some(&head_tree), "/", commitables, status_cb)?;

    let commit = Commit {
        tree_id: new_tree_id,
        parents: vec![wt.base_commit()],
        author: author.clone(),
        author_time,
        committer: committer.clone(),
        commit_time,
        message: logmsg,
    };
    let new_commit_id = store.write(&commit.to_stored_object()?)?;

    // Check for a concurrent commit to our branch, under the ref lock.
    let head_ref_name = wt.head_ref().to_string();
    repo.refs().lock_ref(&head_ref_name)?;
    let result = (|| -> WtResult<()> {
        let current = repo.refs().resolve_name(&head_ref_name)?;
        if current != *head_commit_id {
            return Err(WorktreeError::HeadChanged);
        }
        repo.refs()
            .write_ref(&Ref::direct(head_ref_name.clone(), new_commit_id))?;
        Ok(())
    })();
    let unlock = repo.refs().unlock_ref(&head_ref_name).map_err(Into::into);
    result.and(unlock)?;

    wt.set_base_commit(repo, new_commit_id)?;
    ref_base_commit(wt, repo)?;
    debug!(commit = %new_commit_id, "committed work tree");
    Ok(new_commit_id)
}

/// Commit changes under the given paths (`[""]` commits everything).
///
/// When staged entries exist, only staged state is committed and every
/// path argument must cover a staged entry.
pub fn commit(
    wt: &mut Worktree,
    repo: &Repository,
    paths: &[&str],
    author: &Identity,
    committer: &Identity,
    msg_cb: &mut CommitMsgFn<'_>,
    status_cb: &mut CtStatusFn<'_>,
) -> WtResult<ObjectId> {
    wt.lock_exclusive()?;
    let result = commit_inner(wt, repo, paths, author, committer, msg_cb, status_cb);
    let unlock = wt.lock_shared();
    result.and_then(|id| unlock.map(|()| id))
}

fn commit_inner(
    wt: &mut Worktree,
    repo: &Repository,
    paths: &[&str],
    author: &Identity,
    committer: &Identity,
    msg_cb: &mut CommitMsgFn<'_>,
    status_cb: &mut CtStatusFn<'_>,
) -> WtResult<ObjectId> {
    let head_commit_id = repo.refs().resolve_name(wt.head_ref())?;
    let mut index = FileIndex::read_from(&wt.fileindex_path())?;

    let staged_exists = index.iter().any(|e| e.is_staged());
    let mut commitables: Vec<Commitable> = Vec::new();
    if staged_exists {
        collect_staged_commitables(wt, &index, paths, &mut commitables)?;
    } else {
        let cancel = crate::never_cancel();
        for scope in paths {
            collect_commitables(wt, repo, &mut index, scope, &mut commitables, &cancel)?;
        }
    }
    commitables.sort_by(|a, b| a.in_repo_path.cmp(&b.in_repo_path));

    if commitables.is_empty() {
        return Err(WorktreeError::NoChanges);
    }
    check_path_coverage(paths, &commitables)?;

    for ct in &commitables {
        check_ct_out_of_date(ct, repo, &head_commit_id)?;
    }

    let now = unix_now();
    let new_commit_id = commit_worktree(
        wt,
        repo,
        &mut commitables,
        &head_commit_id,
        author,
        now,
        committer,
        now,
        msg_cb,
        status_cb,
    )?;

    update_fileindex_after_commit(wt, &commitables, new_commit_id, &mut index)?;
    index.write_to(&wt.fileindex_path())?;
    Ok(new_commit_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::checkout_files;
    use crate::never_cancel;
    use crate::status::worktree_status;
    use crate::testutil::{self, Spec};
    use std::fs;

    fn checked_out(
        files: &[(&str, &str)],
    ) -> (tempfile::TempDir, Worktree, Repository, ObjectId) {
        let (repo, commit_id) = testutil::test_repo(files);
        let dir = tempfile::tempdir().unwrap();
        let wtpath = dir.path().join("wt");
        Worktree::init(&wtpath, &repo, "refs/heads/main", "/").unwrap();
        let wt = Worktree::open(&wtpath).unwrap();
        let cancel = never_cancel();
        checkout_files(&wt, &repo, &[""], &mut |_, _| Ok(()), &cancel).unwrap();
        (dir, wt, repo, commit_id)
    }

    fn do_commit(
        wt: &mut Worktree,
        repo: &Repository,
        paths: &[&str],
        message: &str,
    ) -> WtResult<ObjectId> {
        let ident = testutil::ident();
        let msg = message.to_string();
        commit(
            wt,
            repo,
            paths,
            &ident,
            &ident,
            &mut move |_| Ok(msg.clone()),
            &mut |_, _| Ok(()),
        )
    }

    fn statuses(wt: &Worktree, repo: &Repository) -> Vec<(FileStatus, String)> {
        let mut out = Vec::new();
        let cancel = never_cancel();
        worktree_status(
            wt,
            repo,
            &[""],
            &mut |r| {
                out.push((r.status, r.path.to_string()));
                Ok(())
            },
            &cancel,
        )
        .unwrap();
        out
    }

    #[test]
    fn commit_modified_file() {
        let (_dir, mut wt, repo, base) = checked_out(&[("alpha", "one\n"), ("beta", "b\n")]);
        fs::write(wt.ondisk_path("alpha"), "two\n").unwrap();

        let new_id = do_commit(&mut wt, &repo, &[""], "change alpha\n").unwrap();

        let commit = lookup::read_commit(repo.store(), &new_id).unwrap();
        assert_eq!(commit.parents, vec![base]);
        assert_eq!(commit.message, "change alpha\n");
        assert_eq!(
            lookup::read_blob(
                repo.store(),
                &lookup::id_by_path(repo.store(), &new_id, "/alpha").unwrap()
            )
            .unwrap()
            .data,
            b"two\n"
        );
        // Branch head and base commit both moved.
        assert_eq!(repo.refs().resolve_name("refs/heads/main").unwrap(), new_id);
        assert_eq!(wt.base_commit(), new_id);
        assert!(statuses(&wt, &repo).is_empty());
    }

    #[test]
    fn commit_added_and_deleted_files() {
        let (_dir, mut wt, repo, _) = checked_out(&[("keep", "k\n"), ("gone", "g\n")]);
        fs::write(wt.ondisk_path("fresh"), "f\n").unwrap();
        crate::revert::schedule_add(&wt, &repo, &["fresh"], &mut |_| Ok(())).unwrap();
        crate::revert::schedule_delete(&wt, &repo, &["gone"], false, &mut |_| Ok(())).unwrap();

        let new_id = do_commit(&mut wt, &repo, &[""], "add and delete\n").unwrap();

        assert!(lookup::id_by_path(repo.store(), &new_id, "/fresh").is_ok());
        assert!(matches!(
            lookup::id_by_path(repo.store(), &new_id, "/gone"),
            Err(grove_store::StoreError::NoTreeEntry(_))
        ));
        assert!(statuses(&wt, &repo).is_empty());
    }

    #[test]
    fn commit_reports_per_file_status() {
        let (_dir, mut wt, repo, _) = checked_out(&[("alpha", "one\n")]);
        fs::write(wt.ondisk_path("alpha"), "two\n").unwrap();

        let mut reported = Vec::new();
        let ident = testutil::ident();
        commit(
            &mut wt,
            &repo,
            &[""],
            &ident,
            &ident,
            &mut |_| Ok("msg\n".to_string()),
            &mut |s, p| {
                reported.push((s, p.to_string()));
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(reported, vec![(FileStatus::Modify, "alpha".to_string())]);
    }

    #[test]
    fn commit_without_changes_fails() {
        let (_dir, mut wt, repo, _) = checked_out(&[("alpha", "a\n")]);
        let err = do_commit(&mut wt, &repo, &[""], "nothing\n").unwrap_err();
        assert!(matches!(err, WorktreeError::NoChanges));
    }

    #[test]
    fn commit_with_empty_message_fails() {
        let (_dir, mut wt, repo, _) = checked_out(&[("alpha", "a\n")]);
        fs::write(wt.ondisk_path("alpha"), "changed\n").unwrap();
        let err = do_commit(&mut wt, &repo, &[""], "  \n").unwrap_err();
        assert!(matches!(err, WorktreeError::EmptyMessage));
    }

    #[test]
    fn commit_conflicted_file_fails() {
        let (_dir, mut wt, repo, _) = checked_out(&[("alpha", "a\n")]);
        fs::write(
            wt.ondisk_path("alpha"),
            "<<<<<<< x\nours\n=======\ntheirs\n>>>>>>> y\n",
        )
        .unwrap();
        let err = do_commit(&mut wt, &repo, &[""], "oops\n").unwrap_err();
        assert!(matches!(err, WorktreeError::CommitConflict(_)));
    }

    #[test]
    fn commit_uncovered_path_fails() {
        let (_dir, mut wt, repo, _) = checked_out(&[("alpha", "a\n"), ("beta", "b\n")]);
        fs::write(wt.ondisk_path("alpha"), "changed\n").unwrap();
        let err = do_commit(&mut wt, &repo, &["beta"], "msg\n").unwrap_err();
        // beta has no changes, so the path argument is not covered.
        assert!(matches!(
            err,
            WorktreeError::NoChanges | WorktreeError::BadPath(_)
        ));
    }

    #[test]
    fn commit_scoped_to_path() {
        let (_dir, mut wt, repo, _) = checked_out(&[("alpha", "a\n"), ("sub/beta", "b\n")]);
        fs::write(wt.ondisk_path("alpha"), "a2\n").unwrap();
        fs::write(wt.ondisk_path("sub/beta"), "b2\n").unwrap();

        let new_id = do_commit(&mut wt, &repo, &["sub"], "scoped\n").unwrap();

        // Only sub/beta went in; alpha is still modified.
        let alpha_blob = lookup::id_by_path(repo.store(), &new_id, "/alpha").unwrap();
        assert_eq!(
            lookup::read_blob(repo.store(), &alpha_blob).unwrap().data,
            b"a\n"
        );
        assert_eq!(
            statuses(&wt, &repo),
            vec![(FileStatus::Modify, "alpha".to_string())]
        );
    }

    #[test]
    fn head_moved_under_us_fails() {
        let (_dir, mut wt, repo, base) = checked_out(&[("alpha", "a\n")]);
        fs::write(wt.ondisk_path("alpha"), "mine\n").unwrap();

        // Another work tree commits to the branch first.
        let other = testutil::commit_files(
            &repo,
            &[base],
            &[("alpha", Spec::File("theirs\n"))],
            "concurrent\n",
            1_700_000_100,
        );
        testutil::set_branch(&repo, "refs/heads/main", other);

        let err = do_commit(&mut wt, &repo, &[""], "mine\n").unwrap_err();
        // The stale base is caught by the out-of-date check before the
        // head lock is even taken.
        assert!(matches!(
            err,
            WorktreeError::OutOfDate(_) | WorktreeError::HeadChanged
        ));
    }

    #[test]
    fn out_of_date_add_rejected() {
        let (_dir, mut wt, repo, base) = checked_out(&[("alpha", "a\n")]);
        fs::write(wt.ondisk_path("fresh"), "mine\n").unwrap();
        crate::revert::schedule_add(&wt, &repo, &["fresh"], &mut |_| Ok(())).unwrap();

        // The same path lands on the branch concurrently.
        let other = testutil::commit_files(
            &repo,
            &[base],
            &[("alpha", Spec::File("a\n")), ("fresh", Spec::File("theirs\n"))],
            "concurrent add\n",
            1_700_000_100,
        );
        testutil::set_branch(&repo, "refs/heads/main", other);

        let err = do_commit(&mut wt, &repo, &[""], "mine\n").unwrap_err();
        assert!(matches!(err, WorktreeError::OutOfDate(_)));
    }

    #[test]
    fn emptied_subtree_is_dropped() {
        let (_dir, mut wt, repo, _) = checked_out(&[("alpha", "a\n"), ("sub/only", "o\n")]);
        crate::revert::schedule_delete(&wt, &repo, &["sub/only"], false, &mut |_| Ok(()))
            .unwrap();

        let new_id = do_commit(&mut wt, &repo, &[""], "empty out sub\n").unwrap();

        let tree = lookup::commit_tree(repo.store(), &new_id).unwrap();
        assert!(tree.find_entry("sub").is_none());
        assert!(tree.find_entry("alpha").is_some());
    }

    #[test]
    fn added_directory_chain_is_created() {
        let (_dir, mut wt, repo, _) = checked_out(&[("alpha", "a\n")]);
        fs::create_dir_all(wt.ondisk_path("deep/nested")).unwrap();
        fs::write(wt.ondisk_path("deep/nested/file"), "f\n").unwrap();
        crate::revert::schedule_add(&wt, &repo, &["deep/nested/file"], &mut |_| Ok(())).unwrap();

        let new_id = do_commit(&mut wt, &repo, &[""], "deep add\n").unwrap();
        assert!(lookup::id_by_path(repo.store(), &new_id, "/deep/nested/file").is_ok());
    }

    #[test]
    fn staged_entries_commit_staged_content() {
        let (_dir, mut wt, repo, _) = checked_out(&[("alpha", "base\n")]);
        fs::write(wt.ondisk_path("alpha"), "staged\n").unwrap();
        crate::stage::stage(&wt, &repo, &["alpha"], None, &mut |_| Ok(())).unwrap();
        // Further unstaged edits stay out of the commit.
        fs::write(wt.ondisk_path("alpha"), "unstaged later\n").unwrap();

        let new_id = do_commit(&mut wt, &repo, &[""], "staged commit\n").unwrap();
        let blob = lookup::id_by_path(repo.store(), &new_id, "/alpha").unwrap();
        assert_eq!(
            lookup::read_blob(repo.store(), &blob).unwrap().data,
            b"staged\n"
        );
        // The later edit remains a local modification.
        assert_eq!(
            statuses(&wt, &repo),
            vec![(FileStatus::Modify, "alpha".to_string())]
        );
    }

    #[test]
    fn mode_change_commits_new_mode() {
        let (_dir, mut wt, repo, _) = checked_out(&[("tool", "#!/bin/sh\n")]);
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(wt.ondisk_path("tool")).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(wt.ondisk_path("tool"), perms).unwrap();

        let new_id = do_commit(&mut wt, &repo, &[""], "chmod\n").unwrap();
        let entry =
            lookup::tree_entry_by_path(repo.store(), &new_id, "/tool").unwrap();
        assert_eq!(entry.mode, EntryMode::Executable);
    }
}
