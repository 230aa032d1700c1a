//! Histedit: journaled, script-driven history editing.
//!
//! A histedit script lists one action per source commit: `pick` replays
//! it, `edit` replays it and stops for amendment, `fold` accumulates it
//! into the next picked commit, `drop` skips it, and `mesg` supplies
//! the log message for the commit produced by the directly preceding
//! `pick` or `edit`. The script itself lives in the metadata directory
//! and the replay position in repository references, so an interrupted
//! histedit resumes from its journal.

use std::io::Write;

use tracing::debug;

use grove_refs::{Ref, RefStore};
use grove_store::lookup;
use grove_types::ObjectId;

use crate::error::{WorktreeError, WtResult};
use crate::meta::Worktree;
use crate::rebase::{
    commits_to_replay, delete_ref_if_exists, restore_worktree, rewrite_commit,
    rewrite_merge_files, store_commit_id,
};
use crate::refnames;
use crate::repo::Repository;
use crate::status::FileStatus;
use crate::{CancelFn, ProgressFn};

/// One line of a histedit script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HisteditAction {
    /// Replay the commit as-is.
    Pick(ObjectId),
    /// Replay the commit, then stop for the user to amend it.
    Edit(ObjectId),
    /// Replay but do not commit; accumulate into the next picked
    /// commit.
    Fold(ObjectId),
    /// Skip the commit.
    Drop(ObjectId),
    /// Log message for the commit produced by the preceding action.
    Mesg(String),
}

impl HisteditAction {
    /// The source commit this action consumes, if any.
    pub fn commit_id(&self) -> Option<ObjectId> {
        match self {
            HisteditAction::Pick(id)
            | HisteditAction::Edit(id)
            | HisteditAction::Fold(id)
            | HisteditAction::Drop(id) => Some(*id),
            HisteditAction::Mesg(_) => None,
        }
    }
}

/// A parsed histedit script.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HisteditScript {
    /// Actions in script order.
    pub actions: Vec<HisteditAction>,
}

impl HisteditScript {
    /// Parse the textual script form: one `<op> <id>` or `mesg <text>`
    /// per line. Blank lines and `#` comments are ignored.
    pub fn parse(text: &str) -> WtResult<Self> {
        let mut actions = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (op, rest) = line.split_once(' ').unwrap_or((line, ""));
            let rest = rest.trim();
            let parse_id = || {
                ObjectId::from_hex(rest).map_err(|_| {
                    WorktreeError::MetaCorrupt(format!("bad commit id in histedit script: {rest}"))
                })
            };
            let action = match op {
                "pick" => HisteditAction::Pick(parse_id()?),
                "edit" => HisteditAction::Edit(parse_id()?),
                "fold" => HisteditAction::Fold(parse_id()?),
                "drop" => HisteditAction::Drop(parse_id()?),
                "mesg" => HisteditAction::Mesg(rest.to_string()),
                other => {
                    return Err(WorktreeError::MetaCorrupt(format!(
                        "unknown histedit action: {other}"
                    )))
                }
            };
            actions.push(action);
        }
        Ok(Self { actions })
    }

    /// Render the script in its on-disk form.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for action in &self.actions {
            match action {
                HisteditAction::Pick(id) => out.push_str(&format!("pick {id}\n")),
                HisteditAction::Edit(id) => out.push_str(&format!("edit {id}\n")),
                HisteditAction::Fold(id) => out.push_str(&format!("fold {id}\n")),
                HisteditAction::Drop(id) => out.push_str(&format!("drop {id}\n")),
                HisteditAction::Mesg(text) => out.push_str(&format!("mesg {text}\n")),
            }
        }
        out
    }

    /// Persist the script under the metadata directory.
    pub fn save(&self, wt: &Worktree) -> WtResult<()> {
        let path = wt.histedit_script_path();
        let mut tmp = tempfile::NamedTempFile::new_in(wt.meta_dir())?;
        tmp.write_all(self.to_text().as_bytes())?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| WorktreeError::Io(e.error))?;
        Ok(())
    }

    /// Load the persisted script.
    pub fn load(wt: &Worktree) -> WtResult<Self> {
        let text = std::fs::read_to_string(wt.histedit_script_path())?;
        Self::parse(&text)
    }

    /// Validate the script against the edited history.
    ///
    /// Every source commit must be consumed by exactly one action, the
    /// last commit action must not be a fold, and `mesg` must directly
    /// follow a `pick` or `edit`.
    pub fn validate(&self, history: &[ObjectId]) -> WtResult<()> {
        for id in history {
            if !self.actions.iter().any(|a| a.commit_id() == Some(*id)) {
                return Err(WorktreeError::MissingCommit(id.to_hex()));
            }
        }
        for action in &self.actions {
            if let Some(id) = action.commit_id() {
                if !history.contains(&id) {
                    return Err(WorktreeError::MetaCorrupt(format!(
                        "histedit script names a commit outside the edited history: {id}"
                    )));
                }
            }
        }

        let last_commit_action = self.actions.iter().rev().find(|a| a.commit_id().is_some());
        if matches!(last_commit_action, Some(HisteditAction::Fold(_))) {
            return Err(WorktreeError::FoldLast);
        }

        let mut prev: Option<&HisteditAction> = None;
        for action in &self.actions {
            if matches!(action, HisteditAction::Mesg(_))
                && !matches!(
                    prev,
                    Some(HisteditAction::Pick(_)) | Some(HisteditAction::Edit(_))
                )
            {
                return Err(WorktreeError::MetaCorrupt(
                    "mesg must follow a pick or edit".into(),
                ));
            }
            prev = Some(action);
        }
        Ok(())
    }
}

/// Where a driver-level histedit run ended up.
#[derive(Debug)]
pub enum HisteditOutcome {
    /// The whole script ran and the branch was moved.
    Complete {
        /// The commits written, oldest first. Dropped and elided
        /// commits are absent.
        new_commits: Vec<ObjectId>,
    },
    /// An `edit` action stopped the run; the named commit's changes
    /// are merged into the work tree awaiting amendment.
    PausedForEdit { commit: ObjectId },
    /// A replay produced conflicts; resolve and continue, or abort.
    Conflict { commit: ObjectId },
}

fn delete_histedit_refs(wt: &Worktree, repo: &Repository) -> WtResult<()> {
    delete_ref_if_exists(repo, &refnames::histedit_tmp_ref(wt))?;
    delete_ref_if_exists(repo, &refnames::histedit_branch_symref(wt))?;
    delete_ref_if_exists(repo, &refnames::histedit_base_commit_ref(wt))?;
    delete_ref_if_exists(repo, &refnames::histedit_commit_ref(wt))?;
    Ok(())
}

/// Returns `true` when a histedit journal owns this work tree.
pub fn histedit_in_progress(wt: &Worktree) -> bool {
    wt.head_ref() == refnames::histedit_tmp_ref(wt)
}

/// Begin a histedit of the work tree's current branch.
///
/// Same cleanliness requirements as a rebase; additionally records the
/// pre-operation base commit so abort can return to it exactly.
pub fn histedit_prepare(wt: &mut Worktree, repo: &Repository) -> WtResult<()> {
    wt.lock_exclusive()?;
    let result = (|| {
        let mut index = grove_index::FileIndex::read_from(&wt.fileindex_path())?;
        crate::rebase::check_rewrite_ok(wt, repo, &mut index, false)?;

        repo.refs().write_ref(&Ref::symbolic(
            refnames::histedit_branch_symref(wt),
            wt.head_ref(),
        ))?;
        repo.refs().write_ref(&Ref::direct(
            refnames::histedit_base_commit_ref(wt),
            wt.base_commit(),
        ))?;
        repo.refs().write_ref(&Ref::direct(
            refnames::histedit_tmp_ref(wt),
            wt.base_commit(),
        ))?;
        wt.set_head_ref(&refnames::histedit_tmp_ref(wt))?;
        debug!("histedit prepared");
        Ok(())
    })();
    if result.is_err() {
        let _ = wt.lock_shared();
    }
    result
}

/// Resume an interrupted histedit. Returns the source commit in flight
/// and the pre-operation base commit.
pub fn histedit_continue(wt: &Worktree, repo: &Repository) -> WtResult<(ObjectId, ObjectId)> {
    wt.lock_exclusive()?;
    let result = (|| {
        let commit_id = repo
            .refs()
            .resolve_name(&refnames::histedit_commit_ref(wt))?;
        let base_commit = repo
            .refs()
            .resolve_name(&refnames::histedit_base_commit_ref(wt))?;
        Ok((commit_id, base_commit))
    })();
    if result.is_err() {
        let _ = wt.lock_shared();
    }
    result
}

/// Release the work tree mid-histedit, keeping the journal intact.
pub fn histedit_postpone(wt: &Worktree) -> WtResult<()> {
    wt.lock_shared()
}

/// Merge one source commit during a histedit.
pub fn histedit_merge_files(
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
        &refnames::histedit_commit_ref(wt),
        WorktreeError::HisteditCommitId,
        parent,
        commit_id,
        progress,
        cancel,
    )
}

/// Commit the merged changes of one replayed commit, optionally with a
/// replacement log message.
pub fn histedit_commit(
    wt: &mut Worktree,
    repo: &Repository,
    merged_paths: Option<&[String]>,
    orig_commit_id: &ObjectId,
    new_logmsg: Option<&str>,
) -> WtResult<Option<ObjectId>> {
    rewrite_commit(
        wt,
        repo,
        &refnames::histedit_commit_ref(wt),
        WorktreeError::HisteditCommitId,
        merged_paths,
        orig_commit_id,
        new_logmsg,
    )
}

/// Journal and immediately release a dropped commit.
pub fn histedit_skip_commit(
    wt: &Worktree,
    repo: &Repository,
    commit_id: &ObjectId,
) -> WtResult<()> {
    let refname = refnames::histedit_commit_ref(wt);
    store_commit_id(&refname, commit_id, WorktreeError::HisteditCommitId, repo)?;
    delete_ref_if_exists(repo, &refname)
}

/// Finish a histedit: point the edited branch at the tmp-branch tip,
/// switch the work tree back to it, and drop the journal.
pub fn histedit_complete(wt: &mut Worktree, repo: &Repository) -> WtResult<()> {
    let result = (|| {
        let new_head = repo.refs().resolve_name(&refnames::histedit_tmp_ref(wt))?;
        let branch_ref = repo
            .refs()
            .open_ref(&refnames::histedit_branch_symref(wt))?;
        let branch = branch_ref
            .symref_target()
            .ok_or_else(|| {
                WorktreeError::MetaCorrupt("histedit branch ref not symbolic".into())
            })?
            .to_string();

        repo.refs().write_ref(&Ref::direct(branch.clone(), new_head))?;
        wt.set_head_ref(&branch)?;
        delete_histedit_refs(wt, repo)?;
        let _ = std::fs::remove_file(wt.histedit_script_path());
        debug!(branch, head = %new_head, "histedit complete");
        Ok(())
    })();
    let unlock = wt.lock_shared();
    result.and(unlock)
}

/// Abandon a histedit: restore the branch, the recorded base commit,
/// and the on-disk content.
pub fn histedit_abort(
    wt: &mut Worktree,
    repo: &Repository,
    progress: &mut ProgressFn<'_>,
) -> WtResult<()> {
    wt.lock_exclusive()?;
    let result = (|| {
        let branch_ref = repo
            .refs()
            .open_ref(&refnames::histedit_branch_symref(wt))?;
        let branch = branch_ref
            .symref_target()
            .ok_or_else(|| {
                WorktreeError::MetaCorrupt("histedit branch ref not symbolic".into())
            })?
            .to_string();
        let base_commit = repo
            .refs()
            .resolve_name(&refnames::histedit_base_commit_ref(wt))?;

        wt.set_head_ref(&branch)?;
        wt.set_base_commit(repo, base_commit)?;
        delete_histedit_refs(wt, repo)?;
        let _ = std::fs::remove_file(wt.histedit_script_path());
        restore_worktree(wt, repo, progress)
    })();
    let unlock = wt.lock_shared();
    result.and(unlock)
}

/// The log message the lookahead assigns to the action at `pos`.
fn mesg_after(script: &HisteditScript, pos: usize) -> Option<&str> {
    match script.actions.get(pos + 1) {
        Some(HisteditAction::Mesg(text)) => Some(text),
        _ => None,
    }
}

fn parent_of(repo: &Repository, id: &ObjectId) -> WtResult<Option<ObjectId>> {
    Ok(lookup::read_commit(repo.store(), id)?.first_parent().copied())
}

struct ScriptRun {
    new_commits: Vec<ObjectId>,
    folded_paths: Vec<String>,
    folded_msgs: Vec<String>,
}

impl ScriptRun {
    fn new() -> Self {
        Self {
            new_commits: Vec::new(),
            folded_paths: Vec::new(),
            folded_msgs: Vec::new(),
        }
    }

    fn fold_message(&mut self, final_msg: &str) -> String {
        if self.folded_msgs.is_empty() {
            final_msg.to_string()
        } else {
            let mut parts = std::mem::take(&mut self.folded_msgs);
            parts.push(final_msg.to_string());
            parts
                .iter()
                .map(|m| m.trim_end())
                .collect::<Vec<_>>()
                .join("\n")
                + "\n"
        }
    }
}

fn run_script(
    wt: &mut Worktree,
    repo: &Repository,
    script: &HisteditScript,
    start: usize,
    run: &mut ScriptRun,
    progress: &mut ProgressFn<'_>,
    cancel: &CancelFn<'_>,
) -> WtResult<Option<HisteditOutcome>> {
    let mut pos = start;
    while pos < script.actions.len() {
        let action = script.actions[pos].clone();
        match action {
            HisteditAction::Drop(id) => {
                histedit_skip_commit(wt, repo, &id)?;
            }
            HisteditAction::Fold(id) => {
                let parent = parent_of(repo, &id)?;
                let mut conflicted = false;
                let merged = {
                    let mut watching = |status: FileStatus, path: &str| -> WtResult<()> {
                        if status == FileStatus::MergeConflict {
                            conflicted = true;
                        }
                        progress(status, path)
                    };
                    histedit_merge_files(wt, repo, parent.as_ref(), &id, &mut watching, cancel)?
                };
                if conflicted {
                    histedit_postpone(wt)?;
                    return Ok(Some(HisteditOutcome::Conflict { commit: id }));
                }
                run.folded_paths.extend(merged);
                run.folded_msgs
                    .push(lookup::read_commit(repo.store(), &id)?.message);
                // The fold's changes are in the work tree now; free the
                // journal slot for the next merge.
                delete_ref_if_exists(repo, &refnames::histedit_commit_ref(wt))?;
            }
            HisteditAction::Pick(id) => {
                let parent = parent_of(repo, &id)?;
                let mut conflicted = false;
                let merged = {
                    let mut watching = |status: FileStatus, path: &str| -> WtResult<()> {
                        if status == FileStatus::MergeConflict {
                            conflicted = true;
                        }
                        progress(status, path)
                    };
                    histedit_merge_files(wt, repo, parent.as_ref(), &id, &mut watching, cancel)?
                };
                if conflicted {
                    histedit_postpone(wt)?;
                    return Ok(Some(HisteditOutcome::Conflict { commit: id }));
                }

                let mut paths = std::mem::take(&mut run.folded_paths);
                paths.extend(merged);
                let orig_msg = lookup::read_commit(repo.store(), &id)?.message;
                // An explicit mesg replaces the message outright; without
                // one, a fold group gets its messages joined.
                let logmsg = match mesg_after(script, pos) {
                    Some(text) => {
                        run.folded_msgs.clear();
                        text.to_string()
                    }
                    None => run.fold_message(&orig_msg),
                };
                if let Some(new_id) =
                    histedit_commit(wt, repo, Some(&paths), &id, Some(&logmsg))?
                {
                    run.new_commits.push(new_id);
                }
            }
            HisteditAction::Edit(id) => {
                let parent = parent_of(repo, &id)?;
                let mut conflicted = false;
                let _merged = {
                    let mut watching = |status: FileStatus, path: &str| -> WtResult<()> {
                        if status == FileStatus::MergeConflict {
                            conflicted = true;
                        }
                        progress(status, path)
                    };
                    histedit_merge_files(wt, repo, parent.as_ref(), &id, &mut watching, cancel)?
                };
                if conflicted {
                    histedit_postpone(wt)?;
                    return Ok(Some(HisteditOutcome::Conflict { commit: id }));
                }
                // Stop for amendment; the commit ref journals our spot.
                histedit_postpone(wt)?;
                return Ok(Some(HisteditOutcome::PausedForEdit { commit: id }));
            }
            HisteditAction::Mesg(_) => {}
        }
        pos += 1;
    }
    Ok(None)
}

/// Run a histedit script over the work tree's current branch.
///
/// The work tree's base commit is the commit the rewritten history will
/// grow from; the edited commits are those between it and the branch
/// tip. The script is validated before any reference is touched.
pub fn histedit_run(
    wt: &mut Worktree,
    repo: &Repository,
    script: &HisteditScript,
    progress: &mut ProgressFn<'_>,
    cancel: &CancelFn<'_>,
) -> WtResult<HisteditOutcome> {
    let tip = repo.refs().resolve_name(wt.head_ref())?;
    let history = commits_to_replay(repo, &tip, &wt.base_commit())?;
    script.validate(&history)?;

    histedit_prepare(wt, repo)?;
    script.save(wt)?;

    let mut run = ScriptRun::new();
    if let Some(outcome) = run_script(wt, repo, script, 0, &mut run, progress, cancel)? {
        return Ok(outcome);
    }
    histedit_complete(wt, repo)?;
    Ok(HisteditOutcome::Complete {
        new_commits: run.new_commits,
    })
}

/// Resume a histedit paused by an `edit` action: commit the amended
/// state, then run the rest of the script.
pub fn histedit_run_continue(
    wt: &mut Worktree,
    repo: &Repository,
    progress: &mut ProgressFn<'_>,
    cancel: &CancelFn<'_>,
) -> WtResult<HisteditOutcome> {
    let (commit_id, _base) = histedit_continue(wt, repo)?;
    let script = HisteditScript::load(wt)?;

    let pos = script
        .actions
        .iter()
        .position(|a| matches!(a, HisteditAction::Edit(id) if *id == commit_id))
        .ok_or_else(|| WorktreeError::MetaCorrupt("edited commit not in script".into()))?;

    let mut run = ScriptRun::new();
    // The edit's amendment may touch any path: collect over the whole
    // tree.
    let logmsg = mesg_after(&script, pos).map(str::to_string);
    if let Some(new_id) = histedit_commit(wt, repo, None, &commit_id, logmsg.as_deref())? {
        run.new_commits.push(new_id);
    }

    let next = if mesg_after(&script, pos).is_some() {
        pos + 2
    } else {
        pos + 1
    };
    if let Some(outcome) = run_script(wt, repo, &script, next, &mut run, progress, cancel)? {
        return Ok(outcome);
    }
    histedit_complete(wt, repo)?;
    Ok(HisteditOutcome::Complete {
        new_commits: run.new_commits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::checkout_files;
    use crate::never_cancel;
    use crate::status::worktree_status;
    use crate::testutil::{self, Spec};
    use std::fs;

    /// The seed history: base holds alpha, beta, epsilon/zeta.
    /// H1 modifies alpha, deletes beta, adds epsilon/new.
    /// H2 modifies epsilon/zeta.
    fn seed() -> (
        tempfile::TempDir,
        Worktree,
        Repository,
        ObjectId, // base
        ObjectId, // h1
        ObjectId, // h2
    ) {
        let (repo, base) = testutil::test_repo(&[
            ("alpha", "alpha\n"),
            ("beta", "beta\n"),
            ("epsilon/zeta", "zeta\n"),
        ]);
        let h1 = testutil::commit_files(
            &repo,
            &[base],
            &[
                ("alpha", Spec::File("modified alpha\n")),
                ("epsilon/zeta", Spec::File("zeta\n")),
                ("epsilon/new", Spec::File("new file\n")),
            ],
            "committing changes\n",
            1_700_000_100,
        );
        let h2 = testutil::commit_files(
            &repo,
            &[h1],
            &[
                ("alpha", Spec::File("modified alpha\n")),
                ("epsilon/zeta", Spec::File("modified zeta\n")),
                ("epsilon/new", Spec::File("new file\n")),
            ],
            "committing to zeta on master\n",
            1_700_000_200,
        );
        testutil::set_branch(&repo, "refs/heads/master", h2);

        let dir = tempfile::tempdir().unwrap();
        let wtpath = dir.path().join("wt");
        Worktree::init(&wtpath, &repo, "refs/heads/master", "/").unwrap();
        let mut wt = Worktree::open(&wtpath).unwrap();
        // The work tree sits at the commit the rewritten history will
        // grow from.
        wt.lock_exclusive().unwrap();
        wt.set_base_commit(&repo, base).unwrap();
        wt.lock_shared().unwrap();
        let cancel = never_cancel();
        checkout_files(&wt, &repo, &[""], &mut |_, _| Ok(()), &cancel).unwrap();
        (dir, wt, repo, base, h1, h2)
    }

    fn run(
        wt: &mut Worktree,
        repo: &Repository,
        script: HisteditScript,
    ) -> (WtResult<HisteditOutcome>, Vec<(FileStatus, String)>) {
        let mut events = Vec::new();
        let cancel = never_cancel();
        let outcome = histedit_run(
            wt,
            repo,
            &script,
            &mut |s, p| {
                events.push((s, p.to_string()));
                Ok(())
            },
            &cancel,
        );
        (outcome, events)
    }

    fn log_from(repo: &Repository, tip: ObjectId) -> Vec<(ObjectId, String)> {
        let mut out = Vec::new();
        let mut cursor = Some(tip);
        while let Some(id) = cursor {
            let c = lookup::read_commit(repo.store(), &id).unwrap();
            cursor = c.first_parent().copied();
            out.push((id, c.message));
        }
        out
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
    fn noop_histedit_recreates_history() {
        let (_dir, mut wt, repo, base, h1, h2) = seed();
        let script = HisteditScript {
            actions: vec![HisteditAction::Pick(h1), HisteditAction::Pick(h2)],
        };

        let (outcome, events) = run(&mut wt, &repo, script);
        let HisteditOutcome::Complete { new_commits } = outcome.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(new_commits.len(), 2);

        // Progress order: H1's files, then H2's.
        assert_eq!(
            events,
            vec![
                (FileStatus::Merge, "alpha".to_string()),
                (FileStatus::Delete, "beta".to_string()),
                (FileStatus::Add, "epsilon/new".to_string()),
                (FileStatus::Merge, "epsilon/zeta".to_string()),
            ]
        );

        // Final log: new2, new1, original base.
        let tip = repo.refs().resolve_name("refs/heads/master").unwrap();
        let log = log_from(&repo, tip);
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].0, new_commits[1]);
        assert_eq!(log[0].1, "committing to zeta on master\n");
        assert_eq!(log[1].0, new_commits[0]);
        assert_eq!(log[1].1, "committing changes\n");
        assert_eq!(log[2].0, base);

        // The rewrite is content-preserving.
        let orig_tree = lookup::read_commit(repo.store(), &h2).unwrap().tree_id;
        let new_tree = lookup::read_commit(repo.store(), &tip).unwrap().tree_id;
        assert_eq!(orig_tree, new_tree);

        assert_eq!(wt.head_ref(), "refs/heads/master");
        assert!(statuses(&wt, &repo).is_empty());
        assert!(!histedit_in_progress(&wt));
    }

    #[test]
    fn histedit_swap_order() {
        let (_dir, mut wt, repo, _base, h1, h2) = seed();
        let script = HisteditScript {
            actions: vec![HisteditAction::Pick(h2), HisteditAction::Pick(h1)],
        };

        let (outcome, events) = run(&mut wt, &repo, script);
        let HisteditOutcome::Complete { new_commits } = outcome.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(new_commits.len(), 2);

        // H2's change lands first, then H1's.
        let zeta_pos = events
            .iter()
            .position(|(_, p)| p == "epsilon/zeta")
            .unwrap();
        let alpha_pos = events.iter().position(|(_, p)| p == "alpha").unwrap();
        assert!(zeta_pos < alpha_pos);

        // The rewritten H1 is the new tip.
        let tip = repo.refs().resolve_name("refs/heads/master").unwrap();
        let log = log_from(&repo, tip);
        assert_eq!(log[0].1, "committing changes\n");
        assert_eq!(log[1].1, "committing to zeta on master\n");
    }

    #[test]
    fn histedit_drop_first_commit() {
        let (_dir, mut wt, repo, base, h1, h2) = seed();
        let script = HisteditScript {
            actions: vec![HisteditAction::Drop(h1), HisteditAction::Pick(h2)],
        };

        let (outcome, _events) = run(&mut wt, &repo, script);
        let HisteditOutcome::Complete { new_commits } = outcome.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(new_commits.len(), 1);

        let tip = repo.refs().resolve_name("refs/heads/master").unwrap();
        let log = log_from(&repo, tip);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].1, "committing to zeta on master\n");
        assert_eq!(log[1].0, base);

        // The dropped commit's file never appears.
        assert!(!wt.ondisk_path("epsilon/new").exists());
        assert!(matches!(
            lookup::id_by_path(repo.store(), &tip, "/epsilon/new"),
            Err(grove_store::StoreError::NoTreeEntry(_))
        ));
        // H2's change applied directly onto the original base.
        assert_eq!(
            lookup::read_blob(
                repo.store(),
                &lookup::id_by_path(repo.store(), &tip, "/epsilon/zeta").unwrap()
            )
            .unwrap()
            .data,
            b"modified zeta\n"
        );
        assert_eq!(
            lookup::read_blob(
                repo.store(),
                &lookup::id_by_path(repo.store(), &tip, "/alpha").unwrap()
            )
            .unwrap()
            .data,
            b"alpha\n"
        );
    }

    #[test]
    fn histedit_fold_combines_commits() {
        let (_dir, mut wt, repo, base, h1, h2) = seed();
        // A third commit to carry the fold group.
        let h3 = testutil::commit_files(
            &repo,
            &[h2],
            &[
                ("alpha", Spec::File("modified alpha\ntrailer\n")),
                ("epsilon/zeta", Spec::File("modified zeta\n")),
                ("epsilon/new", Spec::File("new file\n")),
            ],
            "third commit\n",
            1_700_000_300,
        );
        testutil::set_branch(&repo, "refs/heads/master", h3);

        let script = HisteditScript {
            actions: vec![
                HisteditAction::Fold(h1),
                HisteditAction::Drop(h2),
                HisteditAction::Pick(h3),
                HisteditAction::Mesg("committing folded changes".to_string()),
            ],
        };

        let (outcome, _events) = run(&mut wt, &repo, script);
        let HisteditOutcome::Complete { new_commits } = outcome.unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(new_commits.len(), 1);

        let tip = repo.refs().resolve_name("refs/heads/master").unwrap();
        let log = log_from(&repo, tip);
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].1, "committing folded changes");
        assert_eq!(log[1].0, base);

        // H1's diff and H3's diff are present; H2's is not.
        let commit = lookup::read_commit(repo.store(), &tip).unwrap();
        let alpha = lookup::id_by_path(repo.store(), &tip, "/alpha").unwrap();
        assert_eq!(
            lookup::read_blob(repo.store(), &alpha).unwrap().data,
            b"modified alpha\ntrailer\n"
        );
        assert!(lookup::id_by_path(repo.store(), &tip, "/epsilon/new").is_ok());
        let zeta = lookup::id_by_path(repo.store(), &tip, "/epsilon/zeta").unwrap();
        assert_eq!(
            lookup::read_blob(repo.store(), &zeta).unwrap().data,
            b"zeta\n"
        );
        assert_eq!(commit.parents, vec![base]);
    }

    #[test]
    fn histedit_edit_then_continue() {
        let (_dir, mut wt, repo, _base, h1, h2) = seed();
        let script = HisteditScript {
            actions: vec![
                HisteditAction::Edit(h1),
                HisteditAction::Mesg("committing changes".to_string()),
                HisteditAction::Pick(h2),
            ],
        };

        let (outcome, _events) = run(&mut wt, &repo, script);
        let HisteditOutcome::PausedForEdit { commit } = outcome.unwrap() else {
            panic!("expected pause");
        };
        assert_eq!(commit, h1);
        assert!(histedit_in_progress(&wt));

        // The user amends the working file while the run is paused.
        fs::write(wt.ondisk_path("alpha"), "modified alpha\nuser edit\n").unwrap();

        let cancel = never_cancel();
        let outcome =
            histedit_run_continue(&mut wt, &repo, &mut |_, _| Ok(()), &cancel).unwrap();
        let HisteditOutcome::Complete { new_commits } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(new_commits.len(), 2);

        let first = lookup::read_commit(repo.store(), &new_commits[0]).unwrap();
        assert_eq!(first.message, "committing changes");
        let alpha = lookup::id_by_path(repo.store(), &new_commits[0], "/alpha").unwrap();
        assert_eq!(
            lookup::read_blob(repo.store(), &alpha).unwrap().data,
            b"modified alpha\nuser edit\n"
        );

        let tip = repo.refs().resolve_name("refs/heads/master").unwrap();
        assert_eq!(tip, new_commits[1]);
        assert!(statuses(&wt, &repo).is_empty());
    }

    #[test]
    fn fold_last_is_rejected_without_touching_refs() {
        let (_dir, mut wt, repo, _base, h1, h2) = seed();
        let script = HisteditScript {
            actions: vec![
                HisteditAction::Pick(h1),
                HisteditAction::Fold(h2),
                HisteditAction::Mesg("will not run".to_string()),
            ],
        };

        let (outcome, _events) = run(&mut wt, &repo, script);
        let err = outcome.unwrap_err();
        assert!(matches!(err, WorktreeError::FoldLast));
        assert_eq!(
            err.to_string(),
            "last commit in histedit script cannot be folded"
        );

        // No references were planted.
        assert!(repo
            .refs()
            .read_ref(&refnames::histedit_tmp_ref(&wt))
            .unwrap()
            .is_none());
        assert!(!histedit_in_progress(&wt));
        assert_eq!(wt.head_ref(), "refs/heads/master");
    }

    #[test]
    fn script_missing_commit_is_rejected() {
        let (_dir, mut wt, repo, _base, h1, h2) = seed();
        let script = HisteditScript {
            actions: vec![HisteditAction::Pick(h2)],
        };

        let (outcome, _events) = run(&mut wt, &repo, script);
        let err = outcome.unwrap_err();
        match err {
            WorktreeError::MissingCommit(hex) => assert_eq!(hex, h1.to_hex()),
            other => panic!("expected MissingCommit, got {other:?}"),
        }
    }

    #[test]
    fn histedit_abort_restores_prior_state() {
        let (_dir, mut wt, repo, base, h1, h2) = seed();
        let script = HisteditScript {
            actions: vec![
                HisteditAction::Edit(h1),
                HisteditAction::Pick(h2),
            ],
        };

        let (outcome, _events) = run(&mut wt, &repo, script);
        assert!(matches!(
            outcome.unwrap(),
            HisteditOutcome::PausedForEdit { .. }
        ));

        histedit_abort(&mut wt, &repo, &mut |_, _| Ok(())).unwrap();

        assert_eq!(wt.head_ref(), "refs/heads/master");
        assert_eq!(wt.base_commit(), base);
        // The branch still points at the original tip.
        assert_eq!(repo.refs().resolve_name("refs/heads/master").unwrap(), h2);
        // On-disk content is back at the original base.
        assert_eq!(
            fs::read_to_string(wt.ondisk_path("alpha")).unwrap(),
            "alpha\n"
        );
        assert_eq!(fs::read_to_string(wt.ondisk_path("beta")).unwrap(), "beta\n");
        assert!(!wt.ondisk_path("epsilon/new").exists());
        assert!(statuses(&wt, &repo).is_empty());
    }

    #[test]
    fn script_roundtrip_through_disk_form() {
        let id1 = ObjectId::from_bytes(b"one");
        let id2 = ObjectId::from_bytes(b"two");
        let script = HisteditScript {
            actions: vec![
                HisteditAction::Pick(id1),
                HisteditAction::Mesg("a new message".to_string()),
                HisteditAction::Drop(id2),
            ],
        };
        let parsed = HisteditScript::parse(&script.to_text()).unwrap();
        assert_eq!(parsed, script);
    }

    #[test]
    fn script_parse_rejects_garbage() {
        assert!(HisteditScript::parse("frobnicate deadbeef\n").is_err());
        assert!(HisteditScript::parse("pick nothex\n").is_err());
    }

    #[test]
    fn mesg_must_follow_pick_or_edit() {
        let id = ObjectId::from_bytes(b"one");
        let script = HisteditScript {
            actions: vec![
                HisteditAction::Mesg("orphan".to_string()),
                HisteditAction::Pick(id),
            ],
        };
        let err = script.validate(&[id]).unwrap_err();
        assert!(matches!(err, WorktreeError::MetaCorrupt(_)));
    }
}
