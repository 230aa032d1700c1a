//! Names of the repository references the engine plants.
//!
//! Every name embeds the work tree's uuid, so several work trees of the
//! same repository journal their operations independently.

use crate::meta::Worktree;

/// Protects the work tree's base commit from garbage collection.
pub fn base_ref(wt: &Worktree) -> String {
    format!("refs/grove/worktree/base-{}", wt.uuid())
}

/// Mutable branch receiving replayed commits during a rebase.
pub fn rebase_tmp_ref(wt: &Worktree) -> String {
    format!("refs/grove/worktree/rebase/tmp-{}", wt.uuid())
}

/// Symbolic ref to the branch the rebase will land on.
pub fn rebase_newbase_symref(wt: &Worktree) -> String {
    format!("refs/grove/worktree/rebase/newbase-{}", wt.uuid())
}

/// Symbolic ref to the branch being rebased.
pub fn rebase_branch_symref(wt: &Worktree) -> String {
    format!("refs/grove/worktree/rebase/branch-{}", wt.uuid())
}

/// The source commit currently being replayed by a rebase.
pub fn rebase_commit_ref(wt: &Worktree) -> String {
    format!("refs/grove/worktree/rebase/commit-{}", wt.uuid())
}

/// Mutable branch receiving replayed commits during a histedit.
pub fn histedit_tmp_ref(wt: &Worktree) -> String {
    format!("refs/grove/worktree/histedit/tmp-{}", wt.uuid())
}

/// Symbolic ref to the branch being edited.
pub fn histedit_branch_symref(wt: &Worktree) -> String {
    format!("refs/grove/worktree/histedit/branch-{}", wt.uuid())
}

/// The work tree's base commit before the histedit began.
pub fn histedit_base_commit_ref(wt: &Worktree) -> String {
    format!("refs/grove/worktree/histedit/base-commit-{}", wt.uuid())
}

/// The source commit currently being replayed by a histedit.
pub fn histedit_commit_ref(wt: &Worktree) -> String {
    format!("refs/grove/worktree/histedit/commit-{}", wt.uuid())
}
