//! The grove work-tree engine.
//!
//! A work tree is a filesystem checkout reflecting one commit of a
//! content-addressable repository. This crate maintains that checkout
//! and orchestrates the multi-step, history-rewriting operations on top
//! of it: checkout/update, status, three-way merge, revert, commit,
//! stage/unstage, rebase, and histedit.
//!
//! Crash safety comes from two rules: every on-disk mutation is a
//! temp-file-plus-rename within its target directory, and every
//! long-running rewrite journals its position in repository references
//! derived from the work tree's uuid, so an interrupted rebase or
//! histedit resumes exactly where it stopped. Concurrency safety comes
//! from a single advisory file lock per work tree, taken shared for
//! reads and exclusive for mutations, always non-blocking.

pub mod checkout;
pub mod commit;
pub mod error;
pub mod histedit;
pub mod install;
pub mod lock;
pub mod merge;
pub mod meta;
pub mod path;
pub mod rebase;
pub mod refnames;
pub mod repo;
pub mod revert;
pub mod stage;
pub mod status;

#[cfg(test)]
pub(crate) mod testutil;

pub use checkout::checkout_files;
pub use commit::{commit, Commitable, CommitMsgFn, CtStatusFn};
pub use error::{WorktreeError, WtResult};
pub use histedit::{
    histedit_abort, histedit_continue, histedit_in_progress, histedit_postpone, histedit_run,
    histedit_run_continue, HisteditAction, HisteditOutcome, HisteditScript,
};
pub use merge::merge_files_into_worktree;
pub use meta::{Worktree, FORMAT_VERSION, GROVE_DIR};
pub use rebase::{
    rebase_abort, rebase_branch, rebase_commit, rebase_complete, rebase_continue,
    rebase_in_progress, rebase_merge_files, rebase_postpone, rebase_prepare, RebaseOutcome,
};
pub use repo::Repository;
pub use revert::{revert, schedule_add, schedule_delete};
pub use stage::{stage, unstage, PatchChoice, PatchFn};
pub use status::{worktree_status, FileStatus, StatusFn, StatusReport};

/// Per-file progress callback: one call per file touched.
pub type ProgressFn<'a> = dyn FnMut(FileStatus, &str) -> WtResult<()> + 'a;

/// Cooperative cancellation predicate, checked at every walk step.
pub type CancelFn<'a> = dyn Fn() -> bool + 'a;

/// A cancellation predicate that never fires.
pub fn never_cancel() -> impl Fn() -> bool {
    || false
}
