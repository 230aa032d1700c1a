//! The work-tree engine's error kinds.
//!
//! The kind set is closed: state machines branch on these variants, so
//! messages are auxiliary and never load-bearing.

use thiserror::Error;

/// Errors produced by work-tree operations.
#[derive(Debug, Error)]
pub enum WorktreeError {
    /// A work-tree control file is missing, truncated, or malformed.
    #[error("work tree metadata is corrupt: {0}")]
    MetaCorrupt(String),

    /// The work tree was created by a different format version.
    #[error("unsupported work tree format version {actual}, expected {expected}")]
    WrongVersion { expected: u32, actual: u32 },

    /// Another process holds the work-tree lock.
    #[error("work tree is busy")]
    Busy,

    /// No work-tree metadata directory was found.
    #[error("not a work tree: {0}")]
    NotAWorktree(String),

    /// Index entries are based on more than one commit.
    #[error("work tree contains files from multiple base commits")]
    MixedCommits,

    /// The work tree contains conflicted files.
    #[error("work tree contains conflicted files")]
    Conflicts,

    /// The work tree contains local modifications.
    #[error("work tree contains local changes")]
    Modified,

    /// A commitable's base is out of date with the branch head.
    #[error("work tree is out of date: {0}")]
    OutOfDate(String),

    /// The branch head moved while a commit was being built.
    #[error("branch head changed while committing")]
    HeadChanged,

    /// Nothing to commit or stage.
    #[error("no changes to commit")]
    NoChanges,

    /// A conflicted file cannot be committed.
    #[error("cannot commit file in conflicted status: {0}")]
    CommitConflict(String),

    /// The supplied commit log message was empty.
    #[error("commit message cannot be empty")]
    EmptyMessage,

    /// A path argument does not name a commitable or work-tree path.
    #[error("bad path: {0}")]
    BadPath(String),

    /// A file's status precludes the requested operation.
    #[error("file has unexpected status: {0}")]
    FileStatus(String),

    /// A staged file blocks the requested operation.
    #[error("file is staged: {0}")]
    FileStaged(String),

    /// The operation requires the path to be staged.
    #[error("file is not staged: {0}")]
    NotStaged(String),

    /// A conflicted file cannot be staged.
    #[error("cannot stage conflicted file: {0}")]
    StageConflict(String),

    /// No tree entry exists for the requested path.
    #[error("no tree entry found: {0}")]
    NoTreeEntry(String),

    /// A non-regular file obstructs a tracked path.
    #[error("file is obstructed: {0}")]
    Obstructed(String),

    /// The file contains local modifications.
    #[error("file contains modifications: {0}")]
    FileModified(String),

    /// A symlink target escapes the work tree.
    #[error("symlink target is unsafe: {0}")]
    BadSymlink(String),

    /// I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// A source commit is absent from the histedit script.
    #[error("commit {0} is missing from the histedit script")]
    MissingCommit(String),

    /// The last histedit action cannot be a fold.
    #[error("last commit in histedit script cannot be folded")]
    FoldLast,

    /// The journaled rebase commit reference disagrees with the commit
    /// being replayed.
    #[error("rebase commit reference mismatch")]
    RebaseCommitId,

    /// The journaled histedit commit reference disagrees with the
    /// commit being replayed.
    #[error("histedit commit reference mismatch")]
    HisteditCommitId,

    /// The interactive patch callback aborted the operation.
    #[error("patch selection aborted")]
    PatchChoice,

    /// Object store failure.
    #[error(transparent)]
    Store(grove_store::StoreError),

    /// Reference store failure.
    #[error(transparent)]
    Ref(#[from] grove_refs::RefError),

    /// File index failure.
    #[error(transparent)]
    Index(grove_index::IndexError),
}

impl From<grove_store::StoreError> for WorktreeError {
    fn from(e: grove_store::StoreError) -> Self {
        match e {
            grove_store::StoreError::NoTreeEntry(path) => WorktreeError::NoTreeEntry(path),
            other => WorktreeError::Store(other),
        }
    }
}

impl From<grove_index::IndexError> for WorktreeError {
    fn from(e: grove_index::IndexError) -> Self {
        match e {
            grove_index::IndexError::Cancelled => WorktreeError::Cancelled,
            grove_index::IndexError::Io(io) => WorktreeError::Io(io),
            grove_index::IndexError::Store(s) => WorktreeError::from(s),
            other => WorktreeError::Index(other),
        }
    }
}

/// Convenience alias for work-tree results.
pub type WtResult<T> = Result<T, WorktreeError>;

/// OS-error predicates the state machines branch on.
pub mod oserr {
    use std::io;

    /// The path does not exist.
    pub fn missing(e: &io::Error) -> bool {
        e.kind() == io::ErrorKind::NotFound
    }

    /// The path already exists.
    pub fn exists(e: &io::Error) -> bool {
        e.kind() == io::ErrorKind::AlreadyExists
    }

    /// Too many levels of symbolic links.
    pub fn symlink_loop(e: &io::Error) -> bool {
        e.raw_os_error() == Some(40) // ELOOP
    }

    /// The filesystem is read-only.
    pub fn read_only(e: &io::Error) -> bool {
        e.raw_os_error() == Some(30) // EROFS
    }
}
