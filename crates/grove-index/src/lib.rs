//! The per-work-tree file index.
//!
//! The index is an ordered map from work-tree-relative paths to
//! [`FileEntry`] records: the cached stat fingerprint, the blob the file
//! was last known to match, the commit that blob came from, and any
//! staged state. It is held fully in memory, read from and atomically
//! rewritten to a binary on-disk form, and walked in sorted order
//! against repository trees ([`walk::diff_tree`]) and against the
//! on-disk directory tree ([`walk::diff_dir`]).

pub mod entry;
pub mod error;
pub mod index;
pub mod walk;

pub use entry::{EntryAction, FileEntry, IndexFileType, Stage};
pub use error::{IndexError, IndexResult};
pub use index::FileIndex;
pub use walk::{DirDiffItem, DiskEntry, DiskFileType, TreeDiffItem};
