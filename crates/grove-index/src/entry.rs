//! File index entry types.

use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;

use serde::{Deserialize, Serialize};
use grove_types::ObjectId;

/// Staged-change code for an entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Nothing staged.
    #[default]
    None,
    /// A staged addition.
    Add,
    /// A staged modification.
    Modify,
    /// A staged deletion.
    Delete,
}

/// How the tracked file is represented on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexFileType {
    /// A regular file.
    #[default]
    Regular,
    /// A symbolic link.
    Symlink,
    /// A blob whose content was installed as a regular file because its
    /// symlink target was unsafe or too long.
    BadSymlink,
}

/// Verdict returned by [`crate::FileIndex::for_each_entry_safe`]
/// visitors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryAction {
    /// Keep the entry.
    Keep,
    /// Remove the entry from the index.
    Remove,
}

/// A tracked file in the index.
///
/// The stat fingerprint (ctime, mtime, size) lets the status engine
/// skip content comparison for unchanged files; `size` keeps only the
/// low 32 bits, which is all the comparison needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Work-tree-relative path. Primary key; duplicates forbidden.
    pub path: String,
    /// Status-change time, seconds.
    pub ctime_sec: i64,
    /// Status-change time, nanoseconds.
    pub ctime_nsec: i64,
    /// Modification time, seconds.
    pub mtime_sec: i64,
    /// Modification time, nanoseconds.
    pub mtime_nsec: i64,
    /// Low 32 bits of the file size.
    pub size: u32,
    /// Executable permission bit.
    pub executable: bool,
    /// On-disk representation of the tracked content.
    pub file_type: IndexFileType,
    /// Content hash the entry was last known to match in the
    /// repository. `None` for files scheduled for addition.
    pub blob_id: Option<ObjectId>,
    /// The commit whose tree `blob_id` came from (the entry's base).
    pub commit_id: Option<ObjectId>,
    /// Blob recorded by stage operations.
    pub staged_blob_id: Option<ObjectId>,
    /// Staged-change code.
    pub stage: Stage,
    /// Set while a journaled deletion has removed the file from disk.
    pub deleted_from_disk: bool,
}

impl FileEntry {
    /// Create a new entry with a zeroed fingerprint and no blob.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ctime_sec: 0,
            ctime_nsec: 0,
            mtime_sec: 0,
            mtime_nsec: 0,
            size: 0,
            executable: false,
            file_type: IndexFileType::Regular,
            blob_id: None,
            commit_id: None,
            staged_blob_id: None,
            stage: Stage::None,
            deleted_from_disk: false,
        }
    }

    /// Returns `true` if the entry records a blob id.
    pub fn has_blob(&self) -> bool {
        self.blob_id.is_some()
    }

    /// Returns `true` if the entry records a base commit.
    pub fn has_commit(&self) -> bool {
        self.commit_id.is_some()
    }

    /// Returns `true` unless a journaled deletion removed the file.
    pub fn has_file_on_disk(&self) -> bool {
        !self.deleted_from_disk
    }

    /// Returns `true` if any staged state is recorded.
    pub fn is_staged(&self) -> bool {
        self.stage != Stage::None
    }

    /// Mark the on-disk file as removed by a journaled deletion.
    pub fn mark_deleted_from_disk(&mut self) {
        self.deleted_from_disk = true;
    }

    /// Refresh the stat fingerprint from filesystem metadata.
    ///
    /// The tracked file type is left alone: a bad-symlink entry stays a
    /// bad symlink even though the disk carries a regular file.
    pub fn update_fingerprint(&mut self, meta: &Metadata) {
        self.ctime_sec = meta.ctime();
        self.ctime_nsec = meta.ctime_nsec();
        self.mtime_sec = meta.mtime();
        self.mtime_nsec = meta.mtime_nsec();
        self.size = (meta.size() & 0xffff_ffff) as u32;
        self.executable = meta.mode() & 0o100 != 0;
        self.deleted_from_disk = false;
    }

    /// Returns `true` if the cached fingerprint differs from the given
    /// metadata.
    pub fn fingerprint_differs(&self, meta: &Metadata) -> bool {
        !(self.ctime_sec == meta.ctime()
            && self.ctime_nsec == meta.ctime_nsec()
            && self.mtime_sec == meta.mtime()
            && self.mtime_nsec == meta.mtime_nsec()
            && u64::from(self.size) == (meta.size() & 0xffff_ffff))
    }

    /// Clear all staged state.
    pub fn clear_stage(&mut self) {
        self.stage = Stage::None;
        self.staged_blob_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_is_unstaged_regular() {
        let e = FileEntry::new("src/main.rs");
        assert_eq!(e.path, "src/main.rs");
        assert!(!e.is_staged());
        assert!(!e.has_blob());
        assert!(!e.has_commit());
        assert!(e.has_file_on_disk());
        assert_eq!(e.file_type, IndexFileType::Regular);
    }

    #[test]
    fn mark_deleted_from_disk() {
        let mut e = FileEntry::new("gone.txt");
        e.mark_deleted_from_disk();
        assert!(!e.has_file_on_disk());
    }

    #[test]
    fn clear_stage_resets_both_fields() {
        let mut e = FileEntry::new("staged.txt");
        e.stage = Stage::Modify;
        e.staged_blob_id = Some(ObjectId::from_bytes(b"staged"));
        e.clear_stage();
        assert!(!e.is_staged());
        assert!(e.staged_blob_id.is_none());
    }

    #[test]
    fn fingerprint_tracks_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"content").unwrap();
        let meta = std::fs::symlink_metadata(&path).unwrap();

        let mut e = FileEntry::new("f");
        assert!(e.fingerprint_differs(&meta));
        e.update_fingerprint(&meta);
        assert!(!e.fingerprint_differs(&meta));
        assert_eq!(e.size, 7);
        assert!(!e.executable);
    }
}
