//! The in-memory file index and its binary on-disk form.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::entry::{EntryAction, FileEntry};
use crate::error::{IndexError, IndexResult};

/// Magic bytes opening the on-disk index.
const INDEX_MAGIC: &[u8; 4] = b"GRVI";

/// Current on-disk format version.
const INDEX_VERSION: u32 = 1;

/// The file index: an ordered map of tracked paths to per-file records.
///
/// Entries are kept in a `BTreeMap` so every walk over the index is in
/// path order and therefore deterministic. The on-disk form is a small
/// header (magic + format version) followed by a length-prefixed binary
/// payload; rewrites go through a temp file in the same directory and a
/// rename.
#[derive(Debug, Default)]
pub struct FileIndex {
    entries: BTreeMap<String, FileEntry>,
}

impl FileIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a new entry. Duplicate paths are forbidden.
    pub fn add(&mut self, entry: FileEntry) -> IndexResult<()> {
        if self.entries.contains_key(&entry.path) {
            return Err(IndexError::DuplicateEntry(entry.path));
        }
        self.entries.insert(entry.path.clone(), entry);
        Ok(())
    }

    /// Insert an entry, replacing any previous entry at the same path.
    pub fn upsert(&mut self, entry: FileEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    /// Get an entry by path.
    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    /// Get a mutable entry by path.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut FileEntry> {
        self.entries.get_mut(path)
    }

    /// Remove an entry by path, returning it if present.
    pub fn remove(&mut self, path: &str) -> Option<FileEntry> {
        self.entries.remove(path)
    }

    /// Iterate entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.entries.values()
    }

    /// All paths in order. Used by walks that mutate the index while
    /// iterating.
    pub fn paths(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Visit every entry in path order, tolerating removal of the
    /// visited entry.
    ///
    /// The visitor may mutate the entry in place; returning
    /// [`EntryAction::Remove`] deletes it. Entries added during the walk
    /// are not visited.
    pub fn for_each_entry_safe<E>(
        &mut self,
        mut f: impl FnMut(&mut FileEntry) -> Result<EntryAction, E>,
    ) -> Result<(), E> {
        for path in self.paths() {
            let Some(entry) = self.entries.get_mut(&path) else {
                continue;
            };
            match f(entry)? {
                EntryAction::Keep => {}
                EntryAction::Remove => {
                    self.entries.remove(&path);
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // On-disk form
    // -----------------------------------------------------------------

    /// Read an index from its on-disk path.
    ///
    /// A missing file produces an empty index: the first checkout into a
    /// fresh work tree starts from nothing and completes the index as it
    /// goes.
    pub fn read_from(path: &Path) -> IndexResult<Self> {
        let mut file = match fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        if data.is_empty() {
            // Init creates the index as a zero-length file.
            return Ok(Self::new());
        }
        if data.len() < 8 {
            return Err(IndexError::Corrupt("truncated header".into()));
        }
        if &data[..4] != INDEX_MAGIC {
            return Err(IndexError::Corrupt("bad magic".into()));
        }
        let version = u32::from_le_bytes(data[4..8].try_into().expect("4 bytes"));
        if version != INDEX_VERSION {
            return Err(IndexError::WrongVersion {
                expected: INDEX_VERSION,
                actual: version,
            });
        }

        let entries: Vec<FileEntry> = bincode::deserialize(&data[8..])
            .map_err(|e| IndexError::Serialization(e.to_string()))?;

        let mut index = Self::new();
        for entry in entries {
            index.add(entry)?;
        }
        Ok(index)
    }

    /// Atomically rewrite the index at its on-disk path.
    ///
    /// The new content goes to a temp file in the same directory, is
    /// fsynced, then renamed over the old index.
    pub fn write_to(&self, path: &Path) -> IndexResult<()> {
        let dir = path.parent().ok_or_else(|| {
            IndexError::Corrupt(format!("index path has no parent: {}", path.display()))
        })?;
        let entries: Vec<&FileEntry> = self.entries.values().collect();
        let payload = bincode::serialize(&entries)
            .map_err(|e| IndexError::Serialization(e.to_string()))?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(INDEX_MAGIC)?;
        tmp.write_all(&INDEX_VERSION.to_le_bytes())?;
        tmp.write_all(&payload)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| IndexError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Stage;
    use grove_types::ObjectId;

    fn entry(path: &str) -> FileEntry {
        FileEntry::new(path)
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut idx = FileIndex::new();
        idx.add(entry("a.txt")).unwrap();
        let err = idx.add(entry("a.txt")).unwrap_err();
        assert!(matches!(err, IndexError::DuplicateEntry(_)));
    }

    #[test]
    fn entries_iterate_in_path_order() {
        let mut idx = FileIndex::new();
        idx.add(entry("zeta")).unwrap();
        idx.add(entry("alpha")).unwrap();
        idx.add(entry("mid/file")).unwrap();
        let paths: Vec<&str> = idx.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["alpha", "mid/file", "zeta"]);
    }

    #[test]
    fn for_each_entry_safe_allows_removal() {
        let mut idx = FileIndex::new();
        idx.add(entry("keep")).unwrap();
        idx.add(entry("remove")).unwrap();
        idx.for_each_entry_safe::<std::convert::Infallible>(|e| {
            Ok(if e.path == "remove" {
                EntryAction::Remove
            } else {
                EntryAction::Keep
            })
        })
        .unwrap();
        assert!(idx.get("keep").is_some());
        assert!(idx.get("remove").is_none());
    }

    #[test]
    fn for_each_entry_safe_propagates_errors() {
        let mut idx = FileIndex::new();
        idx.add(entry("a")).unwrap();
        let err = idx
            .for_each_entry_safe(|_| Err(IndexError::Cancelled))
            .unwrap_err();
        assert!(matches!(err, IndexError::Cancelled));
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let idx = FileIndex::read_from(&dir.path().join("file-index")).unwrap();
        assert!(idx.is_empty());
    }

    #[test]
    fn zero_length_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file-index");
        fs::write(&path, b"").unwrap();
        let idx = FileIndex::read_from(&path).unwrap();
        assert!(idx.is_empty());
    }

    #[test]
    fn truncated_header_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file-index");
        fs::write(&path, b"GRV").unwrap();
        assert!(matches!(
            FileIndex::read_from(&path).unwrap_err(),
            IndexError::Corrupt(_)
        ));
    }

    #[test]
    fn write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file-index");

        let mut idx = FileIndex::new();
        let mut e = entry("src/lib.rs");
        e.blob_id = Some(ObjectId::from_bytes(b"blob"));
        e.commit_id = Some(ObjectId::from_bytes(b"commit"));
        e.stage = Stage::Modify;
        e.staged_blob_id = Some(ObjectId::from_bytes(b"staged"));
        e.size = 42;
        e.executable = true;
        idx.add(e).unwrap();
        idx.add(entry("README")).unwrap();

        idx.write_to(&path).unwrap();
        let read = FileIndex::read_from(&path).unwrap();
        assert_eq!(read.len(), 2);
        let e = read.get("src/lib.rs").unwrap();
        assert_eq!(e.blob_id, Some(ObjectId::from_bytes(b"blob")));
        assert_eq!(e.stage, Stage::Modify);
        assert_eq!(e.size, 42);
        assert!(e.executable);
    }

    #[test]
    fn rewrite_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file-index");

        let mut idx = FileIndex::new();
        idx.add(entry("old")).unwrap();
        idx.write_to(&path).unwrap();

        let mut idx2 = FileIndex::new();
        idx2.add(entry("new")).unwrap();
        idx2.write_to(&path).unwrap();

        let read = FileIndex::read_from(&path).unwrap();
        assert!(read.get("old").is_none());
        assert!(read.get("new").is_some());
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file-index");
        fs::write(&path, b"XXXX\x01\x00\x00\x00").unwrap();
        assert!(matches!(
            FileIndex::read_from(&path).unwrap_err(),
            IndexError::Corrupt(_)
        ));
    }

    #[test]
    fn wrong_version_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file-index");
        let mut data = Vec::new();
        data.extend_from_slice(b"GRVI");
        data.extend_from_slice(&99u32.to_le_bytes());
        fs::write(&path, data).unwrap();
        assert!(matches!(
            FileIndex::read_from(&path).unwrap_err(),
            IndexError::WrongVersion { actual: 99, .. }
        ));
    }
}
