use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use grove_types::{Identity, ObjectId};

use crate::error::{StoreError, StoreResult};

/// The kind of object stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Raw content: file bytes or a symlink target.
    Blob,
    /// Directory listing mapping names to object ids.
    Tree,
    /// A root tree plus parents, identities, and a log message.
    Commit,
    /// An annotated pointer at another object.
    Tag,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        })
    }
}

/// The unit of storage: a kind tag, the serialized payload, and the
/// cached payload size.
///
/// Stores never look inside `data`; interpretation belongs to the typed
/// wrappers below.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// The type of this object.
    pub kind: ObjectKind,
    /// The serialized bytes of the object.
    pub data: Vec<u8>,
    /// The size of `data` in bytes.
    pub size: u64,
}

impl StoredObject {
    /// Create a new stored object from kind and data.
    pub fn new(kind: ObjectKind, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self { kind, data, size }
    }

    /// Compute the content-addressed id for this object.
    ///
    /// The hash covers a `<kind> <size>\0` header followed by the
    /// payload, so equal bytes stored under different kinds never
    /// collide.
    pub fn compute_id(&self) -> ObjectId {
        let mut buf = Vec::with_capacity(self.data.len() + 16);
        buf.extend_from_slice(self.kind.to_string().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.size.to_string().as_bytes());
        buf.push(0);
        buf.extend_from_slice(&self.data);
        ObjectId::from_bytes(&buf)
    }
}

/// Serialize a typed object into its storage envelope.
fn encode<T: Serialize>(kind: ObjectKind, value: &T) -> StoreResult<StoredObject> {
    let data =
        serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(StoredObject::new(kind, data))
}

/// Decode a typed object out of its storage envelope, checking the kind
/// tag first.
fn decode<T: DeserializeOwned>(obj: &StoredObject, want: ObjectKind) -> StoreResult<T> {
    if obj.kind != want {
        return Err(StoreError::CorruptObject {
            id: obj.compute_id(),
            reason: format!("expected {want}, got {}", obj.kind),
        });
    }
    serde_json::from_slice(&obj.data).map_err(|e| StoreError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// Raw content object. The payload is the content itself, not a serde
/// encoding, so blob bytes on disk equal blob bytes in the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub data: Vec<u8>,
}

impl Blob {
    /// Create a new blob from raw bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Convert into a `StoredObject` for storage.
    pub fn to_stored_object(&self) -> StoredObject {
        StoredObject::new(ObjectKind::Blob, self.data.clone())
    }

    /// Decode from a `StoredObject`.
    pub fn from_stored_object(obj: &StoredObject) -> StoreResult<Self> {
        if obj.kind != ObjectKind::Blob {
            return Err(StoreError::CorruptObject {
                id: obj.compute_id(),
                reason: format!("expected blob, got {}", obj.kind),
            });
        }
        Ok(Self {
            data: obj.data.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// File mode of a tree entry, following the git mode-bit convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryMode {
    /// Normal file (0o100644).
    Regular,
    /// Executable file (0o100755).
    Executable,
    /// Symbolic link (0o120000).
    Symlink,
    /// Subtree (0o040000).
    Directory,
    /// Commit reference inside a tree (0o160000), opaque to the
    /// work-tree engine.
    Submodule,
}

impl EntryMode {
    /// Octal mode value.
    pub fn mode_bits(&self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Directory => 0o040000,
            Self::Submodule => 0o160000,
        }
    }

    /// Parse from an octal mode value.
    pub fn from_mode_bits(bits: u32) -> Option<Self> {
        [
            Self::Regular,
            Self::Executable,
            Self::Symlink,
            Self::Directory,
            Self::Submodule,
        ]
        .into_iter()
        .find(|mode| mode.mode_bits() == bits)
    }

    /// Returns `true` for directory entries.
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory)
    }

    /// Returns `true` for entries carrying an executable bit.
    pub fn is_executable(&self) -> bool {
        matches!(self, Self::Executable)
    }

    /// Returns `true` for symbolic links.
    pub fn is_symlink(&self) -> bool {
        matches!(self, Self::Symlink)
    }

    /// Returns `true` for submodule entries.
    pub fn is_submodule(&self) -> bool {
        matches!(self, Self::Submodule)
    }
}

impl std::fmt::Display for EntryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06o}", self.mode_bits())
    }
}

/// One name in a directory listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// File mode.
    pub mode: EntryMode,
    /// Entry name within its directory.
    pub name: String,
    /// Content-addressed id of the referenced object.
    pub object_id: ObjectId,
}

impl TreeEntry {
    /// Create a new tree entry.
    pub fn new(mode: EntryMode, name: impl Into<String>, object_id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            object_id,
        }
    }
}

impl PartialOrd for TreeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

/// A directory listing. Entries are always name-sorted so equal
/// listings hash identically.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    /// Sorted entries in this directory.
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Create a new tree, sorting the entries by name.
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort();
        Self { entries }
    }

    /// Create an empty tree.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Convert into a `StoredObject` for storage.
    pub fn to_stored_object(&self) -> StoreResult<StoredObject> {
        encode(ObjectKind::Tree, self)
    }

    /// Decode from a `StoredObject`.
    pub fn from_stored_object(obj: &StoredObject) -> StoreResult<Self> {
        decode(obj, ObjectKind::Tree)
    }

    /// Look up an entry by name via binary search over the sorted
    /// entries.
    pub fn find_entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// A commit object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Root tree of this commit.
    pub tree_id: ObjectId,
    /// Parent commit ids, first parent first.
    pub parents: Vec<ObjectId>,
    /// Who wrote the change.
    pub author: Identity,
    /// Author timestamp, unix seconds.
    pub author_time: i64,
    /// Who created the commit object.
    pub committer: Identity,
    /// Committer timestamp, unix seconds.
    pub commit_time: i64,
    /// Log message.
    pub message: String,
}

impl Commit {
    /// Convert into a `StoredObject` for storage.
    pub fn to_stored_object(&self) -> StoreResult<StoredObject> {
        encode(ObjectKind::Commit, self)
    }

    /// Decode from a `StoredObject`.
    pub fn from_stored_object(obj: &StoredObject) -> StoreResult<Self> {
        decode(obj, ObjectKind::Commit)
    }

    /// The first parent, if any.
    pub fn first_parent(&self) -> Option<&ObjectId> {
        self.parents.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(b: u8) -> ObjectId {
        ObjectId::from_hash([b; 20])
    }

    fn sample_commit() -> Commit {
        let who = Identity::new("Flan Hacker", "flan@example.com");
        Commit {
            tree_id: oid(1),
            parents: vec![oid(2)],
            author: who.clone(),
            author_time: 1_700_000_000,
            committer: who,
            commit_time: 1_700_000_060,
            message: "import the thing\n".into(),
        }
    }

    #[test]
    fn blob_payload_is_raw_bytes() {
        let blob = Blob::new(b"raw bytes, no envelope".to_vec());
        let stored = blob.to_stored_object();
        assert_eq!(stored.data, b"raw bytes, no envelope");
        assert_eq!(Blob::from_stored_object(&stored).unwrap(), blob);
    }

    #[test]
    fn decoding_checks_the_kind_tag() {
        let stored = StoredObject::new(ObjectKind::Blob, b"just bytes".to_vec());
        assert!(matches!(
            Tree::from_stored_object(&stored),
            Err(StoreError::CorruptObject { .. })
        ));
        assert!(matches!(
            Commit::from_stored_object(&stored),
            Err(StoreError::CorruptObject { .. })
        ));
    }

    #[test]
    fn tree_sorts_and_finds_entries() {
        let tree = Tree::new(vec![
            TreeEntry::new(EntryMode::Regular, "zebra", oid(3)),
            TreeEntry::new(EntryMode::Directory, "apex", oid(4)),
        ]);
        assert_eq!(tree.entries[0].name, "apex");
        assert_eq!(tree.find_entry("zebra").unwrap().object_id, oid(3));
        assert!(tree.find_entry("missing").is_none());
        assert_eq!(tree.len(), 2);
        assert!(!tree.is_empty());
    }

    #[test]
    fn tree_and_commit_envelope_roundtrips() {
        let tree = Tree::new(vec![TreeEntry::new(EntryMode::Symlink, "link", oid(9))]);
        let back = Tree::from_stored_object(&tree.to_stored_object().unwrap()).unwrap();
        assert_eq!(back, tree);

        let commit = sample_commit();
        let back = Commit::from_stored_object(&commit.to_stored_object().unwrap()).unwrap();
        assert_eq!(back, commit);
        assert_eq!(back.first_parent(), Some(&oid(2)));
    }

    #[test]
    fn equal_trees_hash_identically_regardless_of_input_order() {
        let a = Tree::new(vec![
            TreeEntry::new(EntryMode::Regular, "one", oid(1)),
            TreeEntry::new(EntryMode::Regular, "two", oid(2)),
        ]);
        let b = Tree::new(vec![
            TreeEntry::new(EntryMode::Regular, "two", oid(2)),
            TreeEntry::new(EntryMode::Regular, "one", oid(1)),
        ]);
        assert_eq!(
            a.to_stored_object().unwrap().compute_id(),
            b.to_stored_object().unwrap().compute_id()
        );
    }

    #[test]
    fn kind_participates_in_the_id() {
        let data = b"identical payload".to_vec();
        let as_blob = StoredObject::new(ObjectKind::Blob, data.clone()).compute_id();
        let as_tree = StoredObject::new(ObjectKind::Tree, data).compute_id();
        assert_ne!(as_blob, as_tree);
    }

    #[test]
    fn mode_bits_roundtrip_and_predicates() {
        for (mode, bits) in [
            (EntryMode::Regular, 0o100644),
            (EntryMode::Executable, 0o100755),
            (EntryMode::Symlink, 0o120000),
            (EntryMode::Directory, 0o040000),
            (EntryMode::Submodule, 0o160000),
        ] {
            assert_eq!(mode.mode_bits(), bits);
            assert_eq!(EntryMode::from_mode_bits(bits), Some(mode));
        }
        assert_eq!(EntryMode::from_mode_bits(0o777), None);
        assert!(EntryMode::Directory.is_dir());
        assert!(EntryMode::Executable.is_executable());
        assert!(EntryMode::Symlink.is_symlink());
        assert!(EntryMode::Submodule.is_submodule());
        assert!(!EntryMode::Regular.is_dir());
    }
}
