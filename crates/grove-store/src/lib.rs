//! Content-addressed object storage for grove.
//!
//! Defines the object model (blobs, trees, commits), the [`ObjectStore`]
//! trait every storage backend implements, an in-memory reference
//! implementation, and path-based lookup over commits and trees.
//!
//! The store never interprets blob contents; trees and commits are
//! serialized envelopes keyed by content hash.

pub mod error;
pub mod lookup;
pub mod memory;
pub mod object;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use lookup::{
    commit_tree, id_by_path, read_blob, read_commit, read_tree, tree_entry_by_path, tree_files,
};
pub use memory::InMemoryObjectStore;
pub use object::{Blob, Commit, EntryMode, ObjectKind, StoredObject, Tree, TreeEntry};
pub use traits::ObjectStore;
