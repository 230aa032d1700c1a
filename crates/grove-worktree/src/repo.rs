//! The repository handle carried through every work-tree operation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use grove_refs::RefStore;
use grove_store::ObjectStore;

/// A repository: a content-addressed object store plus a reference
/// store, identified by a filesystem path.
///
/// The engine never talks to storage directly; everything goes through
/// the two trait objects, so backends are interchangeable.
#[derive(Clone)]
pub struct Repository {
    path: PathBuf,
    store: Arc<dyn ObjectStore>,
    refs: Arc<dyn RefStore>,
}

impl Repository {
    /// Create a repository handle over the given backends.
    pub fn new(
        path: impl Into<PathBuf>,
        store: Arc<dyn ObjectStore>,
        refs: Arc<dyn RefStore>,
    ) -> Self {
        Self {
            path: path.into(),
            store,
            refs,
        }
    }

    /// The repository path recorded in work-tree metadata.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The object store.
    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    /// The reference store.
    pub fn refs(&self) -> &dyn RefStore {
        self.refs.as_ref()
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("path", &self.path)
            .finish()
    }
}
