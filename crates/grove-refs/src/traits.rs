//! The [`RefStore`] trait defining the reference storage interface.
//!
//! Any backend (in-memory, filesystem, database) implements this trait
//! to provide named reference management.

use grove_types::ObjectId;

use crate::error::{RefError, Result};
use crate::types::{Ref, RefTarget};

/// Upper bound on symbolic-reference chains during resolution.
const MAX_SYMREF_DEPTH: usize = 8;

/// Storage backend for named references.
///
/// Implementations must be thread-safe (`Send + Sync`) and provide
/// atomic read/write/delete operations on named refs. Per-ref advisory
/// locks serialize read-modify-write sequences such as the commit
/// pipeline's compare-and-move of a branch head.
pub trait RefStore: Send + Sync {
    /// Read a ref by its full name (e.g. `refs/heads/main`).
    ///
    /// Returns `Ok(None)` if the ref does not exist.
    fn read_ref(&self, name: &str) -> Result<Option<Ref>>;

    /// Write (create or update) a ref.
    fn write_ref(&self, reference: &Ref) -> Result<()>;

    /// Delete a ref by name.
    ///
    /// Returns `Ok(true)` if the ref existed and was deleted,
    /// `Ok(false)` if it did not exist.
    fn delete_ref(&self, name: &str) -> Result<bool>;

    /// List all refs whose name starts with `prefix`, sorted by name.
    fn list_refs(&self, prefix: &str) -> Result<Vec<Ref>>;

    /// Take the advisory lock on a ref name. Fails with
    /// [`RefError::Locked`] when another holder owns it.
    fn lock_ref(&self, name: &str) -> Result<()>;

    /// Release the advisory lock on a ref name.
    fn unlock_ref(&self, name: &str) -> Result<()>;

    /// Read a ref, failing with [`RefError::NotFound`] if absent.
    fn open_ref(&self, name: &str) -> Result<Ref> {
        self.read_ref(name)?.ok_or_else(|| RefError::NotFound {
            name: name.to_string(),
        })
    }

    /// Resolve a ref to an object id, following symbolic refs.
    fn resolve(&self, reference: &Ref) -> Result<ObjectId> {
        let mut current = reference.clone();
        for _ in 0..MAX_SYMREF_DEPTH {
            match current.target {
                RefTarget::Object(id) => return Ok(id),
                RefTarget::Symbolic(ref next) => {
                    let next = next.clone();
                    current = self.open_ref(&next)?;
                }
            }
        }
        Err(RefError::SymrefLoop {
            name: reference.name.clone(),
        })
    }

    /// Resolve a ref name to an object id, following symbolic refs.
    fn resolve_name(&self, name: &str) -> Result<ObjectId> {
        let r = self.open_ref(name)?;
        self.resolve(&r)
    }
}
