use grove_types::ObjectId;

use crate::error::StoreResult;
use crate::object::StoredObject;

/// Content-addressed object storage.
///
/// The contract every backend honors:
///
/// - an object, once written, never changes (the id is its content);
/// - writing the same object twice is a no-op returning the same id;
/// - a missing object reads as `Ok(None)`, never as an error;
/// - payloads pass through uninterpreted.
pub trait ObjectStore: Send + Sync {
    /// Read an object by id, `Ok(None)` when absent.
    fn read(&self, id: &ObjectId) -> StoreResult<Option<StoredObject>>;

    /// Write an object, returning its content-addressed id.
    fn write(&self, object: &StoredObject) -> StoreResult<ObjectId>;

    /// Whether an object with this id exists.
    fn exists(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.read(id)?.is_some())
    }
}
