//! Core reference types.
//!
//! A reference is a named pointer: direct refs carry an object id,
//! symbolic refs carry the name of another reference. Branch heads live
//! under `refs/heads/`; the work-tree engine plants its journaling refs
//! under `refs/grove/worktree/`.

use serde::{Deserialize, Serialize};
use grove_types::ObjectId;

/// What a reference points at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefTarget {
    /// Direct reference to an object.
    Object(ObjectId),
    /// Symbolic reference to another ref by full name.
    Symbolic(String),
}

/// A named reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    /// Full reference name (e.g. `refs/heads/main`).
    pub name: String,
    /// What this reference points at.
    pub target: RefTarget,
}

impl Ref {
    /// Create a direct reference.
    pub fn direct(name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::Object(id),
        }
    }

    /// Create a symbolic reference.
    pub fn symbolic(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: RefTarget::Symbolic(target.into()),
        }
    }

    /// Returns `true` if this is a symbolic reference.
    pub fn is_symbolic(&self) -> bool {
        matches!(self.target, RefTarget::Symbolic(_))
    }

    /// The object id for direct refs, `None` for symbolic refs.
    pub fn object_id(&self) -> Option<ObjectId> {
        match &self.target {
            RefTarget::Object(id) => Some(*id),
            RefTarget::Symbolic(_) => None,
        }
    }

    /// The symref target name for symbolic refs.
    pub fn symref_target(&self) -> Option<&str> {
        match &self.target {
            RefTarget::Object(_) => None,
            RefTarget::Symbolic(name) => Some(name),
        }
    }

    /// The short name (without the `refs/heads/` prefix, if present).
    pub fn short_name(&self) -> &str {
        self.name.strip_prefix("refs/heads/").unwrap_or(&self.name)
    }
}
