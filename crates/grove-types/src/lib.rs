//! Foundation types for grove.
//!
//! This crate provides the identity and content-addressing types used
//! throughout the workspace. Every other grove crate depends on it.
//!
//! # Key Types
//!
//! - [`ObjectId`] — content-addressed identifier (20 bytes, 40-hex form)
//! - [`Identity`] — author/committer name and email
//! - [`TypeError`] — parse failures for the above

pub mod error;
pub mod identity;
pub mod object;

pub use error::TypeError;
pub use identity::Identity;
pub use object::ObjectId;
