//! Reference name validation.
//!
//! Grove follows the git naming rules so refs stay portable across
//! filesystem- and database-backed stores: no whitespace or shell
//! metacharacters, no `..` or `@{` sequences, no dot/slash boundary
//! abuse, no `.lock` suffix.

use crate::error::{RefError, Result};

/// Characters that are forbidden anywhere in a reference name.
const FORBIDDEN_CHARS: &[char] = &[' ', '\t', '\n', '\r', '~', '^', ':', '?', '*', '[', '\\'];

/// The ordered rule set; each entry is a rejection predicate and its
/// reason.
const RULES: &[(fn(&str) -> bool, &str)] = &[
    (str::is_empty, "reference name must not be empty"),
    (
        |name| name.contains(FORBIDDEN_CHARS),
        "contains a forbidden character",
    ),
    (|name| name.contains(".."), "must not contain '..'"),
    (|name| name.contains("@{"), "must not contain '@{'"),
    (
        |name| name.starts_with('.') || name.ends_with('.'),
        "must not start or end with '.'",
    ),
    (
        |name| name.starts_with('/') || name.ends_with('/'),
        "must not start or end with '/'",
    ),
    (|name| name.ends_with(".lock"), "must not end with '.lock'"),
    (
        |name| name.contains("//"),
        "must not contain consecutive slashes",
    ),
    (
        |name| name.split('/').any(|comp| comp.starts_with('.')),
        "path components must not start with '.'",
    ),
];

/// Validate a reference name, returning `Ok(())` if valid.
pub fn validate_ref_name(name: &str) -> Result<()> {
    for (rejects, reason) in RULES {
        if rejects(name) {
            return Err(RefError::InvalidName {
                name: name.to_string(),
                reason: (*reason).to_string(),
            });
        }
    }
    Ok(())
}
