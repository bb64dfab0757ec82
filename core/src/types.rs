//! Shared primitive types used across the rating engine.

/// Primary key of a rate table row.
pub type TableId = i64;

/// A rating run identifier (UUID v4, hyphenated).
pub type RunId = String;

/// Identifier of the acting user, supplied by the caller's auth layer.
pub type UserId = String;
