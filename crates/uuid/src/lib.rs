//! UUID and sharded-path utilities.
//!
//! SecureMed identifies orders, artifacts and grants by UUID and stores sealed artifact blobs
//! under sharded directories derived from the artifact's UUID.
//!
//! ## Canonical UUID form
//! - Length: 32
//! - Characters: `0-9` and `a-f` only
//! - Example: `550e8400e29b41d4a716446655440000`
//!
//! Canonical form is *required* for externally supplied identifiers (path parameters, CLI
//! arguments). Uppercase, hyphenated, wrong-length or non-hex input is rejected rather than
//! normalised.
//!
//! ## Sharded directory layout
//! For a canonical UUID `u`, data lives under `parent_dir/<u[0..2]>/<u[2..4]>/<u>/`, which keeps
//! any single directory from accumulating millions of entries.

mod service;

pub use service::{ShardableUuid, Uuid};

/// Error type for UUID operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for UUID operations.
pub type UuidResult<T> = Result<T, UuidError>;
