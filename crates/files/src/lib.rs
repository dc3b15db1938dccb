//! SecureMed File Storage
//!
//! This crate validates uploaded clinical files and stores their sealed (encrypted) form.
//!
//! ## Design Principles
//!
//! - File type is decided by leading bytes only; declared names and extensions are ignored
//! - The content hash is computed over the *plaintext* before anything is encrypted
//! - Only sealed bytes ever reach the disk; this crate never sees a key
//! - Stored blobs are immutable once written (one directory per artifact id)
//! - Metadata sidecars carry no patient or clinician identifiers
//!
//! ## Storage Layout
//!
//! ```text
//! <artifact_root>/
//! └── ab/
//!     └── cd/
//!         └── abcd…<artifact-uuid>/
//!             ├── sealed.bin      # nonce || tag || ciphertext
//!             └── metadata.yaml   # hash, kind, sizes, timestamp
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use securemed_files::{validate, SealedFileStore};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let kind = validate(b"%PDF-1.4 ...")?;
//! let store = SealedFileStore::new(Path::new("artifact_data"))?;
//! # let _ = (kind, store);
//! # Ok(())
//! # }
//! ```

mod constants;
mod files;
mod validator;

pub use constants::{METADATA_FILENAME, SEALED_BLOB_FILENAME};
pub use files::{FileMetadata, SealedFileStore};
pub use securemed_uuid::ShardableUuid;
pub use validator::{hash_content, sniff_media_type, validate, FileKind};

/// Errors that can occur during validation and file operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Leading bytes do not match any accepted clinical file signature
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Root directory does not exist or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// No blob stored under the requested id
    #[error("Sealed file not found: {0}")]
    NotFound(String),

    /// A blob already exists for this id (immutability violation)
    #[error("Sealed file {0} already exists in storage")]
    FileAlreadyExists(String),

    /// Metadata sidecar could not be (de)serialised
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_yaml::Error),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FilesResult<T> = Result<T, FilesError>;
