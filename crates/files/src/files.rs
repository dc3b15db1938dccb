//! Sealed artifact storage.
//!
//! [`SealedFileStore`] writes already-encrypted artifact bytes to disk, one directory per
//! artifact id, together with a YAML metadata sidecar. It never handles plaintext and never
//! holds a key; encryption happens in the caller before [`SealedFileStore::put`].
//!
//! # Storage Layout
//!
//! ```text
//! <root>/
//! └── <s1>/<s2>/<artifact_id>/
//!     ├── sealed.bin
//!     └── metadata.yaml
//! ```
//!
//! # Implementation Notes
//!
//! - The root directory is validated and canonicalised at construction time
//! - Artifact directories are created on first write
//! - A second write for the same id is refused, so stored blobs are immutable

use crate::constants::{HASH_ALGORITHM, METADATA_FILENAME, SEALED_BLOB_FILENAME};
use crate::validator::FileKind;
use crate::{FilesError, FilesResult};
use chrono::{DateTime, Utc};
use securemed_types::{NonEmptyText, Sha256Hash};
use securemed_uuid::ShardableUuid;
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata for a stored sealed artifact.
///
/// Serialised to `metadata.yaml` beside the blob. It describes the plaintext (hash, kind, size)
/// without including any patient or clinical identifiers.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct FileMetadata {
    /// Artifact identifier, also the leaf directory name
    pub artifact_id: ShardableUuid,

    /// Hashing algorithm used (always "sha256" for current implementation)
    pub hash_algorithm: NonEmptyText,

    /// Hexadecimal digest of the *plaintext*
    pub content_hash: Sha256Hash,

    /// Detected file kind of the plaintext
    pub kind: FileKind,

    /// Size of the plaintext in bytes
    pub plaintext_bytes: u64,

    /// Size of the sealed blob on disk in bytes
    pub sealed_bytes: u64,

    /// Path of the sealed blob relative to the store root
    pub relative_path: NonEmptyText,

    /// UTC timestamp when the blob was stored
    pub stored_at: DateTime<Utc>,
}

/// Write-once store for sealed artifact blobs.
#[derive(Debug, Clone)]
pub struct SealedFileStore {
    root_directory: PathBuf,
}

impl SealedFileStore {
    /// Opens a store rooted at an existing directory.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::InvalidRootDirectory` if the directory does not exist, is not a
    /// directory, or cannot be canonicalised.
    pub fn new(root_directory: &Path) -> FilesResult<Self> {
        if !root_directory.exists() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Directory does not exist: {}",
                root_directory.display()
            )));
        }

        if !root_directory.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root_directory.display()
            )));
        }

        let root_directory = root_directory.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root_directory.display(),
                e
            ))
        })?;

        Ok(Self { root_directory })
    }

    /// Stores a sealed blob and its metadata.
    ///
    /// # Arguments
    ///
    /// * `artifact_id` - identifier the blob will be stored under
    /// * `sealed` - encrypted bytes in `nonce || tag || ciphertext` layout
    /// * `content_hash` - SHA-256 of the plaintext the blob was sealed from
    /// * `kind` - validated kind of that plaintext
    /// * `plaintext_bytes` - size of that plaintext
    ///
    /// # Errors
    ///
    /// Returns `FilesError::FileAlreadyExists` if the id is already used, or an I/O or YAML
    /// error if writing fails. On a failed write the partially created directory is removed.
    pub fn put(
        &self,
        artifact_id: ShardableUuid,
        sealed: &[u8],
        content_hash: Sha256Hash,
        kind: FileKind,
        plaintext_bytes: u64,
    ) -> FilesResult<FileMetadata> {
        let artifact_dir = self.artifact_dir(&artifact_id);
        if artifact_dir.exists() {
            return Err(FilesError::FileAlreadyExists(artifact_id.to_string()));
        }

        let metadata = FileMetadata {
            artifact_id,
            hash_algorithm: NonEmptyText::new(HASH_ALGORITHM)
                .map_err(|e| FilesError::Io(std::io::Error::other(e)))?,
            content_hash,
            kind,
            plaintext_bytes,
            sealed_bytes: sealed.len() as u64,
            relative_path: self.relative_blob_path(&artifact_id)?,
            stored_at: Utc::now(),
        };

        fs::create_dir_all(&artifact_dir).map_err(|e| {
            FilesError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create artifact directory {}: {}",
                    artifact_dir.display(),
                    e
                ),
            ))
        })?;

        if let Err(e) = self.write_files(&artifact_dir, sealed, &metadata) {
            // Leave no half-written artifact behind; the original error is what matters.
            let _ = fs::remove_dir_all(&artifact_dir);
            return Err(e);
        }

        Ok(metadata)
    }

    fn write_files(
        &self,
        artifact_dir: &Path,
        sealed: &[u8],
        metadata: &FileMetadata,
    ) -> FilesResult<()> {
        let blob_path = artifact_dir.join(SEALED_BLOB_FILENAME);
        fs::write(&blob_path, sealed).map_err(|e| {
            FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write sealed blob to {}: {}", blob_path.display(), e),
            ))
        })?;

        let yaml = serde_yaml::to_string(metadata)?;
        fs::write(artifact_dir.join(METADATA_FILENAME), yaml)?;
        Ok(())
    }

    /// Reads the sealed bytes for an artifact.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::NotFound` if nothing is stored under the id.
    pub fn read_sealed(&self, artifact_id: &ShardableUuid) -> FilesResult<Vec<u8>> {
        let blob_path = self.artifact_dir(artifact_id).join(SEALED_BLOB_FILENAME);
        if !blob_path.is_file() {
            return Err(FilesError::NotFound(artifact_id.to_string()));
        }

        fs::read(&blob_path).map_err(|e| {
            FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read sealed blob from {}: {}", blob_path.display(), e),
            ))
        })
    }

    /// Reads the metadata sidecar for an artifact.
    pub fn read_metadata(&self, artifact_id: &ShardableUuid) -> FilesResult<FileMetadata> {
        let path = self.artifact_dir(artifact_id).join(METADATA_FILENAME);
        if !path.is_file() {
            return Err(FilesError::NotFound(artifact_id.to_string()));
        }
        let yaml = fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&yaml)?)
    }

    /// Deletes everything stored under an artifact id.
    ///
    /// Only for undoing a `put` whose surrounding operation failed; stored artifacts are
    /// otherwise immutable.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::NotFound` if nothing is stored under the id.
    pub fn remove(&self, artifact_id: &ShardableUuid) -> FilesResult<()> {
        let artifact_dir = self.artifact_dir(artifact_id);
        if !artifact_dir.is_dir() {
            return Err(FilesError::NotFound(artifact_id.to_string()));
        }
        fs::remove_dir_all(&artifact_dir).map_err(|e| {
            FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to remove {}: {}", artifact_dir.display(), e),
            ))
        })
    }

    pub fn exists(&self, artifact_id: &ShardableUuid) -> bool {
        self.artifact_dir(artifact_id)
            .join(SEALED_BLOB_FILENAME)
            .is_file()
    }

    #[must_use]
    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    fn artifact_dir(&self, artifact_id: &ShardableUuid) -> PathBuf {
        artifact_id.sharded_dir(&self.root_directory)
    }

    fn relative_blob_path(&self, artifact_id: &ShardableUuid) -> FilesResult<NonEmptyText> {
        let relative = artifact_id
            .sharded_dir(Path::new(""))
            .join(SEALED_BLOB_FILENAME);
        NonEmptyText::new(relative.to_string_lossy())
            .map_err(|e| FilesError::Io(std::io::Error::other(e)))
    }
}
