//! File names and signature constants.

/// Name of the sealed blob inside an artifact directory.
pub const SEALED_BLOB_FILENAME: &str = "sealed.bin";

/// Name of the YAML metadata sidecar inside an artifact directory.
pub const METADATA_FILENAME: &str = "metadata.yaml";

/// Hashing algorithm recorded in metadata.
pub(crate) const HASH_ALGORITHM: &str = "sha256";

pub(crate) const PDF_MAGIC: &[u8] = b"%PDF";
pub(crate) const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
pub(crate) const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// DICOM Part 10 files start with a 128-byte preamble followed by `DICM`.
pub(crate) const DICOM_PREAMBLE_LEN: usize = 128;
pub(crate) const DICOM_MAGIC: &[u8] = b"DICM";
