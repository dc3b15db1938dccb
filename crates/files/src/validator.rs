//! Signature sniffing and content hashing for uploaded clinical files.

use crate::constants::{
    DICOM_MAGIC, DICOM_PREAMBLE_LEN, JPEG_MAGIC, PDF_MAGIC, PNG_MAGIC,
};
use crate::FilesError;
use sha2::{Digest, Sha256};
use securemed_types::Sha256Hash;

/// Accepted clinical file kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileKind {
    Pdf,
    Jpeg,
    Png,
    Dicom,
}

impl FileKind {
    /// IANA media type for the kind.
    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Dicom => "application/dicom",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Dicom => "dcm",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.media_type())
    }
}

/// Decides the file kind from its leading bytes.
///
/// The exact signatures decide the kind. A general sniff of the same bytes must not name a
/// different type, so a DICOM preamble carrying another format's header is refused.
///
/// # Errors
///
/// Returns [`FilesError::UnsupportedFileType`] for anything that is not PDF, JPEG, PNG or DICOM.
pub fn validate(bytes: &[u8]) -> Result<FileKind, FilesError> {
    let Some(kind) = signature_kind(bytes) else {
        let shown = bytes.len().min(8);
        return Err(FilesError::UnsupportedFileType(format!(
            "leading bytes {} match no accepted signature",
            hex::encode(&bytes[..shown])
        )));
    };

    match sniff_media_type(bytes) {
        Some(sniffed) if sniffed != kind.media_type() => {
            Err(FilesError::UnsupportedFileType(format!(
                "{} signature but content sniffs as {}",
                kind, sniffed
            )))
        }
        _ => Ok(kind),
    }
}

/// Best-effort media type of arbitrary bytes, `None` when nothing is recognised.
pub fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes).map(|t| t.mime_type())
}

fn signature_kind(bytes: &[u8]) -> Option<FileKind> {
    if bytes.starts_with(PDF_MAGIC) {
        return Some(FileKind::Pdf);
    }
    if bytes.starts_with(PNG_MAGIC) {
        return Some(FileKind::Png);
    }
    if bytes.starts_with(JPEG_MAGIC) {
        return Some(FileKind::Jpeg);
    }
    let dicom = DICOM_PREAMBLE_LEN..DICOM_PREAMBLE_LEN + DICOM_MAGIC.len();
    if bytes.get(dicom) == Some(DICOM_MAGIC) {
        return Some(FileKind::Dicom);
    }
    None
}

/// SHA-256 digest of the plaintext.
pub fn hash_content(bytes: &[u8]) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest: [u8; 32] = hasher.finalize().into();
    Sha256Hash::from_bytes(&digest)
}
