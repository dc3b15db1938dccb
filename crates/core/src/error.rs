use securemed_crypto::CryptoError;
use securemed_files::FilesError;
use securemed_types::TextError;
use securemed_uuid::UuidError;

/// Every failure a core operation can report.
///
/// The first six variants are the error taxonomy callers are expected to branch on (see
/// [`ClinicalError::kind`]); the rest are infrastructure failures that surface as internal
/// errors.
#[derive(Debug, thiserror::Error)]
pub enum ClinicalError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("encryption failed")]
    Encryption,

    #[error("file storage error: {0}")]
    Files(FilesError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to (de)serialize YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Coarse classification used by API layers to choose a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Integrity,
    AccessDenied,
    NotFound,
    Conflict,
    Configuration,
    Internal,
}

impl ClinicalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Encryption
            | Self::Files(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Yaml(_) => ErrorKind::Internal,
        }
    }
}

impl From<CryptoError> for ClinicalError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKey(msg) => Self::Configuration(msg),
            CryptoError::Integrity(failure) => Self::Integrity(failure.to_string()),
            CryptoError::Encryption => Self::Encryption,
        }
    }
}

impl From<FilesError> for ClinicalError {
    fn from(err: FilesError) -> Self {
        match err {
            FilesError::UnsupportedFileType(msg) => Self::Validation(msg),
            FilesError::NotFound(id) => Self::NotFound(format!("sealed artifact {}", id)),
            FilesError::InvalidRootDirectory(msg) => Self::Configuration(msg),
            other => Self::Files(other),
        }
    }
}

impl From<TextError> for ClinicalError {
    fn from(err: TextError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<UuidError> for ClinicalError {
    fn from(err: UuidError) -> Self {
        Self::Validation(err.to_string())
    }
}

pub type ClinicalResult<T> = std::result::Result<T, ClinicalError>;
