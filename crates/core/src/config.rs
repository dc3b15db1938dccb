//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into [`crate::ClinicalVault`].
//! Nothing in the request path reads environment variables. The `*_from_env_value` helpers take
//! the raw `Option<String>` a binary got from the environment so they can be tested without
//! touching process-wide state.

use crate::constants::{DEFAULT_ARTIFACT_DIR, ENV_MASTER_KEY};
use crate::{ClinicalError, ClinicalResult};
use securemed_crypto::MasterKey;
use std::path::{Path, PathBuf};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    artifact_dir: PathBuf,
    audit_log: Option<PathBuf>,
    assignments_file: Option<PathBuf>,
    master_key: MasterKey,
}

impl CoreConfig {
    pub fn new(
        artifact_dir: PathBuf,
        audit_log: Option<PathBuf>,
        assignments_file: Option<PathBuf>,
        master_key: MasterKey,
    ) -> Self {
        Self {
            artifact_dir,
            audit_log,
            assignments_file,
            master_key,
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// JSON-lines audit log. `None` keeps the trail in memory.
    pub fn audit_log(&self) -> Option<&Path> {
        self.audit_log.as_deref()
    }

    pub fn assignments_file(&self) -> Option<&Path> {
        self.assignments_file.as_deref()
    }

    pub fn master_key(&self) -> &MasterKey {
        &self.master_key
    }
}

/// Parse the master key from an optional environment value.
///
/// # Errors
///
/// Returns `ClinicalError::Configuration` if the value is missing, blank, not hex, or does not
/// decode to exactly 32 bytes. The key itself never appears in the message.
pub fn master_key_from_env_value(value: Option<String>) -> ClinicalResult<MasterKey> {
    let value = non_blank(value).ok_or_else(|| {
        ClinicalError::Configuration(format!("{} must be set", ENV_MASTER_KEY))
    })?;
    Ok(MasterKey::from_hex(&value)?)
}

/// Artifact directory from an optional environment value, defaulting to `artifact_data`.
pub fn artifact_dir_from_env_value(value: Option<String>) -> PathBuf {
    non_blank(value)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_DIR))
}

/// An optional path setting; blank counts as unset.
pub fn optional_path_from_env_value(value: Option<String>) -> Option<PathBuf> {
    non_blank(value).map(PathBuf::from)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_master_key_is_configuration_error() {
        let err = master_key_from_env_value(None).unwrap_err();
        assert!(matches!(err, ClinicalError::Configuration(_)));
        assert!(err.to_string().contains("SECUREMED_MASTER_KEY"));

        assert!(master_key_from_env_value(Some("   ".into())).is_err());
    }

    #[test]
    fn short_master_key_is_rejected() {
        let err = master_key_from_env_value(Some("abcd".into())).unwrap_err();
        assert!(matches!(err, ClinicalError::Configuration(_)));
        assert!(!err.to_string().contains("abcd"));
    }

    #[test]
    fn valid_master_key_is_accepted() {
        let hex = "11".repeat(32);
        let key = master_key_from_env_value(Some(format!(" {} ", hex))).unwrap();
        assert_eq!(key.to_hex(), hex);
    }

    #[test]
    fn artifact_dir_defaults() {
        assert_eq!(artifact_dir_from_env_value(None), PathBuf::from("artifact_data"));
        assert_eq!(artifact_dir_from_env_value(Some("".into())), PathBuf::from("artifact_data"));
        assert_eq!(
            artifact_dir_from_env_value(Some("/srv/blobs".into())),
            PathBuf::from("/srv/blobs")
        );
        assert_eq!(optional_path_from_env_value(Some("  ".into())), None);
    }
}
