//! Constants used throughout the SecureMed core crate.
//!
//! Grant lifetimes, listing bounds and environment variable names live here so every module
//! agrees on them.

/// Default directory for sealed artifact storage when none is configured.
pub const DEFAULT_ARTIFACT_DIR: &str = "artifact_data";

/// Break-glass sessions last one hour unless a shorter TTL is requested.
pub const BREAK_GLASS_TTL_HOURS: i64 = 1;

/// Default lifetime of a referral.
pub const REFERRAL_TTL_DAYS: i64 = 30;

/// Default lifetime of an administrative grant.
pub const ADMIN_GRANT_TTL_DAYS: i64 = 90;

/// Upper bound accepted by grant extension requests.
pub const MAX_EXTENSION_DAYS: i64 = 365;

/// Number of inactive grants returned alongside active ones in "my patients".
pub const RECENT_INACTIVE_GRANT_LIMIT: usize = 10;

/// Justifications, reasons and comments are capped at this many characters.
pub const MAX_FREE_TEXT_LEN: usize = 2_000;

/// Prefix for synthetic laboratory sample identifiers.
pub const SAMPLE_ID_PREFIX: &str = "SMP-";

/// Actor id used for automatic, system-attributed transitions.
pub const SYSTEM_ACTOR_ID: &str = "SYSTEM";

/// Display name used for automatic, system-attributed transitions.
pub const SYSTEM_ACTOR_NAME: &str = "Auto-Revoke Service";

/// Hex-encoded 256-bit master key.
pub const ENV_MASTER_KEY: &str = "SECUREMED_MASTER_KEY";

/// Directory holding sealed artifact blobs.
pub const ENV_ARTIFACT_DIR: &str = "SECUREMED_ARTIFACT_DIR";

/// Optional JSON-lines audit log path.
pub const ENV_AUDIT_LOG: &str = "SECUREMED_AUDIT_LOG";

/// Optional YAML file of primary clinician assignments.
pub const ENV_ASSIGNMENTS_FILE: &str = "SECUREMED_ASSIGNMENTS_FILE";
