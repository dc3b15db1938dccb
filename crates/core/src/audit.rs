//! Append-only audit trail.
//!
//! Every component records its outcome here after it has decided it, failures and denials
//! included. Records are immutable once written. Two sinks exist: [`MemoryAuditSink`] for tests
//! and development, and [`JsonlAuditSink`] which appends one JSON object per line to a file.

use crate::actor::{Actor, Capability, Role};
use crate::error::ClinicalResult;
use crate::ids::AuditRecordId;
use crate::lock;
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Result of the action an audit record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failure,
    Partial,
}

/// Action codes written to the trail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    OrderCreated,
    OrderViewed,
    OrderCollected,
    OrderCancelled,
    OrderCompleted,
    ArtifactStored,
    ArtifactUploadRejected,
    ArtifactRetrieved,
    ArtifactTamperDetected,
    ArtifactsListed,
    WorklistViewed,
    ResultSubmitted,
    CriticalAlertSent,
    CriticalAlertFailed,
    BreakGlassAccess,
    PatientReferred,
    AdminGrantAccess,
    GrantAccepted,
    GrantDeclined,
    GrantCompleted,
    GrantExtended,
    GrantRevoked,
    AdminRevokeAccess,
    GrantAutoExpired,
    AccessChecked,
    AuditTrailViewed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Order,
    Artifact,
    Worklist,
    TestResult,
    Grant,
    Patient,
    AuditTrail,
}

/// One immutable entry in the trail.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AuditRecord {
    pub id: AuditRecordId,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub actor_name: String,
    pub actor_role: Role,
    pub action: AuditAction,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub detail: serde_json::Value,
    pub outcome: AuditOutcome,
}

/// Storage behind an [`AuditTrail`].
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &AuditRecord) -> ClinicalResult<()>;

    /// Every record, oldest first.
    fn load(&self) -> ClinicalResult<Vec<AuditRecord>>;
}

#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, record: &AuditRecord) -> ClinicalResult<()> {
        lock(&self.records).push(record.clone());
        Ok(())
    }

    fn load(&self) -> ClinicalResult<Vec<AuditRecord>> {
        Ok(lock(&self.records).clone())
    }
}

/// Memory sink whose writes can be switched off.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FlakyAuditSink {
    inner: MemoryAuditSink,
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl FlakyAuditSink {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl AuditSink for FlakyAuditSink {
    fn append(&self, record: &AuditRecord) -> ClinicalResult<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(std::io::Error::other("audit log unavailable").into());
        }
        self.inner.append(record)
    }

    fn load(&self) -> ClinicalResult<Vec<AuditRecord>> {
        self.inner.load()
    }
}

/// Appends records as JSON lines to a file opened in append mode.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditSink {
    /// Opens (creating if needed) the log at `path`. Parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns `ClinicalError::Io` if the file or its parent directory cannot be created.
    pub fn open(path: &Path) -> ClinicalResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, record: &AuditRecord) -> ClinicalResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = lock(&self.file);
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    fn load(&self) -> ClinicalResult<Vec<AuditRecord>> {
        let _guard = lock(&self.file);
        read_jsonl(&self.path)
    }
}

/// Reads a JSON-lines audit log. Blank lines are skipped.
pub fn read_jsonl(path: &Path) -> ClinicalResult<Vec<AuditRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}

/// Narrows an audit trail query. Empty fields match everything.
#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    pub resource_type: Option<ResourceType>,
    pub resource_id: Option<String>,
    pub action: Option<AuditAction>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    fn matches(&self, record: &AuditRecord) -> bool {
        self.resource_type.map_or(true, |t| t == record.resource_type)
            && self
                .resource_id
                .as_deref()
                .map_or(true, |id| id == record.resource_id)
            && self.action.map_or(true, |a| a == record.action)
    }
}

/// Front door to the audit sink shared by every service.
#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryAuditSink::new()))
    }

    /// Writes one record, timestamped now.
    ///
    /// # Errors
    ///
    /// Propagates sink failures. Callers treat a failed audit write as a failed operation.
    pub fn record(
        &self,
        actor: &Actor,
        action: AuditAction,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        detail: serde_json::Value,
        outcome: AuditOutcome,
    ) -> ClinicalResult<AuditRecord> {
        let record = AuditRecord {
            id: AuditRecordId::new(),
            timestamp: Utc::now(),
            actor_id: actor.id.to_string(),
            actor_name: actor.name.to_string(),
            actor_role: actor.role,
            action,
            resource_type,
            resource_id: resource_id.into(),
            detail,
            outcome,
        };
        self.sink.append(&record)?;
        tracing::debug!(
            action = ?record.action,
            outcome = ?record.outcome,
            actor = %record.actor_id,
            resource = %record.resource_id,
            "audit record written"
        );
        Ok(record)
    }

    /// Reads the trail, newest first. Admins only; the read itself is audited.
    pub fn query(&self, actor: &Actor, filter: &AuditFilter) -> ClinicalResult<Vec<AuditRecord>> {
        if let Err(err) = actor.require(Capability::ReadAuditTrail) {
            self.record(
                actor,
                AuditAction::AuditTrailViewed,
                ResourceType::AuditTrail,
                "*",
                serde_json::Value::Null,
                AuditOutcome::Denied,
            )?;
            return Err(err);
        }

        let mut records: Vec<AuditRecord> = self
            .sink
            .load()?
            .into_iter()
            .rev()
            .filter(|r| filter.matches(r))
            .collect();
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }

        self.record(
            actor,
            AuditAction::AuditTrailViewed,
            ResourceType::AuditTrail,
            filter.resource_id.as_deref().unwrap_or("*"),
            serde_json::json!({ "returned": records.len() }),
            AuditOutcome::Success,
        )?;
        Ok(records)
    }

    /// Every record in write order, without an access check. For in-crate tests and tooling.
    pub fn all(&self) -> ClinicalResult<Vec<AuditRecord>> {
        self.sink.load()
    }
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClinicalError;
    use tempfile::TempDir;

    fn admin() -> Actor {
        Actor::new("adm-1", "Ada Admin", Role::Admin).unwrap()
    }

    fn clinician() -> Actor {
        Actor::new("dr-1", "Dr Who", Role::Clinician).unwrap()
    }

    #[test]
    fn records_are_returned_newest_first_and_filtered() {
        let trail = AuditTrail::in_memory();
        let dr = clinician();
        trail
            .record(&dr, AuditAction::OrderCreated, ResourceType::Order, "o-1",
                serde_json::Value::Null, AuditOutcome::Success)
            .unwrap();
        trail
            .record(&dr, AuditAction::OrderCreated, ResourceType::Order, "o-2",
                serde_json::Value::Null, AuditOutcome::Success)
            .unwrap();

        let all = trail.query(&admin(), &AuditFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].resource_id, "o-2");

        let filter = AuditFilter {
            resource_id: Some("o-1".into()),
            ..AuditFilter::default()
        };
        let only = trail.query(&admin(), &filter).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].actor_name, "Dr Who");
    }

    #[test]
    fn non_admin_query_is_denied_and_audited() {
        let trail = AuditTrail::in_memory();
        let result = trail.query(&clinician(), &AuditFilter::default());
        assert!(matches!(result, Err(ClinicalError::AccessDenied(_))));

        let all = trail.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].outcome, AuditOutcome::Denied);
        assert_eq!(all[0].action, AuditAction::AuditTrailViewed);
    }

    #[test]
    fn jsonl_sink_appends_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logs").join("audit.jsonl");

        {
            let trail = AuditTrail::new(Arc::new(JsonlAuditSink::open(&path).unwrap()));
            trail
                .record(&clinician(), AuditAction::BreakGlassAccess, ResourceType::Patient,
                    "p-1", serde_json::json!({"justification": "cardiac arrest"}),
                    AuditOutcome::Success)
                .unwrap();
        }

        let trail = AuditTrail::new(Arc::new(JsonlAuditSink::open(&path).unwrap()));
        trail
            .record(&clinician(), AuditAction::GrantRevoked, ResourceType::Grant, "g-1",
                serde_json::Value::Null, AuditOutcome::Success)
            .unwrap();

        let records = read_jsonl(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].action, AuditAction::BreakGlassAccess);
        assert_eq!(records[0].detail["justification"], "cardiac arrest");

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"BREAK_GLASS_ACCESS\""));
        assert!(raw.contains("\"SUCCESS\""));
    }
}
