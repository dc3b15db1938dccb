//! Wiring of the core services.
//!
//! [`ClinicalVault`] owns one of each service, all sharing the same audit trail and grant
//! manager. API layers hold it behind an `Arc` and call straight into its fields.

use crate::artifacts::ArtifactStore;
use crate::assignments::{AssignmentDirectory, StaticAssignments};
use crate::audit::{AuditSink, AuditTrail, JsonlAuditSink, MemoryAuditSink};
use crate::config::CoreConfig;
use crate::error::ClinicalResult;
use crate::grants::GrantManager;
use crate::notify::NotificationPort;
use crate::orders::OrderBook;
use crate::worklist::Worklist;
use securemed_crypto::CryptoCodec;
use securemed_files::SealedFileStore;
use std::sync::Arc;

#[derive(Debug)]
pub struct ClinicalVault {
    pub audit: AuditTrail,
    pub grants: Arc<GrantManager>,
    pub orders: Arc<OrderBook>,
    pub worklist: Worklist,
    pub artifacts: ArtifactStore,
}

impl ClinicalVault {
    /// Builds every service from startup configuration.
    ///
    /// Creates the artifact directory if missing, opens the JSON-lines audit log when one is
    /// configured, and loads primary clinician assignments when a file is given.
    ///
    /// # Errors
    ///
    /// Returns `ClinicalError::Io` or `ClinicalError::Configuration` if the artifact directory
    /// or audit log cannot be opened, and `ClinicalError::Yaml` for a malformed assignments file.
    pub fn open(config: &CoreConfig, notifier: Arc<dyn NotificationPort>) -> ClinicalResult<Self> {
        std::fs::create_dir_all(config.artifact_dir())?;
        let files = SealedFileStore::new(config.artifact_dir())?;

        let sink: Arc<dyn AuditSink> = match config.audit_log() {
            Some(path) => Arc::new(JsonlAuditSink::open(path)?),
            None => Arc::new(MemoryAuditSink::new()),
        };

        let assignments: Arc<dyn AssignmentDirectory> = match config.assignments_file() {
            Some(path) => Arc::new(StaticAssignments::from_yaml_file(path)?),
            None => Arc::new(StaticAssignments::default()),
        };

        let vault = Self::from_parts(
            files,
            CryptoCodec::new(config.master_key()),
            AuditTrail::new(sink),
            assignments,
            notifier,
        );
        tracing::info!(
            artifact_dir = %config.artifact_dir().display(),
            audit_log = ?config.audit_log(),
            "clinical vault opened"
        );
        Ok(vault)
    }

    pub fn from_parts(
        files: SealedFileStore,
        codec: CryptoCodec,
        audit: AuditTrail,
        assignments: Arc<dyn AssignmentDirectory>,
        notifier: Arc<dyn NotificationPort>,
    ) -> Self {
        let grants = Arc::new(GrantManager::new(assignments, audit.clone()));
        let orders = Arc::new(OrderBook::new(grants.clone(), audit.clone()));
        let worklist = Worklist::new(orders.clone(), audit.clone(), notifier.clone());
        let artifacts = ArtifactStore::new(
            files,
            codec,
            orders.clone(),
            grants.clone(),
            audit.clone(),
            notifier,
        );
        Self {
            audit,
            grants,
            orders,
            worklist,
            artifacts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Actor, Role};
    use crate::artifacts::ArtifactUpload;
    use crate::audit::read_jsonl;
    use crate::grants::GrantRequest;
    use crate::notify::{MemoryNotifier, Recipient};
    use crate::orders::tests::new_order;
    use crate::orders::{OrderStatus, Priority};
    use crate::ids::TestCode;
    use crate::worklist::ResultSubmission;
    use securemed_crypto::MasterKey;
    use tempfile::TempDir;

    #[test]
    fn open_creates_directories_and_writes_jsonl_audit() {
        let temp = TempDir::new().unwrap();
        let config = CoreConfig::new(
            temp.path().join("blobs"),
            Some(temp.path().join("audit").join("trail.jsonl")),
            None,
            MasterKey::generate(),
        );
        let vault = ClinicalVault::open(&config, Arc::new(MemoryNotifier::new())).unwrap();
        assert!(temp.path().join("blobs").is_dir());

        let dr = Actor::new("dr-1", "Dr One", Role::Clinician).unwrap();
        vault
            .grants
            .create(&dr, GrantRequest::break_glass(crate::ids::PatientRef::new("p-1").unwrap(), "arrest"))
            .unwrap();

        let records = read_jsonl(&temp.path().join("audit").join("trail.jsonl")).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn assignments_file_grants_primary_clinician_access() {
        let temp = TempDir::new().unwrap();
        let assignments = temp.path().join("assignments.yaml");
        std::fs::write(&assignments, "- clinician: dr-7\n  patient: p-1\n").unwrap();
        let config = CoreConfig::new(
            temp.path().join("blobs"),
            None,
            Some(assignments),
            MasterKey::generate(),
        );
        let vault = ClinicalVault::open(&config, Arc::new(MemoryNotifier::new())).unwrap();

        let gp = Actor::new("dr-7", "Dr Seven", Role::Clinician).unwrap();
        assert!(vault
            .grants
            .check_access(&gp.id, &crate::ids::PatientRef::new("p-1").unwrap())
            .unwrap());
    }

    #[test]
    fn lab_flow_from_order_to_completed_result() {
        let temp = TempDir::new().unwrap();
        let config = CoreConfig::new(temp.path().join("blobs"), None, None, MasterKey::generate());
        let notifier = Arc::new(MemoryNotifier::new());
        let vault = ClinicalVault::open(&config, notifier.clone()).unwrap();

        let dr = Actor::new("dr-1", "Dr One", Role::Clinician).unwrap();
        let tech = Actor::new("t-1", "Tech One", Role::Technician).unwrap();

        let order = vault
            .orders
            .create(&dr, new_order("p-1", &["CBC"], Priority::Stat))
            .unwrap();
        vault.orders.mark_collected(&tech, &order.id).unwrap();

        let artifact = vault
            .artifacts
            .store(
                &tech,
                ArtifactUpload {
                    order_id: order.id,
                    test_code: Some(TestCode::new("CBC").unwrap()),
                    content: b"\x89PNG\r\n\x1a\nrest-of-image".to_vec(),
                    abnormal: false,
                    critical: false,
                    comments: Some("scan attached".into()),
                },
            )
            .unwrap();

        let submitted = vault
            .worklist
            .submit_result(
                &tech,
                ResultSubmission {
                    order_id: order.id,
                    test_code: TestCode::new("CBC").unwrap(),
                    value: "13.2".into(),
                    reference_range: Some("12-16".into()),
                    units: Some("g/dL".into()),
                    flag: None,
                    notes: None,
                },
            )
            .unwrap();
        assert_eq!(submitted.status, OrderStatus::Completed);
        assert!(vault.worklist.list_pending(&tech).unwrap().is_empty());

        let retrieved = vault.artifacts.retrieve(&dr, &artifact.id).unwrap();
        assert!(retrieved.integrity_verified);
        let recipients: Vec<_> = notifier.sent().into_iter().map(|(to, _)| to).collect();
        assert_eq!(
            recipients,
            vec![
                Recipient::Clinician(dr.id.clone()),
                Recipient::Clinician(dr.id.clone()),
                Recipient::Patient(order.patient.clone()),
            ]
        );
    }
}
