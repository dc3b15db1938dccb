//! Encrypted result artifacts.
//!
//! An artifact is one result file (a report PDF, a scan, a DICOM image) attached to an order.
//! The store validates the file signature, hashes the plaintext, seals it with the master key and
//! hands only the sealed bytes to [`SealedFileStore`]. Plaintext is rebuilt on each retrieval and
//! checked against the stored hash before it is returned.

use crate::actor::{Actor, Capability};
use crate::audit::{AuditAction, AuditOutcome, AuditTrail, ResourceType};
use crate::error::{ClinicalError, ClinicalResult};
use crate::grants::GrantManager;
use crate::ids::{ActorId, ArtifactId, OrderId, PatientRef, TestCode};
use crate::notify::{dispatch_critical_alert, notify_results_available, NotificationPort};
use crate::orders::OrderBook;
use crate::validation::optional_text;
use chrono::{DateTime, Utc};
use securemed_crypto::{CryptoCodec, SealedBlob};
use securemed_files::{hash_content, validate, FileKind, FilesError, SealedFileStore};
use securemed_types::Sha256Hash;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

const NOT_AVAILABLE: &str = "artifact not available";

/// Metadata of a stored artifact. Never carries ciphertext or plaintext.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResultArtifact {
    pub id: ArtifactId,
    pub order_id: OrderId,
    pub test_code: Option<TestCode>,
    pub content_hash: Sha256Hash,
    pub kind: FileKind,
    pub size_bytes: u64,
    pub abnormal: bool,
    /// Set at upload; nothing clears it.
    pub critical: bool,
    pub technician: ActorId,
    pub comments: Option<String>,
    pub verified_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct ArtifactUpload {
    pub order_id: OrderId,
    pub test_code: Option<TestCode>,
    pub content: Vec<u8>,
    pub abnormal: bool,
    pub critical: bool,
    pub comments: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RetrievedArtifact {
    pub artifact: ResultArtifact,
    pub plaintext: Vec<u8>,
    /// The decrypted bytes hash to the digest recorded at upload.
    pub integrity_verified: bool,
}

pub struct ArtifactStore {
    files: SealedFileStore,
    codec: CryptoCodec,
    orders: Arc<OrderBook>,
    grants: Arc<GrantManager>,
    audit: AuditTrail,
    notifier: Arc<dyn NotificationPort>,
    index: RwLock<HashMap<ArtifactId, ResultArtifact>>,
}

impl ArtifactStore {
    pub fn new(
        files: SealedFileStore,
        codec: CryptoCodec,
        orders: Arc<OrderBook>,
        grants: Arc<GrantManager>,
        audit: AuditTrail,
        notifier: Arc<dyn NotificationPort>,
    ) -> Self {
        Self {
            files,
            codec,
            orders,
            grants,
            audit,
            notifier,
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Validates, seals and stores an uploaded result file.
    ///
    /// The parent order moves to `PROCESSING` if it was `ORDERED` or `COLLECTED`. Nothing becomes
    /// visible until the upload is audited; a failed audit write removes the blob again. The
    /// ordering clinician is told the result is available, and a critical upload also raises an
    /// urgent alert.
    ///
    /// # Errors
    ///
    /// * `AccessDenied` - the actor is not lab staff
    /// * `Validation` - unrecognised file signature, unrequested test code, or bad comments
    /// * `Conflict` - the order is cancelled
    /// * `NotFound` - unknown order
    pub fn store(&self, actor: &Actor, upload: ArtifactUpload) -> ClinicalResult<ResultArtifact> {
        let order_id = upload.order_id;
        let declared_bytes = upload.content.len();

        let (artifact, sample_id, ordering_clinician) = match self.seal_and_store(actor, upload) {
            Ok(stored) => stored,
            Err(err) => {
                let outcome = match err {
                    ClinicalError::AccessDenied(_) => AuditOutcome::Denied,
                    _ => AuditOutcome::Failure,
                };
                tracing::warn!(order = %order_id, error = %err, "artifact upload rejected");
                self.audit.record(
                    actor,
                    AuditAction::ArtifactUploadRejected,
                    ResourceType::Order,
                    order_id.to_string(),
                    serde_json::json!({ "bytes": declared_bytes, "reason": err.to_string() }),
                    outcome,
                )?;
                return Err(err);
            }
        };

        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(artifact.id, artifact.clone());
        tracing::info!(artifact = %artifact.id, order = %order_id, kind = %artifact.kind, "artifact stored");

        notify_results_available(
            self.notifier.as_ref(),
            ordering_clinician.as_ref(),
            &sample_id,
            &format!("{} report uploaded", artifact.kind),
            artifact.abnormal,
        );
        if artifact.critical {
            dispatch_critical_alert(
                self.notifier.as_ref(),
                &self.audit,
                actor,
                &order_id,
                &sample_id,
                ordering_clinician.as_ref(),
                &format!("critical {} report uploaded", artifact.kind),
            )?;
        }

        Ok(artifact)
    }

    fn seal_and_store(
        &self,
        actor: &Actor,
        upload: ArtifactUpload,
    ) -> ClinicalResult<(ResultArtifact, String, Option<ActorId>)> {
        actor.require(Capability::ProcessSamples)?;
        let comments = optional_text("comments", upload.comments.as_deref())?;

        let kind = validate(&upload.content)?;
        let content_hash = hash_content(&upload.content);
        let sealed = self.codec.encrypt(&upload.content)?;
        let size_bytes = upload.content.len() as u64;

        let artifact = ResultArtifact {
            id: ArtifactId::new(),
            order_id: upload.order_id,
            test_code: upload.test_code,
            content_hash,
            kind,
            size_bytes,
            abnormal: upload.abnormal || upload.critical,
            critical: upload.critical,
            technician: actor.id.clone(),
            comments,
            verified_at: Utc::now(),
        };

        self.orders.with_order(&upload.order_id, |entry| {
            if entry.order.status == crate::orders::OrderStatus::Cancelled {
                return Err(ClinicalError::Conflict("order is cancelled".into()));
            }
            if let Some(code) = &artifact.test_code {
                if !entry.order.requests(code) {
                    return Err(ClinicalError::Validation(format!(
                        "test '{}' was not requested on this order",
                        code
                    )));
                }
            }

            self.files.put(
                artifact.id.into(),
                sealed.as_bytes(),
                artifact.content_hash.clone(),
                artifact.kind,
                size_bytes,
            )?;
            let recorded = self.audit.record(
                actor,
                AuditAction::ArtifactStored,
                ResourceType::Artifact,
                artifact.id.to_string(),
                serde_json::json!({
                    "order_id": artifact.order_id,
                    "sample_id": entry.order.sample_id,
                    "kind": artifact.kind,
                    "size_bytes": artifact.size_bytes,
                    "content_hash": artifact.content_hash,
                    "abnormal": artifact.abnormal,
                    "critical": artifact.critical,
                }),
                AuditOutcome::Success,
            );
            if let Err(err) = recorded {
                if let Err(cleanup) = self.files.remove(artifact.id.as_shardable()) {
                    tracing::error!(artifact = %artifact.id, error = %cleanup, "unaudited blob left on disk");
                }
                return Err(err);
            }
            entry.advance_to_processing(artifact.verified_at)?;

            Ok((
                artifact.clone(),
                entry.order.sample_id.clone(),
                entry.order.ordering_clinician.clone(),
            ))
        })
    }

    /// Decrypts an artifact for a reader.
    ///
    /// The reader must be the ordering clinician or pass the patient access check. Unknown ids
    /// and refusals return the same `AccessDenied`. A blob that fails authentication, or whose
    /// plaintext no longer matches the upload hash, returns `Integrity` and is audited as
    /// tampering. Every outcome is audited.
    pub fn retrieve(&self, actor: &Actor, id: &ArtifactId) -> ClinicalResult<RetrievedArtifact> {
        let Some(artifact) = self.readable(actor, id)? else {
            self.audit_retrieval(actor, id, AuditAction::ArtifactRetrieved, AuditOutcome::Denied,
                serde_json::Value::Null)?;
            tracing::warn!(actor = %actor.id, artifact = %id, "artifact retrieval denied");
            return Err(ClinicalError::AccessDenied(NOT_AVAILABLE.into()));
        };

        match self.unseal(&artifact) {
            Ok(plaintext) => {
                self.audit_retrieval(
                    actor,
                    id,
                    AuditAction::ArtifactRetrieved,
                    AuditOutcome::Success,
                    serde_json::json!({ "order_id": artifact.order_id, "integrity_verified": true }),
                )?;
                Ok(RetrievedArtifact {
                    artifact,
                    plaintext,
                    integrity_verified: true,
                })
            }
            Err(err) => {
                tracing::error!(artifact = %id, error = %err, "artifact failed integrity check");
                self.audit_retrieval(
                    actor,
                    id,
                    AuditAction::ArtifactTamperDetected,
                    AuditOutcome::Failure,
                    serde_json::json!({ "order_id": artifact.order_id, "reason": err.to_string() }),
                )?;
                Err(err)
            }
        }
    }

    fn unseal(&self, artifact: &ResultArtifact) -> ClinicalResult<Vec<u8>> {
        let blob_id = *artifact.id.as_shardable();
        let metadata = self.files.read_metadata(&blob_id).map_err(missing_is_integrity)?;
        if metadata.content_hash != artifact.content_hash {
            return Err(ClinicalError::Integrity("metadata hash does not match".into()));
        }

        let sealed = self.files.read_sealed(&blob_id).map_err(missing_is_integrity)?;
        let plaintext = self.codec.decrypt(&SealedBlob::from(sealed))?;
        if hash_content(&plaintext) != artifact.content_hash {
            return Err(ClinicalError::Integrity(
                "plaintext hash does not match upload".into(),
            ));
        }
        Ok(plaintext)
    }

    /// Metadata of every artifact on an order, under the same access rule as retrieval.
    pub fn list_for_order(
        &self,
        actor: &Actor,
        order_id: &OrderId,
    ) -> ClinicalResult<Vec<ResultArtifact>> {
        let allowed = match self.order_access(order_id) {
            Some((patient, owner)) => self.grants.can_read(actor, &patient, owner.as_ref())?,
            None => false,
        };

        if !allowed {
            self.audit.record(
                actor,
                AuditAction::ArtifactsListed,
                ResourceType::Order,
                order_id.to_string(),
                serde_json::Value::Null,
                AuditOutcome::Denied,
            )?;
            return Err(ClinicalError::AccessDenied(NOT_AVAILABLE.into()));
        }

        let mut artifacts: Vec<ResultArtifact> = self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|a| &a.order_id == order_id)
            .cloned()
            .collect();
        artifacts.sort_by_key(|a| a.verified_at);

        self.audit.record(
            actor,
            AuditAction::ArtifactsListed,
            ResourceType::Order,
            order_id.to_string(),
            serde_json::json!({ "count": artifacts.len() }),
            AuditOutcome::Success,
        )?;
        Ok(artifacts)
    }

    /// The artifact, if it exists and `actor` may read it.
    fn readable(&self, actor: &Actor, id: &ArtifactId) -> ClinicalResult<Option<ResultArtifact>> {
        let artifact = self
            .index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();
        let Some(artifact) = artifact else {
            return Ok(None);
        };
        let Some((patient, owner)) = self.order_access(&artifact.order_id) else {
            return Ok(None);
        };
        if self.grants.can_read(actor, &patient, owner.as_ref())? {
            Ok(Some(artifact))
        } else {
            Ok(None)
        }
    }

    fn order_access(&self, order_id: &OrderId) -> Option<(PatientRef, Option<ActorId>)> {
        self.orders
            .with_order(order_id, |entry| {
                Ok((
                    entry.order.patient.clone(),
                    entry.order.ordering_clinician.clone(),
                ))
            })
            .ok()
    }

    fn audit_retrieval(
        &self,
        actor: &Actor,
        id: &ArtifactId,
        action: AuditAction,
        outcome: AuditOutcome,
        detail: serde_json::Value,
    ) -> ClinicalResult<()> {
        self.audit
            .record(actor, action, ResourceType::Artifact, id.to_string(), detail, outcome)?;
        Ok(())
    }
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("root", &self.files.root_directory())
            .finish_non_exhaustive()
    }
}

/// A blob the index knows about but the disk does not is treated as tampering.
fn missing_is_integrity(err: FilesError) -> ClinicalError {
    match err {
        FilesError::NotFound(id) => ClinicalError::Integrity(format!("sealed blob {} is missing", id)),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Role;
    use crate::assignments::StaticAssignments;
    use crate::audit::FlakyAuditSink;
    use crate::grants::GrantRequest;
    use crate::notify::{MemoryNotifier, Recipient};
    use crate::orders::tests::new_order;
    use crate::orders::{ClinicalOrder, OrderStatus, Priority};
    use securemed_crypto::MasterKey;
    use securemed_files::SEALED_BLOB_FILENAME;
    use tempfile::TempDir;

    const PDF: &[u8] = b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj\n%%EOF";

    struct Fixture {
        _temp: TempDir,
        root: std::path::PathBuf,
        orders: Arc<OrderBook>,
        grants: Arc<GrantManager>,
        store: ArtifactStore,
        notifier: Arc<MemoryNotifier>,
        audit: AuditTrail,
    }

    fn fixture() -> Fixture {
        fixture_with(AuditTrail::in_memory())
    }

    fn fixture_with(audit: AuditTrail) -> Fixture {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("artifacts");
        std::fs::create_dir_all(&root).unwrap();

        let grants = Arc::new(GrantManager::new(
            Arc::new(StaticAssignments::default()),
            audit.clone(),
        ));
        let orders = Arc::new(OrderBook::new(grants.clone(), audit.clone()));
        let notifier = Arc::new(MemoryNotifier::new());
        let files = SealedFileStore::new(&root).unwrap();
        let store = ArtifactStore::new(
            files.clone(),
            CryptoCodec::new(&MasterKey::generate()),
            orders.clone(),
            grants.clone(),
            audit.clone(),
            notifier.clone(),
        );
        Fixture {
            _temp: temp,
            root: files.root_directory().to_path_buf(),
            orders,
            grants,
            store,
            notifier,
            audit,
        }
    }

    fn dr() -> Actor {
        Actor::new("dr-1", "Dr One", Role::Clinician).unwrap()
    }

    fn tech() -> Actor {
        Actor::new("t-1", "Tech One", Role::Technician).unwrap()
    }

    fn upload(order: &ClinicalOrder, content: &[u8]) -> ArtifactUpload {
        ArtifactUpload {
            order_id: order.id,
            test_code: None,
            content: content.to_vec(),
            abnormal: false,
            critical: false,
            comments: None,
        }
    }

    fn place_order(fx: &Fixture) -> ClinicalOrder {
        fx.orders
            .create(&dr(), new_order("p-1", &["CBC"], Priority::Routine))
            .unwrap()
    }

    #[test]
    fn store_then_retrieve_round_trips_and_advances_order() {
        let fx = fixture();
        let order = place_order(&fx);

        let artifact = fx.store.store(&tech(), upload(&order, PDF)).unwrap();
        assert_eq!(artifact.kind, FileKind::Pdf);
        assert_eq!(artifact.size_bytes, PDF.len() as u64);
        assert_eq!(artifact.content_hash, hash_content(PDF));

        let view = fx.orders.view(&dr(), &order.id).unwrap();
        assert_eq!(view.order.status, OrderStatus::Processing);

        let retrieved = fx.store.retrieve(&dr(), &artifact.id).unwrap();
        assert_eq!(retrieved.plaintext, PDF);
        assert!(retrieved.integrity_verified);
    }

    #[test]
    fn blob_on_disk_is_not_plaintext() {
        let fx = fixture();
        let order = place_order(&fx);
        let artifact = fx.store.store(&tech(), upload(&order, PDF)).unwrap();

        let blob = std::fs::read(
            artifact
                .id
                .as_shardable()
                .sharded_dir(&fx.root)
                .join(SEALED_BLOB_FILENAME),
        )
        .unwrap();
        assert_eq!(blob.len(), PDF.len() + 28);
        assert!(!blob.windows(4).any(|w| w == b"%PDF"));
    }

    #[test]
    fn unsupported_signature_is_rejected_and_audited() {
        let fx = fixture();
        let order = place_order(&fx);

        let err = fx
            .store
            .store(&tech(), upload(&order, b"GIF89a\x01\x00\x01\x00"))
            .unwrap_err();
        assert!(matches!(err, ClinicalError::Validation(_)));

        let last = fx.audit.all().unwrap().pop().unwrap();
        assert_eq!(last.action, AuditAction::ArtifactUploadRejected);
        assert_eq!(last.outcome, AuditOutcome::Failure);
        assert_eq!(std::fs::read_dir(&fx.root).unwrap().count(), 0);
    }

    #[test]
    fn clinicians_cannot_upload() {
        let fx = fixture();
        let order = place_order(&fx);
        assert!(matches!(
            fx.store.store(&dr(), upload(&order, PDF)),
            Err(ClinicalError::AccessDenied(_))
        ));
    }

    #[test]
    fn cancelled_order_refuses_upload() {
        let fx = fixture();
        let order = place_order(&fx);
        fx.orders.cancel(&dr(), &order.id, None).unwrap();
        assert!(matches!(
            fx.store.store(&tech(), upload(&order, PDF)),
            Err(ClinicalError::Conflict(_))
        ));
    }

    #[test]
    fn tampered_blob_fails_with_integrity_error() {
        let fx = fixture();
        let order = place_order(&fx);
        let artifact = fx.store.store(&tech(), upload(&order, PDF)).unwrap();

        let path = artifact
            .id
            .as_shardable()
            .sharded_dir(&fx.root)
            .join(SEALED_BLOB_FILENAME);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        std::fs::write(&path, bytes).unwrap();

        let err = fx.store.retrieve(&dr(), &artifact.id).unwrap_err();
        assert!(matches!(err, ClinicalError::Integrity(_)));

        let record = fx.audit.all().unwrap().pop().unwrap();
        assert_eq!(record.action, AuditAction::ArtifactTamperDetected);
        assert_eq!(record.outcome, AuditOutcome::Failure);
    }

    #[test]
    fn denied_and_unknown_look_the_same() {
        let fx = fixture();
        let order = place_order(&fx);
        let artifact = fx.store.store(&tech(), upload(&order, PDF)).unwrap();
        let stranger = Actor::new("dr-9", "Dr Nine", Role::Clinician).unwrap();

        let denied = fx.store.retrieve(&stranger, &artifact.id).unwrap_err();
        let unknown = fx.store.retrieve(&stranger, &ArtifactId::new()).unwrap_err();
        assert!(matches!(denied, ClinicalError::AccessDenied(_)));
        assert_eq!(denied.to_string(), unknown.to_string());

        let denials = fx
            .audit
            .all()
            .unwrap()
            .iter()
            .filter(|r| r.action == AuditAction::ArtifactRetrieved && r.outcome == AuditOutcome::Denied)
            .count();
        assert_eq!(denials, 2);
    }

    #[test]
    fn referral_grants_read_access() {
        let fx = fixture();
        let order = place_order(&fx);
        let artifact = fx.store.store(&tech(), upload(&order, PDF)).unwrap();
        let specialist = Actor::new("dr-2", "Dr Two", Role::Clinician).unwrap();

        assert!(fx.store.retrieve(&specialist, &artifact.id).is_err());
        fx.grants
            .create(&dr(), GrantRequest::referral(specialist.id.clone(), order.patient.clone(), "haem"))
            .unwrap();
        assert!(fx.store.retrieve(&specialist, &artifact.id).is_ok());
        assert_eq!(fx.store.list_for_order(&specialist, &order.id).unwrap().len(), 1);
    }

    #[test]
    fn critical_upload_alerts_clinician_and_sets_abnormal() {
        let fx = fixture();
        let order = place_order(&fx);
        let mut up = upload(&order, &[0xFF, 0xD8, 0xFF, 0xE0, 0x00]);
        up.critical = true;
        up.test_code = Some(TestCode::new("CBC").unwrap());

        let artifact = fx.store.store(&tech(), up).unwrap();
        assert!(artifact.critical);
        assert!(artifact.abnormal);
        assert_eq!(artifact.kind, FileKind::Jpeg);

        let sent = fx.notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(to, _)| to == &Recipient::Clinician(dr().id)));
        assert_eq!(sent.iter().filter(|(_, n)| n.urgent).count(), 1);
        assert!(sent
            .iter()
            .any(|(_, n)| !n.urgent && n.subject.starts_with("[ABNORMAL] ")));
    }

    #[test]
    fn every_upload_tells_the_ordering_clinician() {
        let fx = fixture();
        let order = place_order(&fx);

        fx.store.store(&tech(), upload(&order, PDF)).unwrap();

        let sent = fx.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Recipient::Clinician(dr().id));
        assert!(!sent[0].1.urgent);
        assert!(sent[0].1.subject.contains(&order.sample_id));
        assert!(!sent[0].1.subject.contains("[ABNORMAL]"));
    }

    fn blob_count(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .map(|path| {
                if path.is_dir() {
                    blob_count(&path)
                } else {
                    usize::from(path.file_name().is_some_and(|n| n == SEALED_BLOB_FILENAME))
                }
            })
            .sum()
    }

    #[test]
    fn failed_audit_write_undoes_the_upload() {
        let sink = Arc::new(FlakyAuditSink::default());
        let fx = fixture_with(AuditTrail::new(sink.clone()));
        let order = place_order(&fx);

        sink.set_failing(true);
        assert!(fx.store.store(&tech(), upload(&order, PDF)).is_err());
        sink.set_failing(false);

        assert_eq!(blob_count(&fx.root), 0);
        assert!(fx.notifier.sent().is_empty());
        let view = fx.orders.view(&dr(), &order.id).unwrap();
        assert_eq!(view.order.status, OrderStatus::Ordered);
        assert!(fx.store.list_for_order(&dr(), &order.id).unwrap().is_empty());

        fx.store.store(&tech(), upload(&order, PDF)).unwrap();
        assert_eq!(blob_count(&fx.root), 1);
    }

    #[test]
    fn unrequested_test_code_is_rejected() {
        let fx = fixture();
        let order = place_order(&fx);
        let mut up = upload(&order, PDF);
        up.test_code = Some(TestCode::new("LFT").unwrap());
        assert!(matches!(
            fx.store.store(&tech(), up),
            Err(ClinicalError::Validation(_))
        ));
    }
}
