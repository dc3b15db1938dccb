//! Request and response bodies.
//!
//! Enum-valued fields travel as their upper-case wire names (`STAT`, `BREAK_GLASS`, ...) and
//! timestamps as RFC 3339 strings. Conversions from core types live here so every API surface
//! renders records the same way.

use chrono::{DateTime, Duration, Utc};
use securemed_core::artifacts::ResultArtifact;
use securemed_core::audit::AuditRecord;
use securemed_core::grants::{AccessGrant, GrantKind, GrantRequest, GrantTtl, MyPatients};
use securemed_core::orders::{NewOrder, OrderView, Priority, RequestedTest, TestResult};
use securemed_core::worklist::{ResultSubmission, SubmittedResult, WorkItem};
use securemed_core::{ActorId, ClinicalError, ClinicalResult, OrderId, PatientRef, TestCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Wire name of a core enum, as produced by its serde representation.
pub fn wire_name<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => String::new(),
    }
}

/// Parses a core enum from its wire name. Case-insensitive.
pub fn parse_wire<T: DeserializeOwned>(field: &str, value: &str) -> ClinicalResult<T> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_ascii_uppercase()))
        .map_err(|_| ClinicalError::Validation(format!("invalid {} '{}'", field, value)))
}

fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RequestedTestDto {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub fasting_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderReq {
    pub patient_id: String,
    pub tests: Vec<RequestedTestDto>,
    /// ROUTINE, URGENT or STAT. Defaults to ROUTINE.
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub clinical_notes: Option<String>,
}

impl CreateOrderReq {
    pub fn into_new_order(self) -> ClinicalResult<NewOrder> {
        let tests = self
            .tests
            .into_iter()
            .map(|t| {
                Ok(RequestedTest {
                    code: TestCode::new(&t.code)?,
                    name: t.name,
                    fasting_required: t.fasting_required,
                })
            })
            .collect::<ClinicalResult<Vec<_>>>()?;
        Ok(NewOrder {
            patient: PatientRef::new(&self.patient_id)?,
            tests,
            priority: match self.priority.as_deref() {
                Some(p) => parse_wire("priority", p)?,
                None => Priority::Routine,
            },
            clinical_notes: self.clinical_notes,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ReasonReq {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TestResultRes {
    pub test_code: String,
    pub value: String,
    pub reference_range: Option<String>,
    pub units: Option<String>,
    pub flag: Option<String>,
    pub notes: Option<String>,
    pub technician_id: String,
    pub processed_at: String,
}

impl From<&TestResult> for TestResultRes {
    fn from(r: &TestResult) -> Self {
        Self {
            test_code: r.test_code.to_string(),
            value: r.value.clone(),
            reference_range: r.reference_range.clone(),
            units: r.units.clone(),
            flag: r.flag.as_ref().map(wire_name),
            notes: r.notes.clone(),
            technician_id: r.technician.to_string(),
            processed_at: ts(r.processed_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderRes {
    pub id: String,
    pub sample_id: String,
    pub patient_id: String,
    pub ordering_clinician_id: Option<String>,
    pub tests: Vec<RequestedTestDto>,
    pub priority: String,
    pub status: String,
    pub clinical_notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub results: Vec<TestResultRes>,
}

impl From<&OrderView> for OrderRes {
    fn from(view: &OrderView) -> Self {
        let order = &view.order;
        Self {
            id: order.id.to_string(),
            sample_id: order.sample_id.clone(),
            patient_id: order.patient.to_string(),
            ordering_clinician_id: order.ordering_clinician.as_ref().map(|c| c.to_string()),
            tests: order
                .tests
                .iter()
                .map(|t| RequestedTestDto {
                    code: t.code.to_string(),
                    name: t.name.clone(),
                    fasting_required: t.fasting_required,
                })
                .collect(),
            priority: wire_name(&order.priority),
            status: wire_name(&order.status),
            clinical_notes: order.clinical_notes.clone(),
            created_at: ts(order.created_at),
            updated_at: ts(order.updated_at),
            results: view.results.iter().map(TestResultRes::from).collect(),
        }
    }
}

/// Query parameters of an artifact upload. The file itself is the raw request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadArtifactParams {
    pub test_code: Option<String>,
    pub comments: Option<String>,
    #[serde(default)]
    pub abnormal: bool,
    #[serde(default)]
    pub critical: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ArtifactRes {
    pub id: String,
    pub order_id: String,
    pub test_code: Option<String>,
    pub content_hash: String,
    pub kind: String,
    pub media_type: String,
    pub size_bytes: u64,
    pub abnormal: bool,
    pub critical: bool,
    pub technician_id: String,
    pub comments: Option<String>,
    pub verified_at: String,
}

impl From<&ResultArtifact> for ArtifactRes {
    fn from(a: &ResultArtifact) -> Self {
        Self {
            id: a.id.to_string(),
            order_id: a.order_id.to_string(),
            test_code: a.test_code.as_ref().map(|c| c.to_string()),
            content_hash: a.content_hash.to_string(),
            kind: wire_name(&a.kind),
            media_type: a.kind.media_type().to_string(),
            size_bytes: a.size_bytes,
            abnormal: a.abnormal,
            critical: a.critical,
            technician_id: a.technician.to_string(),
            comments: a.comments.clone(),
            verified_at: ts(a.verified_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ArtifactListRes {
    pub artifacts: Vec<ArtifactRes>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkItemRes {
    pub sample_id: String,
    pub order_id: String,
    pub test_code: String,
    pub test_name: String,
    pub priority: String,
    pub fasting_required: bool,
    pub status: String,
}

impl From<&WorkItem> for WorkItemRes {
    fn from(item: &WorkItem) -> Self {
        Self {
            sample_id: item.sample_id.clone(),
            order_id: item.order_id.to_string(),
            test_code: item.test_code.to_string(),
            test_name: item.test_name.clone(),
            priority: wire_name(&item.priority),
            fasting_required: item.fasting_required,
            status: wire_name(&item.status),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorklistRes {
    pub items: Vec<WorkItemRes>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitResultReq {
    pub order_id: String,
    pub test_code: String,
    pub value: String,
    #[serde(default)]
    pub reference_range: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    /// HIGH, LOW or CRITICAL. Derived from the range when omitted.
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SubmitResultReq {
    pub fn into_submission(self) -> ClinicalResult<ResultSubmission> {
        Ok(ResultSubmission {
            order_id: OrderId::parse(&self.order_id)?,
            test_code: TestCode::new(&self.test_code)?,
            value: self.value,
            reference_range: self.reference_range,
            units: self.units,
            flag: self.flag.as_deref().map(|f| parse_wire("flag", f)).transpose()?,
            notes: self.notes,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitResultRes {
    pub order_id: String,
    pub status: String,
    pub flag: Option<String>,
}

impl From<&SubmittedResult> for SubmitResultRes {
    fn from(r: &SubmittedResult) -> Self {
        Self {
            order_id: r.order_id.to_string(),
            status: wire_name(&r.status),
            flag: r.flag.as_ref().map(wire_name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateGrantReq {
    /// REFERRAL, BREAK_GLASS or ADMIN_GRANT.
    pub kind: String,
    /// Required for referrals and admin grants; ignored for break-glass.
    #[serde(default)]
    pub grantee_id: Option<String>,
    pub patient_id: String,
    #[serde(default)]
    pub justification: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    /// Overrides the default lifetime. Must be positive; break-glass allows at most one hour.
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
    /// Admin grants only.
    #[serde(default)]
    pub permanent: bool,
    /// Referrals only: start PENDING until the grantee accepts.
    #[serde(default)]
    pub awaiting_acceptance: bool,
}

impl CreateGrantReq {
    pub fn into_request(self) -> ClinicalResult<GrantRequest> {
        let kind: GrantKind = parse_wire("kind", &self.kind)?;
        let grantee = self.grantee_id.as_deref().map(ActorId::new).transpose()?;
        let ttl = match (self.permanent, self.ttl_seconds) {
            (true, Some(_)) => {
                return Err(ClinicalError::Validation(
                    "a grant cannot be both permanent and time-limited".into(),
                ))
            }
            (true, None) => GrantTtl::Permanent,
            (false, Some(secs)) if secs <= 0 => {
                return Err(ClinicalError::Validation("ttl_seconds must be positive".into()))
            }
            (false, Some(secs)) => GrantTtl::Custom(Duration::try_seconds(secs).ok_or_else(
                || ClinicalError::Validation("ttl_seconds is out of range".into()),
            )?),
            (false, None) => GrantTtl::Default,
        };
        let priority = match self.priority.as_deref() {
            Some(p) => parse_wire("priority", p)?,
            None if kind == GrantKind::BreakGlass => Priority::Stat,
            None => Priority::Routine,
        };
        Ok(GrantRequest {
            kind,
            grantee,
            patient: PatientRef::new(&self.patient_id)?,
            justification: self.justification,
            priority,
            ttl,
            awaiting_acceptance: self.awaiting_acceptance,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GrantRes {
    pub id: String,
    pub kind: String,
    pub grantor_id: String,
    pub grantee_id: String,
    pub patient_id: String,
    pub justification: Option<String>,
    pub priority: String,
    pub issued_at: String,
    pub expires_at: Option<String>,
    pub status: String,
    pub active: bool,
    pub closed_at: Option<String>,
    pub revocation_reason: Option<String>,
}

impl From<&AccessGrant> for GrantRes {
    fn from(g: &AccessGrant) -> Self {
        Self {
            id: g.id.to_string(),
            kind: wire_name(&g.kind),
            grantor_id: g.grantor.to_string(),
            grantee_id: g.grantee.to_string(),
            patient_id: g.patient.to_string(),
            justification: g.justification.clone(),
            priority: wire_name(&g.priority),
            issued_at: ts(g.issued_at),
            expires_at: g.expires_at.map(ts),
            status: wire_name(&g.status),
            active: g.is_active_at(Utc::now()),
            closed_at: g.closed_at.map(ts),
            revocation_reason: g.revocation_reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExtendGrantReq {
    pub days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RevokeAllReq {
    pub grantee_id: String,
    pub patient_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RevokeAllRes {
    pub revoked: usize,
    pub grant_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MyPatientsRes {
    pub active: Vec<GrantRes>,
    pub pending: Vec<GrantRes>,
    pub recent_inactive: Vec<GrantRes>,
}

impl From<&MyPatients> for MyPatientsRes {
    fn from(m: &MyPatients) -> Self {
        Self {
            active: m.active.iter().map(GrantRes::from).collect(),
            pending: m.pending.iter().map(GrantRes::from).collect(),
            recent_inactive: m.recent_inactive.iter().map(GrantRes::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccessCheckRes {
    pub patient_id: String,
    pub allowed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditRecordRes {
    pub id: String,
    pub timestamp: String,
    pub actor_id: String,
    pub actor_name: String,
    pub actor_role: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    #[schema(value_type = Object)]
    pub detail: serde_json::Value,
    pub outcome: String,
}

impl From<&AuditRecord> for AuditRecordRes {
    fn from(r: &AuditRecord) -> Self {
        Self {
            id: r.id.to_string(),
            timestamp: ts(r.timestamp),
            actor_id: r.actor_id.clone(),
            actor_name: r.actor_name.clone(),
            actor_role: r.actor_role.to_string(),
            action: wire_name(&r.action),
            resource_type: wire_name(&r.resource_type),
            resource_id: r.resource_id.clone(),
            detail: r.detail.clone(),
            outcome: wire_name(&r.outcome),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditTrailRes {
    pub records: Vec<AuditRecordRes>,
}
