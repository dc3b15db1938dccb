use crate::error::ApiError;
use crate::extract::AuthenticatedActor;
use crate::AppState;
use api_shared::dto::{parse_wire, AuditRecordRes, AuditTrailRes};
use axum::extract::{Query, State};
use axum::Json;
use securemed_core::audit::AuditFilter;
use serde::Deserialize;
use utoipa::IntoParams;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditQuery {
    /// e.g. ORDER, ARTIFACT, GRANT
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    /// e.g. BREAK_GLASS_ACCESS
    pub action: Option<String>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    fn into_filter(self) -> Result<AuditFilter, ApiError> {
        Ok(AuditFilter {
            resource_type: self
                .resource_type
                .as_deref()
                .map(|v| parse_wire("resource_type", v))
                .transpose()?,
            resource_id: self.resource_id,
            action: self
                .action
                .as_deref()
                .map(|v| parse_wire("action", v))
                .transpose()?,
            limit: self.limit,
        })
    }
}

#[utoipa::path(
    get,
    path = "/audit",
    params(AuditQuery),
    responses(
        (status = 200, description = "Audit records, newest first", body = AuditTrailRes),
        (status = 403, description = "Admins only")
    )
)]
/// Read the audit trail
///
/// The read is itself recorded.
#[axum::debug_handler]
pub async fn read_audit(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditTrailRes>, ApiError> {
    let records = state.vault.audit.query(&actor, &query.into_filter()?)?;
    Ok(Json(AuditTrailRes {
        records: records.iter().map(AuditRecordRes::from).collect(),
    }))
}
