use crate::error::ApiError;
use crate::extract::AuthenticatedActor;
use crate::AppState;
use api_shared::dto::{
    AccessCheckRes, CreateGrantReq, ExtendGrantReq, GrantRes, MyPatientsRes, ReasonReq,
    RevokeAllReq, RevokeAllRes,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use securemed_core::{ActorId, GrantId, PatientRef};

#[utoipa::path(
    post,
    path = "/grants",
    request_body = CreateGrantReq,
    responses(
        (status = 201, description = "Grant issued", body = GrantRes),
        (status = 400, description = "Invalid grant request"),
        (status = 403, description = "Actor may not issue this kind of grant")
    )
)]
/// Issue a referral, break-glass or administrative grant
///
/// Break-glass is always issued to the caller and needs a justification, which is kept
/// verbatim in the audit trail.
#[axum::debug_handler]
pub async fn create_grant(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<CreateGrantReq>,
) -> Result<(StatusCode, Json<GrantRes>), ApiError> {
    let grant = state.vault.grants.create(&actor, req.into_request()?)?;
    Ok((StatusCode::CREATED, Json(GrantRes::from(&grant))))
}

#[utoipa::path(
    post,
    path = "/grants/{id}/accept",
    params(("id" = String, Path, description = "Grant id")),
    responses(
        (status = 200, description = "Grant accepted", body = GrantRes),
        (status = 403, description = "Grant not available"),
        (status = 409, description = "Grant is not pending")
    )
)]
#[axum::debug_handler]
pub async fn accept_grant(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<GrantRes>, ApiError> {
    let grant = state.vault.grants.accept(&actor, &GrantId::parse(&id)?)?;
    Ok(Json(GrantRes::from(&grant)))
}

#[utoipa::path(
    post,
    path = "/grants/{id}/decline",
    params(("id" = String, Path, description = "Grant id")),
    request_body = ReasonReq,
    responses(
        (status = 200, description = "Grant declined", body = GrantRes),
        (status = 403, description = "Grant not available"),
        (status = 409, description = "Grant is not pending")
    )
)]
#[axum::debug_handler]
pub async fn decline_grant(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    Json(req): Json<ReasonReq>,
) -> Result<Json<GrantRes>, ApiError> {
    let grant =
        state
            .vault
            .grants
            .decline(&actor, &GrantId::parse(&id)?, req.reason.as_deref())?;
    Ok(Json(GrantRes::from(&grant)))
}

#[utoipa::path(
    post,
    path = "/grants/{id}/complete",
    params(("id" = String, Path, description = "Grant id")),
    responses(
        (status = 200, description = "Grant completed", body = GrantRes),
        (status = 403, description = "Grant not available"),
        (status = 409, description = "Grant is not active")
    )
)]
#[axum::debug_handler]
pub async fn complete_grant(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<GrantRes>, ApiError> {
    let grant = state.vault.grants.complete(&actor, &GrantId::parse(&id)?)?;
    Ok(Json(GrantRes::from(&grant)))
}

#[utoipa::path(
    post,
    path = "/grants/{id}/extend",
    params(("id" = String, Path, description = "Grant id")),
    request_body = ExtendGrantReq,
    responses(
        (status = 200, description = "Expiry pushed back", body = GrantRes),
        (status = 400, description = "Days outside 1..=365"),
        (status = 403, description = "Grant not available"),
        (status = 409, description = "Grant is not active or never expires")
    )
)]
/// Extend an active grant
///
/// Only the grantee may extend. The new expiry is counted from now.
#[axum::debug_handler]
pub async fn extend_grant(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    Json(req): Json<ExtendGrantReq>,
) -> Result<Json<GrantRes>, ApiError> {
    let grant = state
        .vault
        .grants
        .extend(&actor, &GrantId::parse(&id)?, req.days)?;
    Ok(Json(GrantRes::from(&grant)))
}

#[utoipa::path(
    post,
    path = "/grants/{id}/revoke",
    params(("id" = String, Path, description = "Grant id")),
    request_body = ReasonReq,
    responses(
        (status = 200, description = "Grant revoked", body = GrantRes),
        (status = 403, description = "Grant not available"),
        (status = 409, description = "Grant already closed")
    )
)]
#[axum::debug_handler]
pub async fn revoke_grant(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    Json(req): Json<ReasonReq>,
) -> Result<Json<GrantRes>, ApiError> {
    let grant = state
        .vault
        .grants
        .revoke(&actor, &GrantId::parse(&id)?, req.reason.as_deref())?;
    Ok(Json(GrantRes::from(&grant)))
}

#[utoipa::path(
    post,
    path = "/grants/revoke-all",
    request_body = RevokeAllReq,
    responses(
        (status = 200, description = "Open grants for the pair revoked", body = RevokeAllRes),
        (status = 403, description = "Admins only")
    )
)]
#[axum::debug_handler]
pub async fn revoke_all_grants(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<RevokeAllReq>,
) -> Result<Json<RevokeAllRes>, ApiError> {
    let revoked = state.vault.grants.revoke_all(
        &actor,
        &ActorId::new(&req.grantee_id)?,
        &PatientRef::new(&req.patient_id)?,
        req.reason.as_deref(),
    )?;
    Ok(Json(RevokeAllRes {
        revoked: revoked.len(),
        grant_ids: revoked.iter().map(|g| g.id.to_string()).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/grants/my-patients",
    responses(
        (status = 200, description = "Active, pending and recently closed grants", body = MyPatientsRes)
    )
)]
#[axum::debug_handler]
pub async fn my_patients(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> Result<Json<MyPatientsRes>, ApiError> {
    let mine = state.vault.grants.my_patients(&actor)?;
    Ok(Json(MyPatientsRes::from(&mine)))
}

#[utoipa::path(
    get,
    path = "/grants/check/{patient}",
    params(("patient" = String, Path, description = "Patient reference")),
    responses(
        (status = 200, description = "Whether the caller may read the patient", body = AccessCheckRes)
    )
)]
/// Check the caller's access to a patient
///
/// Expired grants for the caller are swept first. The check is audited either way.
#[axum::debug_handler]
pub async fn check_access(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(patient): Path<String>,
) -> Result<Json<AccessCheckRes>, ApiError> {
    let patient = PatientRef::new(&patient)?;
    let allowed = state.vault.grants.check(&actor, &patient)?;
    Ok(Json(AccessCheckRes {
        patient_id: patient.to_string(),
        allowed,
    }))
}
