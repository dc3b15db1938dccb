use crate::error::ApiError;
use crate::extract::AuthenticatedActor;
use crate::AppState;
use api_shared::dto::{SubmitResultReq, SubmitResultRes, WorkItemRes, WorklistRes};
use axum::extract::State;
use axum::Json;

#[utoipa::path(
    get,
    path = "/worklist",
    responses(
        (status = 200, description = "Pending work, most urgent first", body = WorklistRes),
        (status = 403, description = "Actor may not process samples")
    )
)]
/// De-identified pending work
///
/// One item per unresulted test. Items carry the sample id, never the patient.
#[axum::debug_handler]
pub async fn list_worklist(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> Result<Json<WorklistRes>, ApiError> {
    let items = state.vault.worklist.list_pending(&actor)?;
    Ok(Json(WorklistRes {
        items: items.iter().map(WorkItemRes::from).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/worklist/results",
    request_body = SubmitResultReq,
    responses(
        (status = 200, description = "Result recorded", body = SubmitResultRes),
        (status = 400, description = "Invalid result or unrequested test"),
        (status = 403, description = "Actor may not process samples"),
        (status = 409, description = "Result already recorded or order cancelled")
    )
)]
#[axum::debug_handler]
pub async fn submit_result(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<SubmitResultReq>,
) -> Result<Json<SubmitResultRes>, ApiError> {
    let submitted = state
        .vault
        .worklist
        .submit_result(&actor, req.into_submission()?)?;
    Ok(Json(SubmitResultRes::from(&submitted)))
}
