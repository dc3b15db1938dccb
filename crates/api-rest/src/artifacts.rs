use crate::error::ApiError;
use crate::extract::AuthenticatedActor;
use crate::AppState;
use api_shared::dto::{ArtifactListRes, ArtifactRes, UploadArtifactParams};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use securemed_core::artifacts::ArtifactUpload;
use securemed_core::{ArtifactId, OrderId, TestCode};

/// Largest accepted upload body.
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Hex SHA-256 of the plaintext, sent with every download.
pub const CONTENT_HASH_HEADER: HeaderName = HeaderName::from_static("x-content-sha256");

#[utoipa::path(
    post,
    path = "/orders/{id}/artifacts",
    params(("id" = String, Path, description = "Order id"), UploadArtifactParams),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 201, description = "Artifact sealed and stored", body = ArtifactRes),
        (status = 400, description = "Unsupported file type or invalid parameters"),
        (status = 403, description = "Actor may not upload results"),
        (status = 409, description = "Order cancelled")
    )
)]
/// Upload a result file for an order
///
/// The raw body is the file. Only PDF, JPEG, PNG and DICOM content is accepted; the type is
/// decided from the leading bytes, never from a declared content type. The response describes
/// the stored artifact and never includes ciphertext.
#[axum::debug_handler]
pub async fn upload_artifact(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    Query(params): Query<UploadArtifactParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<ArtifactRes>), ApiError> {
    let upload = ArtifactUpload {
        order_id: OrderId::parse(&id)?,
        test_code: params.test_code.as_deref().map(TestCode::new).transpose()?,
        content: body.to_vec(),
        abnormal: params.abnormal,
        critical: params.critical,
        comments: params.comments,
    };
    let artifact = state.vault.artifacts.store(&actor, upload)?;
    Ok((StatusCode::CREATED, Json(ArtifactRes::from(&artifact))))
}

#[utoipa::path(
    get,
    path = "/artifacts/{id}/content",
    params(("id" = String, Path, description = "Artifact id")),
    responses(
        (status = 200, description = "Decrypted file", content_type = "application/octet-stream"),
        (status = 403, description = "Artifact not available"),
        (status = 500, description = "Decryption failed")
    )
)]
/// Download and decrypt an artifact
///
/// The content type is the detected media type of the upload.
#[axum::debug_handler]
pub async fn download_artifact(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let retrieved = state
        .vault
        .artifacts
        .retrieve(&actor, &ArtifactId::parse(&id)?)?;
    let artifact = retrieved.artifact;
    Ok((
        [
            (header::CONTENT_TYPE, artifact.kind.media_type().to_string()),
            (CONTENT_HASH_HEADER, artifact.content_hash.to_string()),
        ],
        retrieved.plaintext,
    ))
}

#[utoipa::path(
    get,
    path = "/orders/{id}/artifacts",
    params(("id" = String, Path, description = "Order id")),
    responses(
        (status = 200, description = "Artifact metadata for the order", body = ArtifactListRes),
        (status = 403, description = "Order not available")
    )
)]
#[axum::debug_handler]
pub async fn list_artifacts(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<ArtifactListRes>, ApiError> {
    let artifacts = state
        .vault
        .artifacts
        .list_for_order(&actor, &OrderId::parse(&id)?)?;
    Ok(Json(ArtifactListRes {
        artifacts: artifacts.iter().map(ArtifactRes::from).collect(),
    }))
}
