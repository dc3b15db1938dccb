//! # API REST
//!
//! REST API implementation for SecureMed.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (status codes, raw upload bodies, CORS)
//!
//! Every route except `/health` requires the shared `x-api-key` and the `x-actor-*` headers.
//! Uses `api-shared` for request and response types.

#![warn(rust_2018_idioms)]

pub mod artifacts;
pub mod audit;
pub mod error;
pub mod extract;
pub mod grants;
pub mod orders;
pub mod worklist;

use api_shared::dto::{
    AccessCheckRes, ArtifactListRes, ArtifactRes, AuditRecordRes, AuditTrailRes, CreateGrantReq,
    CreateOrderReq, ErrorRes, ExtendGrantReq, GrantRes, HealthRes, MyPatientsRes, OrderRes,
    ReasonReq, RequestedTestDto, RevokeAllReq, RevokeAllRes, SubmitResultReq, SubmitResultRes,
    TestResultRes, UploadArtifactParams, WorkItemRes, WorklistRes,
};
use api_shared::HealthService;
use axum::extract::{DefaultBodyLimit, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use securemed_core::ClinicalVault;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use error::ApiError;
pub use extract::AuthenticatedActor;

/// Application state shared across REST API handlers
///
/// Holds the clinical vault and the API key resolved at startup. Handlers never read the
/// environment.
#[derive(Clone)]
pub struct AppState {
    pub vault: Arc<ClinicalVault>,
    pub api_key: Arc<str>,
}

impl AppState {
    pub fn new(vault: ClinicalVault, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            vault: Arc::new(vault),
            api_key: api_key.into(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        orders::create_order,
        orders::get_order,
        orders::collect_order,
        orders::cancel_order,
        artifacts::upload_artifact,
        artifacts::download_artifact,
        artifacts::list_artifacts,
        worklist::list_worklist,
        worklist::submit_result,
        grants::create_grant,
        grants::accept_grant,
        grants::decline_grant,
        grants::complete_grant,
        grants::extend_grant,
        grants::revoke_grant,
        grants::revoke_all_grants,
        grants::my_patients,
        grants::check_access,
        audit::read_audit,
    ),
    components(schemas(
        HealthRes,
        ErrorRes,
        RequestedTestDto,
        CreateOrderReq,
        OrderRes,
        TestResultRes,
        ReasonReq,
        UploadArtifactParams,
        ArtifactRes,
        ArtifactListRes,
        WorkItemRes,
        WorklistRes,
        SubmitResultReq,
        SubmitResultRes,
        CreateGrantReq,
        GrantRes,
        ExtendGrantReq,
        RevokeAllReq,
        RevokeAllRes,
        MyPatientsRes,
        AccessCheckRes,
        AuditRecordRes,
        AuditTrailRes,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router with Swagger UI and permissive CORS.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/orders", post(orders::create_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/collect", post(orders::collect_order))
        .route("/orders/:id/cancel", post(orders::cancel_order))
        .route(
            "/orders/:id/artifacts",
            post(artifacts::upload_artifact)
                .get(artifacts::list_artifacts)
                .layer(DefaultBodyLimit::max(artifacts::MAX_UPLOAD_BYTES)),
        )
        .route("/artifacts/:id/content", get(artifacts::download_artifact))
        .route("/worklist", get(worklist::list_worklist))
        .route("/worklist/results", post(worklist::submit_result))
        .route("/grants", post(grants::create_grant))
        .route("/grants/revoke-all", post(grants::revoke_all_grants))
        .route("/grants/my-patients", get(grants::my_patients))
        .route("/grants/check/:patient", get(grants::check_access))
        .route("/grants/:id/accept", post(grants::accept_grant))
        .route("/grants/:id/decline", post(grants::decline_grant))
        .route("/grants/:id/complete", post(grants::complete_grant))
        .route("/grants/:id/extend", post(grants::extend_grant))
        .route("/grants/:id/revoke", post(grants::revoke_grant))
        .route("/audit", get(audit::read_audit))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
///
/// Used for monitoring and load balancer health checks. Needs no credentials.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthService::check_health())
}
