use crate::error::ApiError;
use crate::extract::AuthenticatedActor;
use crate::AppState;
use api_shared::dto::{CreateOrderReq, OrderRes, ReasonReq};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use securemed_core::orders::OrderView;
use securemed_core::OrderId;

#[utoipa::path(
    post,
    path = "/orders",
    request_body = CreateOrderReq,
    responses(
        (status = 201, description = "Order placed", body = OrderRes),
        (status = 400, description = "Invalid order"),
        (status = 401, description = "Missing or invalid credentials"),
        (status = 403, description = "Actor may not place orders")
    )
)]
/// Place a laboratory order
///
/// Clinicians and admins only. The response carries the generated sample id used on the
/// worklist.
#[axum::debug_handler]
pub async fn create_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<CreateOrderReq>,
) -> Result<(StatusCode, Json<OrderRes>), ApiError> {
    let order = state.vault.orders.create(&actor, req.into_new_order()?)?;
    let view = OrderView {
        order,
        results: Vec::new(),
    };
    Ok((StatusCode::CREATED, Json(OrderRes::from(&view))))
}

#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(("id" = String, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with its recorded results", body = OrderRes),
        (status = 403, description = "Order not available")
    )
)]
/// Read an order
///
/// Unknown orders and orders the actor may not read get the same 403.
#[axum::debug_handler]
pub async fn get_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<OrderRes>, ApiError> {
    let view = state.vault.orders.view(&actor, &OrderId::parse(&id)?)?;
    Ok(Json(OrderRes::from(&view)))
}

#[utoipa::path(
    post,
    path = "/orders/{id}/collect",
    params(("id" = String, Path, description = "Order id")),
    responses(
        (status = 200, description = "Sample collected", body = OrderRes),
        (status = 403, description = "Actor may not process samples"),
        (status = 409, description = "Order is not awaiting collection")
    )
)]
#[axum::debug_handler]
pub async fn collect_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
) -> Result<Json<OrderRes>, ApiError> {
    let order = state
        .vault
        .orders
        .mark_collected(&actor, &OrderId::parse(&id)?)?;
    Ok(Json(OrderRes::from(&OrderView {
        order,
        results: Vec::new(),
    })))
}

#[utoipa::path(
    post,
    path = "/orders/{id}/cancel",
    params(("id" = String, Path, description = "Order id")),
    request_body = ReasonReq,
    responses(
        (status = 200, description = "Order cancelled", body = OrderRes),
        (status = 403, description = "Order not available"),
        (status = 409, description = "Order already completed or cancelled")
    )
)]
/// Cancel an order
///
/// Allowed for the ordering clinician and admins, until the order completes.
#[axum::debug_handler]
pub async fn cancel_order(
    State(state): State<AppState>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(id): Path<String>,
    Json(req): Json<ReasonReq>,
) -> Result<Json<OrderRes>, ApiError> {
    let order = state
        .vault
        .orders
        .cancel(&actor, &OrderId::parse(&id)?, req.reason.as_deref())?;
    Ok(Json(OrderRes::from(&OrderView {
        order,
        results: Vec::new(),
    })))
}
