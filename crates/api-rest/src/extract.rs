//! The authenticated-actor extractor.

use crate::error::ApiError;
use crate::AppState;
use api_shared::auth::{ACTOR_ID_HEADER, ACTOR_NAME_HEADER, ACTOR_ROLE_HEADER, API_KEY_HEADER};
use api_shared::{actor_from_headers, validate_api_key};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use securemed_core::Actor;

/// The caller of a request, established from the `x-actor-*` headers once the API key matches.
#[derive(Debug, Clone)]
pub struct AuthenticatedActor(pub Actor);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name).and_then(|v| v.to_str().ok())
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthenticatedActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        if let Err(err) = validate_api_key(header(parts, API_KEY_HEADER), &state.api_key) {
            tracing::warn!(path = %parts.uri.path(), "rejected request: {}", err);
            return Err(err.into());
        }
        let actor = actor_from_headers(
            header(parts, ACTOR_ID_HEADER),
            header(parts, ACTOR_NAME_HEADER),
            header(parts, ACTOR_ROLE_HEADER),
        )?;
        Ok(Self(actor))
    }
}
