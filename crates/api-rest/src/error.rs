//! Mapping of core and authentication failures onto HTTP responses.

use api_shared::dto::ErrorRes;
use api_shared::AuthError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use securemed_core::{ClinicalError, ErrorKind};

/// Body returned for refused reads. Identical for unknown and forbidden resources.
pub const ACCESS_DENIED_MESSAGE: &str = "access denied";

/// Body returned when a sealed artifact fails authentication.
pub const INTEGRITY_MESSAGE: &str = "decryption failed";

#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    Clinical(ClinicalError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<ClinicalError> for ApiError {
    fn from(err: ClinicalError) -> Self {
        Self::Clinical(err)
    }
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::Auth(err) => (StatusCode::UNAUTHORIZED, err.to_string()),
            Self::Clinical(err) => match err.kind() {
                ErrorKind::Validation => (StatusCode::BAD_REQUEST, err.to_string()),
                ErrorKind::Conflict => (StatusCode::CONFLICT, err.to_string()),
                ErrorKind::AccessDenied | ErrorKind::NotFound => {
                    (StatusCode::FORBIDDEN, ACCESS_DENIED_MESSAGE.into())
                }
                ErrorKind::Integrity => {
                    (StatusCode::INTERNAL_SERVER_ERROR, INTEGRITY_MESSAGE.into())
                }
                ErrorKind::Configuration | ErrorKind::Internal => {
                    tracing::error!("request failed: {}", err);
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_message();
        (status, Json(ErrorRes { error })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denied_and_missing_share_a_response() {
        let denied = ApiError::from(ClinicalError::AccessDenied("order not available".into()));
        let missing = ApiError::from(ClinicalError::NotFound("order abc".into()));
        assert_eq!(denied.status_and_message(), missing.status_and_message());
        assert_eq!(denied.status_and_message().0, StatusCode::FORBIDDEN);
    }

    #[test]
    fn integrity_detail_is_hidden() {
        let err = ApiError::from(ClinicalError::Integrity("tag mismatch".into()));
        assert_eq!(
            err.status_and_message(),
            (StatusCode::INTERNAL_SERVER_ERROR, INTEGRITY_MESSAGE.to_string())
        );
    }

    #[test]
    fn validation_and_conflict_keep_their_message() {
        let err = ApiError::from(ClinicalError::Validation("days must be 1..=365".into()));
        assert_eq!(err.status_and_message().0, StatusCode::BAD_REQUEST);
        assert!(err.status_and_message().1.contains("1..=365"));

        let err = ApiError::from(ClinicalError::Conflict("order cancelled".into()));
        assert_eq!(err.status_and_message().0, StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(AuthError::InvalidApiKey).status_and_message().0,
            StatusCode::UNAUTHORIZED
        );
    }
}
