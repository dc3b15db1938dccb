//! Request authentication helpers.
//!
//! Identity is established upstream. An API surface checks the shared API key, then trusts the
//! actor headers that came with the request. The internal `system` role can never be claimed.

use securemed_core::{Actor, Role};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_NAME_HEADER: &str = "x-actor-name";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing API key")]
    MissingApiKey,

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("missing header {0}")]
    MissingHeader(&'static str),

    #[error("invalid actor: {0}")]
    InvalidActor(String),
}

/// Validates the provided API key against the expected key resolved at startup.
///
/// The comparison takes the same time for every key of the expected length.
pub fn validate_api_key(provided: Option<&str>, expected: &str) -> Result<(), AuthError> {
    let provided = provided.ok_or(AuthError::MissingApiKey)?;
    let (a, b) = (provided.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return Err(AuthError::InvalidApiKey);
    }
    let diff = a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y));
    if diff == 0 {
        Ok(())
    } else {
        Err(AuthError::InvalidApiKey)
    }
}

/// Builds the authenticated actor from the three actor headers.
pub fn actor_from_headers(
    id: Option<&str>,
    name: Option<&str>,
    role: Option<&str>,
) -> Result<Actor, AuthError> {
    let id = id.ok_or(AuthError::MissingHeader(ACTOR_ID_HEADER))?;
    let role = role.ok_or(AuthError::MissingHeader(ACTOR_ROLE_HEADER))?;
    let role: Role = role
        .parse()
        .map_err(|e: securemed_core::ClinicalError| AuthError::InvalidActor(e.to_string()))?;
    let name = name.filter(|n| !n.trim().is_empty()).unwrap_or(id);

    Actor::new(id, name, role).map_err(|e| AuthError::InvalidActor(e.to_string()))
}
