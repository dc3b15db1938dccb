//! # API Shared
//!
//! Shared utilities and definitions for SecureMed APIs.
//!
//! Contains:
//! - Request and response types with `serde` and `utoipa` derives (`dto` module)
//! - Shared services like `HealthService`
//! - Authentication utilities: API key check and actor header parsing
//!
//! Used by `api-rest`.

pub mod auth;
pub mod dto;
pub mod health;

pub use auth::{actor_from_headers, validate_api_key, AuthError};
pub use health::HealthService;
