//! # SecureMed Core
//!
//! Secure clinical-artifact storage and time-bound access control.
//!
//! This crate contains the domain services behind the lab workflow:
//! - Clinical orders and their structured results ([`orders`])
//! - A de-identified processing worklist ([`worklist`])
//! - Encrypted result artifacts with integrity verification ([`artifacts`])
//! - Referrals, break-glass overrides and administrative grants ([`grants`])
//! - The append-only audit trail every operation writes to ([`audit`])
//!
//! Every operation takes an authenticated [`Actor`]. **No API concerns**: authentication, HTTP
//! servers and request parsing belong in `api-rest` and `api-shared`.

pub mod actor;
pub mod artifacts;
pub mod assignments;
pub mod audit;
pub mod config;
pub mod constants;
pub mod error;
pub mod grants;
pub mod ids;
pub mod notify;
pub mod orders;
pub mod validation;
pub mod vault;
pub mod worklist;

pub use actor::{Actor, Capability, Role};
pub use config::CoreConfig;
pub use error::{ClinicalError, ClinicalResult, ErrorKind};
pub use ids::{ActorId, ArtifactId, AuditRecordId, GrantId, OrderId, PatientRef, TestCode};
pub use vault::ClinicalVault;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
