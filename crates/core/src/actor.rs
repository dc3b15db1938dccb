//! The authenticated actor passed into every core operation.
//!
//! Authentication happens outside this crate. Whoever calls in supplies an [`Actor`] whose role
//! decides, through [`Role::has`], which [`Capability`] it holds. There is no discovery of
//! profiles at call time: the check is a plain match over two enums.

use crate::constants::{SYSTEM_ACTOR_ID, SYSTEM_ACTOR_NAME};
use crate::error::{ClinicalError, ClinicalResult};
use crate::ids::ActorId;
use securemed_types::NonEmptyText;
use std::fmt;
use std::str::FromStr;

/// Platform role of an actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Clinician,
    Technician,
    Admin,
    Patient,
    /// Internal actor for automatic transitions. Cannot be parsed from external input.
    System,
}

/// Something an operation requires its caller to be allowed to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    OrderTests,
    ProcessSamples,
    IssueBreakGlass,
    IssueReferral,
    ManageGrants,
    ReadAuditTrail,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clinician => "clinician",
            Self::Technician => "technician",
            Self::Admin => "admin",
            Self::Patient => "patient",
            Self::System => "system",
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        use Capability::*;
        match self {
            Self::Clinician => matches!(capability, OrderTests | IssueBreakGlass | IssueReferral),
            Self::Technician => matches!(capability, ProcessSamples),
            Self::Admin => !matches!(capability, IssueBreakGlass | IssueReferral),
            Self::Patient => false,
            Self::System => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ClinicalError;

    /// Parses a role claimed by an external caller. `system` is never accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clinician" | "doctor" => Ok(Self::Clinician),
            "technician" | "lab_technician" => Ok(Self::Technician),
            "admin" => Ok(Self::Admin),
            "patient" => Ok(Self::Patient),
            other => Err(ClinicalError::Validation(format!("unknown role '{}'", other))),
        }
    }
}

/// An authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    pub name: NonEmptyText,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl AsRef<str>, name: impl AsRef<str>, role: Role) -> ClinicalResult<Self> {
        Ok(Self {
            id: ActorId::new(id)?,
            name: NonEmptyText::new(name)?,
            role,
        })
    }

    /// The actor automatic transitions are attributed to.
    pub fn system() -> ClinicalResult<Self> {
        Self::new(SYSTEM_ACTOR_ID, SYSTEM_ACTOR_NAME, Role::System)
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.role.has(capability)
    }

    /// Fails with [`ClinicalError::AccessDenied`] unless the actor holds `capability`.
    pub fn require(&self, capability: Capability) -> ClinicalResult<()> {
        if self.can(capability) {
            Ok(())
        } else {
            Err(ClinicalError::AccessDenied(format!(
                "role '{}' lacks {:?}",
                self.role, capability
            )))
        }
    }
}
