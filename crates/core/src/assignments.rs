//! Primary clinician assignments.
//!
//! Who a patient's primary clinician is belongs to the wider platform. The access grant manager
//! only asks the question through [`AssignmentDirectory`].

use crate::error::ClinicalResult;
use crate::ids::{ActorId, PatientRef};
use std::collections::HashSet;
use std::path::Path;

pub trait AssignmentDirectory: Send + Sync {
    fn is_primary_clinician(&self, clinician: &ActorId, patient: &PatientRef) -> bool;
}

/// One line of the assignments YAML file.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Assignment {
    pub clinician: ActorId,
    pub patient: PatientRef,
}

/// Fixed set of assignments, loaded once at startup.
#[derive(Clone, Debug, Default)]
pub struct StaticAssignments {
    pairs: HashSet<(ActorId, PatientRef)>,
}

impl StaticAssignments {
    pub fn new(assignments: impl IntoIterator<Item = Assignment>) -> Self {
        Self {
            pairs: assignments
                .into_iter()
                .map(|a| (a.clinician, a.patient))
                .collect(),
        }
    }

    /// Loads a YAML sequence of `{clinician, patient}` entries.
    ///
    /// # Errors
    ///
    /// Returns `ClinicalError::Io` if the file cannot be read, or `ClinicalError::Yaml` if it is
    /// not a list of assignments.
    pub fn from_yaml_file(path: &Path) -> ClinicalResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        let assignments: Vec<Assignment> = serde_yaml::from_str(&yaml)?;
        Ok(Self::new(assignments))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl AssignmentDirectory for StaticAssignments {
    fn is_primary_clinician(&self, clinician: &ActorId, patient: &PatientRef) -> bool {
        self.pairs.contains(&(clinician.clone(), patient.clone()))
    }
}
