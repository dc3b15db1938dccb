use crate::dto::HealthRes;

/// Simple health service shared by every API surface
///
/// Reports that the process is up. It does not probe storage or the audit sink.
#[derive(Clone, Default)]
pub struct HealthService;

impl HealthService {
    pub fn new() -> Self {
        Self
    }

    /// Static method to check health without creating an instance
    ///
    /// # Returns
    /// A `HealthRes` indicating the service is healthy.
    pub fn check_health() -> HealthRes {
        HealthRes {
            ok: true,
            message: "SecureMed is alive".into(),
        }
    }
}
