//! Time-bound access grants.
//!
//! Referrals, break-glass overrides and administrative grants share one [`AccessGrant`] record
//! tagged by [`GrantKind`] and one lifecycle:
//!
//! ```text
//! PENDING ──accept──▶ ACTIVE ──▶ EXPIRED | REVOKED | COMPLETED
//!    │
//!    └──▶ DECLINED | EXPIRED | REVOKED
//! ```
//!
//! There is no background scheduler. Expiry is applied lazily: every access check and every
//! listing sweeps the grantee's grants first, and every single-grant transition expires its
//! grant before deciding. All of this happens under the grant table lock, so a grant is flipped
//! to `EXPIRED` and audited exactly once however many callers race on it.

use crate::actor::{Actor, Capability, Role};
use crate::assignments::AssignmentDirectory;
use crate::audit::{AuditAction, AuditOutcome, AuditTrail, ResourceType};
use crate::constants::{
    ADMIN_GRANT_TTL_DAYS, BREAK_GLASS_TTL_HOURS, MAX_EXTENSION_DAYS, RECENT_INACTIVE_GRANT_LIMIT,
    REFERRAL_TTL_DAYS,
};
use crate::error::{ClinicalError, ClinicalResult};
use crate::ids::{ActorId, GrantId, PatientRef};
use crate::lock;
use crate::orders::Priority;
use crate::validation::optional_text;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantKind {
    Referral,
    BreakGlass,
    AdminGrant,
}

impl GrantKind {
    fn default_ttl(&self) -> Duration {
        match self {
            Self::Referral => Duration::days(REFERRAL_TTL_DAYS),
            Self::BreakGlass => Duration::hours(BREAK_GLASS_TTL_HOURS),
            Self::AdminGrant => Duration::days(ADMIN_GRANT_TTL_DAYS),
        }
    }

    fn creation_action(&self) -> AuditAction {
        match self {
            Self::Referral => AuditAction::PatientReferred,
            Self::BreakGlass => AuditAction::BreakGlassAccess,
            Self::AdminGrant => AuditAction::AdminGrantAccess,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantStatus {
    Pending,
    Active,
    Expired,
    Revoked,
    Completed,
    Declined,
}

impl GrantStatus {
    /// Whether the grant can still become or remain usable.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

/// A permission for `grantee` to read `patient`'s record.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AccessGrant {
    pub id: GrantId,
    pub kind: GrantKind,
    pub grantor: ActorId,
    pub grantee: ActorId,
    pub patient: PatientRef,
    pub justification: Option<String>,
    pub priority: Priority,
    pub issued_at: DateTime<Utc>,
    /// `None` only for permanent administrative grants.
    pub expires_at: Option<DateTime<Utc>>,
    pub status: GrantStatus,
    /// When the grant left the open states.
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<ActorId>,
    pub revocation_reason: Option<String>,
}

impl AccessGrant {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }

    /// The derived `active` flag: `ACTIVE` and not past its expiry.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active && !self.is_expired_at(now)
    }

    fn close(&mut self, status: GrantStatus, by: &ActorId, now: DateTime<Utc>) {
        self.status = status;
        self.closed_at = Some(now);
        self.closed_by = Some(by.clone());
    }

    fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind,
            "grantor": self.grantor,
            "grantee": self.grantee,
            "patient": self.patient,
            "status": self.status,
            "expires_at": self.expires_at,
        })
    }
}

/// Requested lifetime of a new grant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GrantTtl {
    /// One hour for break-glass, 30 days for referrals, 90 days for admin grants.
    #[default]
    Default,
    Custom(Duration),
    /// No expiry. Admin grants only.
    Permanent,
}

/// Parameters of [`GrantManager::create`].
#[derive(Clone, Debug)]
pub struct GrantRequest {
    pub kind: GrantKind,
    /// Ignored for break-glass, which is always issued to its creator.
    pub grantee: Option<ActorId>,
    pub patient: PatientRef,
    pub justification: Option<String>,
    pub priority: Priority,
    pub ttl: GrantTtl,
    pub awaiting_acceptance: bool,
}

impl GrantRequest {
    pub fn break_glass(patient: PatientRef, justification: impl Into<String>) -> Self {
        Self {
            kind: GrantKind::BreakGlass,
            grantee: None,
            patient,
            justification: Some(justification.into()),
            priority: Priority::Stat,
            ttl: GrantTtl::Default,
            awaiting_acceptance: false,
        }
    }

    pub fn referral(grantee: ActorId, patient: PatientRef, reason: impl Into<String>) -> Self {
        Self {
            kind: GrantKind::Referral,
            grantee: Some(grantee),
            patient,
            justification: Some(reason.into()),
            priority: Priority::Routine,
            ttl: GrantTtl::Default,
            awaiting_acceptance: false,
        }
    }

    pub fn admin(grantee: ActorId, patient: PatientRef, reason: impl Into<String>) -> Self {
        Self {
            kind: GrantKind::AdminGrant,
            grantee: Some(grantee),
            patient,
            justification: Some(reason.into()),
            priority: Priority::Routine,
            ttl: GrantTtl::Default,
            awaiting_acceptance: false,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = GrantTtl::Custom(ttl);
        self
    }

    pub fn permanent(mut self) -> Self {
        self.ttl = GrantTtl::Permanent;
        self
    }

    pub fn awaiting_acceptance(mut self) -> Self {
        self.awaiting_acceptance = true;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// What a clinician currently has access to, and what they recently had.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MyPatients {
    pub active: Vec<AccessGrant>,
    pub pending: Vec<AccessGrant>,
    /// Most recently closed first, at most ten.
    pub recent_inactive: Vec<AccessGrant>,
}

/// Owns every grant and applies the lifecycle rules.
pub struct GrantManager {
    grants: Mutex<HashMap<GrantId, AccessGrant>>,
    assignments: Arc<dyn AssignmentDirectory>,
    audit: AuditTrail,
}

impl GrantManager {
    pub fn new(assignments: Arc<dyn AssignmentDirectory>, audit: AuditTrail) -> Self {
        Self {
            grants: Mutex::new(HashMap::new()),
            assignments,
            audit,
        }
    }

    /// Issues a new grant.
    ///
    /// Break-glass is self-issued by a clinician and needs a justification. Referrals are issued
    /// by a clinician to someone else. Admin grants are issued by admins and are the only kind
    /// that may be permanent. Only referrals may wait for acceptance. Every attempt, refused or
    /// not, is audited with the justification as given.
    ///
    /// # Errors
    ///
    /// `AccessDenied` when the actor may not issue this kind, `Validation` for a bad request.
    pub fn create(&self, actor: &Actor, request: GrantRequest) -> ClinicalResult<AccessGrant> {
        let action = request.kind.creation_action();
        let attempt = serde_json::json!({
            "kind": request.kind,
            "grantee": request.grantee,
            "justification": request.justification,
            "awaiting_acceptance": request.awaiting_acceptance,
        });

        let grant = match self.build_grant(actor, &request) {
            Ok(grant) => grant,
            Err(err) => {
                let outcome = match err {
                    ClinicalError::AccessDenied(_) => AuditOutcome::Denied,
                    _ => AuditOutcome::Failure,
                };
                tracing::warn!(actor = %actor.id, kind = ?request.kind, error = %err, "grant refused");
                self.audit.record(
                    actor,
                    action,
                    ResourceType::Patient,
                    request.patient.to_string(),
                    attempt,
                    outcome,
                )?;
                return Err(err);
            }
        };

        let mut detail = grant.summary();
        detail["grant_id"] = serde_json::json!(grant.id);
        detail["justification"] = serde_json::json!(request.justification);
        self.audit.record(
            actor,
            action,
            ResourceType::Patient,
            grant.patient.to_string(),
            detail,
            AuditOutcome::Success,
        )?;
        lock(&self.grants).insert(grant.id, grant.clone());
        tracing::info!(
            grant = %grant.id,
            kind = ?grant.kind,
            grantee = %grant.grantee,
            status = ?grant.status,
            "grant issued"
        );
        Ok(grant)
    }

    fn build_grant(&self, actor: &Actor, request: &GrantRequest) -> ClinicalResult<AccessGrant> {
        let justification = optional_text("justification", request.justification.as_deref())?;

        let grantee = match request.kind {
            GrantKind::BreakGlass => {
                actor.require(Capability::IssueBreakGlass)?;
                if justification.is_none() {
                    return Err(ClinicalError::Validation(
                        "break-glass access requires a justification".into(),
                    ));
                }
                if request.grantee.as_ref().is_some_and(|g| g != &actor.id) {
                    return Err(ClinicalError::Validation(
                        "break-glass access can only be issued to oneself".into(),
                    ));
                }
                actor.id.clone()
            }
            GrantKind::Referral => {
                actor.require(Capability::IssueReferral)?;
                let grantee = request.grantee.clone().ok_or_else(|| {
                    ClinicalError::Validation("referral requires a grantee".into())
                })?;
                if grantee == actor.id {
                    return Err(ClinicalError::Validation(
                        "cannot refer a patient to oneself".into(),
                    ));
                }
                grantee
            }
            GrantKind::AdminGrant => {
                actor.require(Capability::ManageGrants)?;
                request.grantee.clone().ok_or_else(|| {
                    ClinicalError::Validation("admin grant requires a grantee".into())
                })?
            }
        };

        if request.awaiting_acceptance && request.kind != GrantKind::Referral {
            return Err(ClinicalError::Validation(
                "only referrals can await acceptance".into(),
            ));
        }

        let now = Utc::now();
        let expires_at = match request.ttl {
            GrantTtl::Default => Some(expiry_after(now, request.kind.default_ttl())?),
            GrantTtl::Custom(ttl)
                if request.kind == GrantKind::BreakGlass
                    && ttl > Duration::hours(BREAK_GLASS_TTL_HOURS) =>
            {
                return Err(ClinicalError::Validation(format!(
                    "break-glass access lasts at most {} hour(s)",
                    BREAK_GLASS_TTL_HOURS
                )))
            }
            GrantTtl::Custom(ttl) => Some(expiry_after(now, ttl)?),
            GrantTtl::Permanent if request.kind == GrantKind::AdminGrant => None,
            GrantTtl::Permanent => {
                return Err(ClinicalError::Validation(
                    "only admin grants can be permanent".into(),
                ))
            }
        };

        Ok(AccessGrant {
            id: GrantId::new(),
            kind: request.kind,
            grantor: actor.id.clone(),
            grantee,
            patient: request.patient.clone(),
            justification,
            priority: request.priority,
            issued_at: now,
            expires_at,
            status: if request.awaiting_acceptance {
                GrantStatus::Pending
            } else {
                GrantStatus::Active
            },
            closed_at: None,
            closed_by: None,
            revocation_reason: None,
        })
    }

    /// Whether `grantee` may currently read `patient`'s record.
    ///
    /// Sweeps the grantee first, then looks for an active unexpired grant for the pair, falling
    /// back to the primary clinician directory.
    pub fn check_access(&self, grantee: &ActorId, patient: &PatientRef) -> ClinicalResult<bool> {
        self.sweep_expired(grantee)?;
        let now = Utc::now();
        let granted = lock(&self.grants)
            .values()
            .any(|g| &g.grantee == grantee && &g.patient == patient && g.is_active_at(now));
        Ok(granted || self.assignments.is_primary_clinician(grantee, patient))
    }

    /// [`Self::check_access`] for an actor, with the answer audited.
    pub fn check(&self, actor: &Actor, patient: &PatientRef) -> ClinicalResult<bool> {
        let allowed = self.check_access(&actor.id, patient)?;
        self.audit.record(
            actor,
            AuditAction::AccessChecked,
            ResourceType::Patient,
            patient.to_string(),
            serde_json::json!({ "allowed": allowed }),
            if allowed {
                AuditOutcome::Success
            } else {
                AuditOutcome::Denied
            },
        )?;
        Ok(allowed)
    }

    /// Flips every open grant of `grantee` that is past its expiry to `EXPIRED`.
    ///
    /// Each flip writes one record attributed to the system actor. Returns how many were flipped.
    pub fn sweep_expired(&self, grantee: &ActorId) -> ClinicalResult<usize> {
        let now = Utc::now();
        let mut grants = lock(&self.grants);
        let mut flipped = 0;
        for grant in grants.values_mut().filter(|g| &g.grantee == grantee) {
            if self.expire_if_due(grant, now)? {
                flipped += 1;
            }
        }
        if flipped > 0 {
            tracing::warn!(%grantee, flipped, "expired grants swept");
        }
        Ok(flipped)
    }

    /// Must be called with the grant table locked.
    fn expire_if_due(&self, grant: &mut AccessGrant, now: DateTime<Utc>) -> ClinicalResult<bool> {
        if !grant.status.is_open() || !grant.is_expired_at(now) {
            return Ok(false);
        }
        let system = Actor::system()?;
        let mut expired = grant.clone();
        expired.close(GrantStatus::Expired, &system.id, now);
        self.audit.record(
            &system,
            AuditAction::GrantAutoExpired,
            ResourceType::Grant,
            expired.id.to_string(),
            expired.summary(),
            AuditOutcome::Success,
        )?;
        *grant = expired;
        Ok(true)
    }

    /// Runs one audited transition on a single grant under the table lock.
    ///
    /// The change is applied to a copy and committed only once its record is written. An unknown id is reported as `AccessDenied`, the same as a grant the actor may not touch.
    fn transition<F>(
        &self,
        actor: &Actor,
        grant_id: &GrantId,
        action: AuditAction,
        apply: F,
    ) -> ClinicalResult<AccessGrant>
    where
        F: FnOnce(&mut AccessGrant, DateTime<Utc>) -> ClinicalResult<serde_json::Value>,
    {
        let now = Utc::now();
        let mut grants = lock(&self.grants);

        let result = match grants.get_mut(grant_id) {
            None => Err(ClinicalError::AccessDenied("grant not available".into())),
            Some(grant) => {
                self.expire_if_due(grant, now)?;
                let mut updated = grant.clone();
                apply(&mut updated, now).map(|detail| (updated, detail))
            }
        };

        match result {
            Ok((updated, mut detail)) => {
                if let Some(extra) = detail.as_object_mut() {
                    if let Some(summary) = updated.summary().as_object() {
                        for (k, v) in summary {
                            extra.entry(k.clone()).or_insert_with(|| v.clone());
                        }
                    }
                }
                self.audit.record(
                    actor,
                    action,
                    ResourceType::Grant,
                    updated.id.to_string(),
                    detail,
                    AuditOutcome::Success,
                )?;
                grants.insert(updated.id, updated.clone());
                tracing::info!(grant = %updated.id, action = ?action, status = ?updated.status, "grant updated");
                Ok(updated)
            }
            Err(err) => {
                let outcome = match err {
                    ClinicalError::AccessDenied(_) => AuditOutcome::Denied,
                    _ => AuditOutcome::Failure,
                };
                self.audit.record(
                    actor,
                    action,
                    ResourceType::Grant,
                    grant_id.to_string(),
                    serde_json::json!({ "error": err.to_string() }),
                    outcome,
                )?;
                Err(err)
            }
        }
    }

    /// Revokes an open grant. Allowed for its grantor and for admins.
    pub fn revoke(
        &self,
        actor: &Actor,
        grant_id: &GrantId,
        reason: Option<&str>,
    ) -> ClinicalResult<AccessGrant> {
        let reason = optional_text("reason", reason)?;
        self.transition(actor, grant_id, AuditAction::GrantRevoked, |grant, now| {
            if grant.grantor != actor.id && !actor.can(Capability::ManageGrants) {
                return Err(ClinicalError::AccessDenied(
                    "only the grantor or an admin can revoke".into(),
                ));
            }
            require_status(grant, &[GrantStatus::Pending, GrantStatus::Active])?;
            grant.close(GrantStatus::Revoked, &actor.id, now);
            grant.revocation_reason = reason.clone();
            Ok(serde_json::json!({ "reason": reason }))
        })
    }

    /// Revokes every open grant of `grantee` for `patient`. Admins only.
    ///
    /// Writes one summary record carrying the count; returns the revoked grants.
    pub fn revoke_all(
        &self,
        actor: &Actor,
        grantee: &ActorId,
        patient: &PatientRef,
        reason: Option<&str>,
    ) -> ClinicalResult<Vec<AccessGrant>> {
        let reason = optional_text("reason", reason)?;
        let target = serde_json::json!({ "grantee": grantee, "patient": patient, "reason": reason });

        if let Err(err) = actor.require(Capability::ManageGrants) {
            self.audit.record(
                actor,
                AuditAction::AdminRevokeAccess,
                ResourceType::Patient,
                patient.to_string(),
                target,
                AuditOutcome::Denied,
            )?;
            return Err(err);
        }

        let now = Utc::now();
        let mut grants = lock(&self.grants);
        let mut revoked = Vec::new();
        for grant in grants
            .values_mut()
            .filter(|g| &g.grantee == grantee && &g.patient == patient)
        {
            if self.expire_if_due(grant, now)? || !grant.status.is_open() {
                continue;
            }
            let mut closed = grant.clone();
            closed.close(GrantStatus::Revoked, &actor.id, now);
            closed.revocation_reason = reason.clone();
            revoked.push(closed);
        }

        let mut detail = target;
        detail["count"] = serde_json::json!(revoked.len());
        detail["grant_ids"] = serde_json::json!(revoked.iter().map(|g| g.id).collect::<Vec<_>>());
        self.audit.record(
            actor,
            AuditAction::AdminRevokeAccess,
            ResourceType::Patient,
            patient.to_string(),
            detail,
            AuditOutcome::Success,
        )?;
        for closed in &revoked {
            grants.insert(closed.id, closed.clone());
        }
        drop(grants);
        tracing::warn!(%grantee, %patient, count = revoked.len(), "grants bulk revoked");
        Ok(revoked)
    }

    /// Moves an active grant's expiry to `now + days`. Grantee only, 1 to 365 days.
    pub fn extend(&self, actor: &Actor, grant_id: &GrantId, days: i64) -> ClinicalResult<AccessGrant> {
        self.transition(actor, grant_id, AuditAction::GrantExtended, |grant, now| {
            if grant.grantee != actor.id {
                return Err(ClinicalError::AccessDenied(
                    "only the grantee can extend a grant".into(),
                ));
            }
            if !(1..=MAX_EXTENSION_DAYS).contains(&days) {
                return Err(ClinicalError::Validation(format!(
                    "extension must be between 1 and {} days",
                    MAX_EXTENSION_DAYS
                )));
            }
            require_status(grant, &[GrantStatus::Active])?;
            let previous = grant.expires_at.ok_or_else(|| {
                ClinicalError::Conflict("permanent grants cannot be extended".into())
            })?;
            grant.expires_at = Some(now + Duration::days(days));
            Ok(serde_json::json!({ "previous_expiry": previous, "days": days }))
        })
    }

    /// Accepts a pending referral. Grantee only.
    pub fn accept(&self, actor: &Actor, grant_id: &GrantId) -> ClinicalResult<AccessGrant> {
        self.transition(actor, grant_id, AuditAction::GrantAccepted, |grant, _| {
            require_grantee(grant, actor)?;
            require_status(grant, &[GrantStatus::Pending])?;
            grant.status = GrantStatus::Active;
            Ok(serde_json::json!({}))
        })
    }

    /// Declines a pending referral. Grantee only.
    pub fn decline(
        &self,
        actor: &Actor,
        grant_id: &GrantId,
        reason: Option<&str>,
    ) -> ClinicalResult<AccessGrant> {
        let reason = optional_text("reason", reason)?;
        self.transition(actor, grant_id, AuditAction::GrantDeclined, |grant, now| {
            require_grantee(grant, actor)?;
            require_status(grant, &[GrantStatus::Pending])?;
            grant.close(GrantStatus::Declined, &actor.id, now);
            Ok(serde_json::json!({ "reason": reason }))
        })
    }

    /// Marks an active grant as no longer needed. Grantor or grantee.
    pub fn complete(&self, actor: &Actor, grant_id: &GrantId) -> ClinicalResult<AccessGrant> {
        self.transition(actor, grant_id, AuditAction::GrantCompleted, |grant, now| {
            if grant.grantee != actor.id && grant.grantor != actor.id {
                return Err(ClinicalError::AccessDenied(
                    "only the grantor or grantee can complete a grant".into(),
                ));
            }
            require_status(grant, &[GrantStatus::Active])?;
            grant.close(GrantStatus::Completed, &actor.id, now);
            Ok(serde_json::json!({}))
        })
    }

    /// The actor's active and pending grants plus the ten most recently closed ones.
    pub fn my_patients(&self, actor: &Actor) -> ClinicalResult<MyPatients> {
        self.sweep_expired(&actor.id)?;
        let now = Utc::now();

        let mut mine = MyPatients::default();
        let mut inactive = Vec::new();
        for grant in lock(&self.grants).values().filter(|g| g.grantee == actor.id) {
            match grant.status {
                GrantStatus::Active if grant.is_active_at(now) => mine.active.push(grant.clone()),
                GrantStatus::Pending => mine.pending.push(grant.clone()),
                _ => inactive.push(grant.clone()),
            }
        }

        mine.active.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        mine.pending.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        inactive.sort_by_key(|g| std::cmp::Reverse(g.closed_at.unwrap_or(g.issued_at)));
        inactive.truncate(RECENT_INACTIVE_GRANT_LIMIT);
        mine.recent_inactive = inactive;
        Ok(mine)
    }

    /// Whether `actor` may read clinical material for `patient`.
    ///
    /// `owner` is the ordering clinician of the material, if any; owners always pass.
    pub(crate) fn can_read(
        &self,
        actor: &Actor,
        patient: &PatientRef,
        owner: Option<&ActorId>,
    ) -> ClinicalResult<bool> {
        if actor.role == Role::System {
            return Ok(false);
        }
        if owner == Some(&actor.id) {
            return Ok(true);
        }
        self.check_access(&actor.id, patient)
    }
}

fn require_grantee(grant: &AccessGrant, actor: &Actor) -> ClinicalResult<()> {
    if grant.grantee == actor.id {
        Ok(())
    } else {
        Err(ClinicalError::AccessDenied(
            "only the grantee can respond to a grant".into(),
        ))
    }
}

fn require_status(grant: &AccessGrant, allowed: &[GrantStatus]) -> ClinicalResult<()> {
    if allowed.contains(&grant.status) {
        Ok(())
    } else {
        Err(ClinicalError::Conflict(format!(
            "grant is {:?}",
            grant.status
        )))
    }
}

fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> ClinicalResult<DateTime<Utc>> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| ClinicalError::Validation("grant lifetime is out of range".into()))
}

impl std::fmt::Debug for GrantManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantManager")
            .field("grants", &lock(&self.grants).len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignments::{Assignment, StaticAssignments};
    use crate::audit::{AuditSink, FlakyAuditSink};

    fn actor(id: &str, role: Role) -> Actor {
        Actor::new(id, format!("{} name", id), role).unwrap()
    }

    fn patient(id: &str) -> PatientRef {
        PatientRef::new(id).unwrap()
    }

    fn manager() -> (GrantManager, AuditTrail) {
        let audit = AuditTrail::in_memory();
        (
            GrantManager::new(Arc::new(StaticAssignments::default()), audit.clone()),
            audit,
        )
    }

    fn count(audit: &AuditTrail, action: AuditAction) -> usize {
        audit
            .all()
            .unwrap()
            .iter()
            .filter(|r| r.action == action)
            .count()
    }

    #[test]
    fn break_glass_grants_one_hour_of_access() {
        let (grants, audit) = manager();
        let dr = actor("dr-1", Role::Clinician);
        let p = patient("p-1");

        assert!(!grants.check_access(&dr.id, &p).unwrap());
        let grant = grants
            .create(&dr, GrantRequest::break_glass(p.clone(), "patient unconscious in A&E"))
            .unwrap();

        assert_eq!(grant.grantee, dr.id);
        assert_eq!(grant.status, GrantStatus::Active);
        let ttl = grant.expires_at.unwrap() - grant.issued_at;
        assert_eq!(ttl, Duration::hours(1));
        assert!(grants.check_access(&dr.id, &p).unwrap());

        let records = audit.all().unwrap();
        assert_eq!(records[0].action, AuditAction::BreakGlassAccess);
        assert_eq!(records[0].detail["justification"], "patient unconscious in A&E");
    }

    #[test]
    fn break_glass_without_justification_is_refused_and_audited() {
        let (grants, audit) = manager();
        let dr = actor("dr-1", Role::Clinician);

        let err = grants
            .create(&dr, GrantRequest::break_glass(patient("p-1"), "   "))
            .unwrap_err();
        assert!(matches!(err, ClinicalError::Validation(_)));

        let records = audit.all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Failure);
        assert_eq!(records[0].detail["justification"], "   ");
    }

    #[test]
    fn role_rules_for_issuing() {
        let (grants, audit) = manager();
        let tech = actor("t-1", Role::Technician);
        let dr = actor("dr-1", Role::Clinician);

        let err = grants
            .create(&tech, GrantRequest::break_glass(patient("p-1"), "because"))
            .unwrap_err();
        assert!(matches!(err, ClinicalError::AccessDenied(_)));

        let err = grants
            .create(&dr, GrantRequest::admin(actor("dr-2", Role::Clinician).id, patient("p-1"), "x"))
            .unwrap_err();
        assert!(matches!(err, ClinicalError::AccessDenied(_)));

        let err = grants
            .create(&dr, GrantRequest::referral(dr.id.clone(), patient("p-1"), "self"))
            .unwrap_err();
        assert!(matches!(err, ClinicalError::Validation(_)));

        assert_eq!(
            audit
                .all()
                .unwrap()
                .iter()
                .filter(|r| r.outcome == AuditOutcome::Denied)
                .count(),
            2
        );
    }

    #[test]
    fn only_admin_grants_may_be_permanent() {
        let (grants, _) = manager();
        let admin = actor("adm", Role::Admin);
        let dr = actor("dr-1", Role::Clinician);
        let dr2 = actor("dr-2", Role::Clinician);

        let permanent = grants
            .create(&admin, GrantRequest::admin(dr2.id.clone(), patient("p-1"), "cover").permanent())
            .unwrap();
        assert_eq!(permanent.expires_at, None);
        assert!(permanent.is_active_at(Utc::now() + Duration::days(10_000)));

        let err = grants
            .create(&dr, GrantRequest::referral(dr2.id.clone(), patient("p-1"), "x").permanent())
            .unwrap_err();
        assert!(matches!(err, ClinicalError::Validation(_)));
    }

    #[test]
    fn negative_ttl_grant_is_never_active_and_swept_once() {
        let (grants, audit) = manager();
        let dr = actor("dr-1", Role::Clinician);
        let dr2 = actor("dr-2", Role::Clinician);
        let p = patient("p-1");

        let grant = grants
            .create(
                &dr,
                GrantRequest::referral(dr2.id.clone(), p.clone(), "cardiology")
                    .with_ttl(Duration::seconds(-1)),
            )
            .unwrap();
        assert!(!grant.is_active_at(Utc::now()));

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    assert!(!grants.check_access(&dr2.id, &p).unwrap());
                });
            }
        });
        assert_eq!(grants.sweep_expired(&dr2.id).unwrap(), 0);

        assert_eq!(count(&audit, AuditAction::GrantAutoExpired), 1);
        let expired = audit
            .all()
            .unwrap()
            .into_iter()
            .find(|r| r.action == AuditAction::GrantAutoExpired)
            .unwrap();
        assert_eq!(expired.actor_id, "SYSTEM");
        assert_eq!(expired.actor_role, Role::System);

        let mine = grants.my_patients(&dr2).unwrap();
        assert!(mine.active.is_empty());
        assert_eq!(mine.recent_inactive[0].status, GrantStatus::Expired);
    }

    #[test]
    fn transition_on_expired_grant_flips_it_first() {
        let (grants, audit) = manager();
        let dr = actor("dr-1", Role::Clinician);
        let dr2 = actor("dr-2", Role::Clinician);

        let grant = grants
            .create(
                &dr,
                GrantRequest::referral(dr2.id.clone(), patient("p-1"), "x")
                    .with_ttl(Duration::seconds(-5)),
            )
            .unwrap();

        let err = grants.extend(&dr2, &grant.id, 10).unwrap_err();
        assert!(matches!(err, ClinicalError::Conflict(_)));
        assert_eq!(count(&audit, AuditAction::GrantAutoExpired), 1);
    }

    #[test]
    fn pending_referral_lifecycle() {
        let (grants, _) = manager();
        let dr = actor("dr-1", Role::Clinician);
        let dr2 = actor("dr-2", Role::Clinician);
        let p = patient("p-1");

        let grant = grants
            .create(
                &dr,
                GrantRequest::referral(dr2.id.clone(), p.clone(), "second opinion")
                    .awaiting_acceptance()
                    .with_priority(Priority::Urgent),
            )
            .unwrap();
        assert_eq!(grant.status, GrantStatus::Pending);
        assert!(!grants.check_access(&dr2.id, &p).unwrap());
        assert_eq!(grants.my_patients(&dr2).unwrap().pending.len(), 1);

        let err = grants.accept(&dr, &grant.id).unwrap_err();
        assert!(matches!(err, ClinicalError::AccessDenied(_)));

        let accepted = grants.accept(&dr2, &grant.id).unwrap();
        assert_eq!(accepted.status, GrantStatus::Active);
        assert!(grants.check_access(&dr2.id, &p).unwrap());

        let err = grants.decline(&dr2, &grant.id, None).unwrap_err();
        assert!(matches!(err, ClinicalError::Conflict(_)));

        let done = grants.complete(&dr, &grant.id).unwrap();
        assert_eq!(done.status, GrantStatus::Completed);
        assert_eq!(done.closed_by.as_ref(), Some(&dr.id));
        assert!(!grants.check_access(&dr2.id, &p).unwrap());
    }

    #[test]
    fn decline_closes_pending_referral() {
        let (grants, _) = manager();
        let dr = actor("dr-1", Role::Clinician);
        let dr2 = actor("dr-2", Role::Clinician);

        let grant = grants
            .create(
                &dr,
                GrantRequest::referral(dr2.id.clone(), patient("p-1"), "x").awaiting_acceptance(),
            )
            .unwrap();
        let declined = grants.decline(&dr2, &grant.id, Some("no capacity")).unwrap();
        assert_eq!(declined.status, GrantStatus::Declined);
        assert!(declined.closed_at.is_some());
    }

    #[test]
    fn extend_rules() {
        let (grants, _) = manager();
        let dr = actor("dr-1", Role::Clinician);
        let dr2 = actor("dr-2", Role::Clinician);

        let grant = grants
            .create(&dr, GrantRequest::referral(dr2.id.clone(), patient("p-1"), "x"))
            .unwrap();

        assert!(matches!(
            grants.extend(&dr, &grant.id, 10),
            Err(ClinicalError::AccessDenied(_))
        ));
        assert!(matches!(
            grants.extend(&dr2, &grant.id, 0),
            Err(ClinicalError::Validation(_))
        ));
        assert!(matches!(
            grants.extend(&dr2, &grant.id, 366),
            Err(ClinicalError::Validation(_))
        ));

        let extended = grants.extend(&dr2, &grant.id, 365).unwrap();
        let remaining = extended.expires_at.unwrap() - Utc::now();
        assert!(remaining > Duration::days(364));
    }

    #[test]
    fn revoke_by_grantor_or_admin_only() {
        let (grants, audit) = manager();
        let dr = actor("dr-1", Role::Clinician);
        let dr2 = actor("dr-2", Role::Clinician);
        let admin = actor("adm", Role::Admin);
        let p = patient("p-1");

        let grant = grants
            .create(&dr, GrantRequest::referral(dr2.id.clone(), p.clone(), "x"))
            .unwrap();

        assert!(matches!(
            grants.revoke(&dr2, &grant.id, None),
            Err(ClinicalError::AccessDenied(_))
        ));

        let revoked = grants.revoke(&admin, &grant.id, Some("left the trust")).unwrap();
        assert_eq!(revoked.status, GrantStatus::Revoked);
        assert_eq!(revoked.revocation_reason.as_deref(), Some("left the trust"));
        assert!(!grants.check_access(&dr2.id, &p).unwrap());

        let last = audit.all().unwrap().pop().unwrap();
        assert_eq!(last.action, AuditAction::GrantRevoked);
        assert_eq!(last.actor_id, "adm");
        assert_eq!(last.detail["reason"], "left the trust");
    }

    #[test]
    fn unknown_grant_is_access_denied() {
        let (grants, _) = manager();
        let dr = actor("dr-1", Role::Clinician);
        assert!(matches!(
            grants.complete(&dr, &GrantId::new()),
            Err(ClinicalError::AccessDenied(_))
        ));
    }

    #[test]
    fn revoke_all_closes_every_open_grant_for_pair() {
        let (grants, audit) = manager();
        let dr = actor("dr-1", Role::Clinician);
        let dr2 = actor("dr-2", Role::Clinician);
        let admin = actor("adm", Role::Admin);
        let p = patient("p-1");

        grants
            .create(&dr, GrantRequest::referral(dr2.id.clone(), p.clone(), "a"))
            .unwrap();
        grants
            .create(&dr2, GrantRequest::break_glass(p.clone(), "emergency"))
            .unwrap();
        grants
            .create(&dr, GrantRequest::referral(dr2.id.clone(), patient("p-2"), "b"))
            .unwrap();

        assert!(matches!(
            grants.revoke_all(&dr, &dr2.id, &p, None),
            Err(ClinicalError::AccessDenied(_))
        ));

        let revoked = grants.revoke_all(&admin, &dr2.id, &p, Some("audit finding")).unwrap();
        assert_eq!(revoked.len(), 2);
        assert!(!grants.check_access(&dr2.id, &p).unwrap());
        assert!(grants.check_access(&dr2.id, &patient("p-2")).unwrap());

        let summary = audit
            .all()
            .unwrap()
            .into_iter()
            .filter(|r| r.action == AuditAction::AdminRevokeAccess)
            .last()
            .unwrap();
        assert_eq!(summary.detail["count"], 2);
    }

    #[test]
    fn primary_clinician_has_access_without_grant() {
        let audit = AuditTrail::in_memory();
        let directory = StaticAssignments::new([Assignment {
            clinician: ActorId::new("dr-1").unwrap(),
            patient: patient("p-1"),
        }]);
        let grants = GrantManager::new(Arc::new(directory), audit);
        let dr = actor("dr-1", Role::Clinician);

        assert!(grants.check(&dr, &patient("p-1")).unwrap());
        assert!(!grants.check(&dr, &patient("p-2")).unwrap());
    }

    #[test]
    fn recent_inactive_is_capped() {
        let (grants, _) = manager();
        let dr = actor("dr-1", Role::Clinician);
        let dr2 = actor("dr-2", Role::Clinician);

        for i in 0..(RECENT_INACTIVE_GRANT_LIMIT + 3) {
            let grant = grants
                .create(&dr, GrantRequest::referral(dr2.id.clone(), patient(&format!("p-{}", i)), "x"))
                .unwrap();
            grants.complete(&dr2, &grant.id).unwrap();
        }
        grants
            .create(&dr, GrantRequest::referral(dr2.id.clone(), patient("p-live"), "x"))
            .unwrap();

        let mine = grants.my_patients(&dr2).unwrap();
        assert_eq!(mine.active.len(), 1);
        assert_eq!(mine.recent_inactive.len(), RECENT_INACTIVE_GRANT_LIMIT);
    }

    #[test]
    fn out_of_range_lifetime_is_rejected_not_overflowed() {
        let (grants, audit) = manager();
        let dr = actor("dr-1", Role::Clinician);
        let dr2 = actor("dr-2", Role::Clinician);

        let err = grants
            .create(
                &dr,
                GrantRequest::referral(dr2.id.clone(), patient("p-1"), "x")
                    .with_ttl(Duration::days(1_000_000_000)),
            )
            .unwrap_err();
        assert!(matches!(err, ClinicalError::Validation(_)));
        assert!(!grants.check_access(&dr2.id, &patient("p-1")).unwrap());
        assert_eq!(audit.all().unwrap()[0].outcome, AuditOutcome::Failure);
    }

    #[test]
    fn break_glass_lifetime_is_capped() {
        let (grants, _) = manager();
        let dr = actor("dr-1", Role::Clinician);
        let p = patient("p-1");

        let err = grants
            .create(
                &dr,
                GrantRequest::break_glass(p.clone(), "arrest").with_ttl(Duration::days(30)),
            )
            .unwrap_err();
        assert!(matches!(err, ClinicalError::Validation(_)));
        assert!(!grants.check_access(&dr.id, &p).unwrap());

        let short = grants
            .create(
                &dr,
                GrantRequest::break_glass(p.clone(), "arrest").with_ttl(Duration::minutes(15)),
            )
            .unwrap();
        assert_eq!(short.expires_at.unwrap() - short.issued_at, Duration::minutes(15));
    }

    #[test]
    fn failed_audit_write_leaves_grants_untouched() {
        let sink = Arc::new(FlakyAuditSink::default());
        let grants = GrantManager::new(
            Arc::new(StaticAssignments::default()),
            AuditTrail::new(sink.clone()),
        );
        let dr = actor("dr-1", Role::Clinician);
        let dr2 = actor("dr-2", Role::Clinician);
        let admin = actor("admin-1", Role::Admin);
        let p = patient("p-1");

        sink.set_failing(true);
        assert!(grants
            .create(&dr, GrantRequest::break_glass(p.clone(), "arrest"))
            .is_err());
        sink.set_failing(false);
        assert!(!grants.check_access(&dr.id, &p).unwrap());

        let grant = grants
            .create(&dr, GrantRequest::referral(dr2.id.clone(), p.clone(), "x"))
            .unwrap();

        sink.set_failing(true);
        assert!(grants.revoke(&dr, &grant.id, Some("done")).is_err());
        assert!(grants.revoke_all(&admin, &dr2.id, &p, None).is_err());
        sink.set_failing(false);

        assert!(grants.check_access(&dr2.id, &p).unwrap());
        assert_eq!(grants.my_patients(&dr2).unwrap().active[0].status, GrantStatus::Active);
    }

    #[test]
    fn failed_audit_write_leaves_expiry_for_next_sweep() {
        let sink = Arc::new(FlakyAuditSink::default());
        let grants = GrantManager::new(
            Arc::new(StaticAssignments::default()),
            AuditTrail::new(sink.clone()),
        );
        let dr = actor("dr-1", Role::Clinician);
        let dr2 = actor("dr-2", Role::Clinician);

        grants
            .create(
                &dr,
                GrantRequest::referral(dr2.id.clone(), patient("p-1"), "x")
                    .with_ttl(Duration::seconds(-1)),
            )
            .unwrap();

        sink.set_failing(true);
        assert!(grants.sweep_expired(&dr2.id).is_err());
        sink.set_failing(false);

        assert_eq!(grants.sweep_expired(&dr2.id).unwrap(), 1);
        let expired = sink
            .load()
            .unwrap()
            .into_iter()
            .filter(|r| r.action == AuditAction::GrantAutoExpired)
            .count();
        assert_eq!(expired, 1);
    }
}
