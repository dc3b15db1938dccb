//! Blinded processing worklist.
//!
//! Lab staff see samples, not patients. [`WorkItem`] carries the synthetic sample id, the test
//! and its priority, and nothing that identifies the patient.

use crate::actor::{Actor, Capability};
use crate::audit::{AuditAction, AuditOutcome, AuditTrail, ResourceType};
use crate::error::{ClinicalError, ClinicalResult};
use crate::ids::{ActorId, OrderId, PatientRef, TestCode};
use crate::notify::{
    dispatch_critical_alert, notify_results_available, notify_results_ready, NotificationPort,
};
use crate::orders::{OrderBook, OrderStatus, Priority, ResultFlag, TestResult};
use crate::validation::{optional_text, required_text};
use chrono::Utc;
use std::sync::Arc;

/// One unresulted test on an open order.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct WorkItem {
    pub sample_id: String,
    pub order_id: OrderId,
    pub test_code: TestCode,
    pub test_name: String,
    pub priority: Priority,
    pub fasting_required: bool,
    pub status: OrderStatus,
}

/// A result as entered by a technician.
#[derive(Clone, Debug)]
pub struct ResultSubmission {
    pub order_id: OrderId,
    pub test_code: TestCode,
    pub value: String,
    pub reference_range: Option<String>,
    pub units: Option<String>,
    /// When absent, HIGH/LOW is derived from a numeric value and range.
    pub flag: Option<ResultFlag>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmittedResult {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub flag: Option<ResultFlag>,
}

pub struct Worklist {
    orders: Arc<OrderBook>,
    audit: AuditTrail,
    notifier: Arc<dyn NotificationPort>,
}

impl Worklist {
    pub fn new(
        orders: Arc<OrderBook>,
        audit: AuditTrail,
        notifier: Arc<dyn NotificationPort>,
    ) -> Self {
        Self {
            orders,
            audit,
            notifier,
        }
    }

    /// Unresulted tests on open orders, STAT first, then URGENT, then ROUTINE, oldest first
    /// within each priority.
    pub fn list_pending(&self, actor: &Actor) -> ClinicalResult<Vec<WorkItem>> {
        if let Err(err) = actor.require(Capability::ProcessSamples) {
            self.audit.record(
                actor,
                AuditAction::WorklistViewed,
                ResourceType::Worklist,
                "pending",
                serde_json::Value::Null,
                AuditOutcome::Denied,
            )?;
            return Err(err);
        }

        let mut entries = self.orders.snapshot();
        entries.retain(|e| !e.order.status.is_terminal());
        entries.sort_by_key(|e| (e.order.priority.rank(), e.order.created_at, e.order.sequence));

        let items: Vec<WorkItem> = entries
            .iter()
            .flat_map(|entry| {
                entry.unresulted_tests().map(move |test| WorkItem {
                    sample_id: entry.order.sample_id.clone(),
                    order_id: entry.order.id,
                    test_code: test.code.clone(),
                    test_name: test.name.clone(),
                    priority: entry.order.priority,
                    fasting_required: test.fasting_required,
                    status: entry.order.status,
                })
            })
            .collect();

        self.audit.record(
            actor,
            AuditAction::WorklistViewed,
            ResourceType::Worklist,
            "pending",
            serde_json::json!({ "items": items.len() }),
            AuditOutcome::Success,
        )?;
        Ok(items)
    }

    /// Records a structured result for one test of an order.
    ///
    /// The duplicate check, insert, status change and audit records happen under the order's
    /// lock; if the records cannot be written the order is left as it was. A completed order
    /// notifies the ordering clinician (marked abnormal if any result is flagged) and the patient,
    /// once. A `CRITICAL` flag alerts the ordering clinician separately; a failed alert is logged
    /// and audited but does not undo the result.
    ///
    /// # Errors
    ///
    /// `AccessDenied` for non-lab roles, `Validation` for a blank value or a test the order does
    /// not request, `Conflict` for a duplicate result or a cancelled order, `NotFound` for an
    /// unknown order.
    pub fn submit_result(
        &self,
        actor: &Actor,
        submission: ResultSubmission,
    ) -> ClinicalResult<SubmittedResult> {
        let order_id = submission.order_id;
        let test_code = submission.test_code.clone();

        let outcome = actor
            .require(Capability::ProcessSamples)
            .and_then(|_| self.apply_result(actor, submission));

        let applied = match outcome {
            Ok(applied) => applied,
            Err(err) => {
                let audit_outcome = match err {
                    ClinicalError::AccessDenied(_) => AuditOutcome::Denied,
                    _ => AuditOutcome::Failure,
                };
                tracing::warn!(order = %order_id, test = %test_code, error = %err, "result rejected");
                self.audit.record(
                    actor,
                    AuditAction::ResultSubmitted,
                    ResourceType::TestResult,
                    order_id.to_string(),
                    serde_json::json!({ "test_code": test_code, "error": err.to_string() }),
                    audit_outcome,
                )?;
                return Err(err);
            }
        };

        if applied.completed_now {
            tracing::info!(order = %order_id, "order completed");
            notify_results_available(
                self.notifier.as_ref(),
                applied.ordering_clinician.as_ref(),
                &applied.sample_id,
                "all requested tests resulted",
                applied.any_abnormal,
            );
            notify_results_ready(self.notifier.as_ref(), &applied.patient, &applied.sample_id);
        }

        if applied.flag == Some(ResultFlag::Critical) {
            dispatch_critical_alert(
                self.notifier.as_ref(),
                &self.audit,
                actor,
                &order_id,
                &applied.sample_id,
                applied.ordering_clinician.as_ref(),
                &format!("{} = {}", test_code, applied.value),
            )?;
        }

        Ok(SubmittedResult {
            order_id,
            status: applied.status,
            flag: applied.flag,
        })
    }

    fn apply_result(&self, actor: &Actor, submission: ResultSubmission) -> ClinicalResult<Applied> {
        let value = required_text("value", &submission.value)?.into_inner();
        let reference_range =
            optional_text("reference_range", submission.reference_range.as_deref())?;
        let units = optional_text("units", submission.units.as_deref())?;
        let notes = optional_text("notes", submission.notes.as_deref())?;
        let flag = submission
            .flag
            .or_else(|| derive_flag(&value, reference_range.as_deref()));

        self.orders.with_order(&submission.order_id, |entry| {
            let before = entry.clone();
            let was_completed = entry.order.status == OrderStatus::Completed;
            let status = entry.record_result(TestResult {
                order_id: submission.order_id,
                test_code: submission.test_code.clone(),
                value: value.clone(),
                reference_range,
                units,
                flag,
                notes,
                technician: actor.id.clone(),
                processed_at: Utc::now(),
            })?;
            let applied = Applied {
                status,
                flag,
                value,
                completed_now: !was_completed && status == OrderStatus::Completed,
                any_abnormal: entry.results.values().any(|r| r.flag.is_some()),
                sample_id: entry.order.sample_id.clone(),
                patient: entry.order.patient.clone(),
                ordering_clinician: entry.order.ordering_clinician.clone(),
            };
            if let Err(err) = self.audit_applied(actor, &submission, &applied) {
                *entry = before;
                return Err(err);
            }
            Ok(applied)
        })
    }

    /// Writes the records for an applied result while the order is still locked.
    fn audit_applied(
        &self,
        actor: &Actor,
        submission: &ResultSubmission,
        applied: &Applied,
    ) -> ClinicalResult<()> {
        self.audit.record(
            actor,
            AuditAction::ResultSubmitted,
            ResourceType::TestResult,
            submission.order_id.to_string(),
            serde_json::json!({
                "sample_id": applied.sample_id,
                "test_code": submission.test_code,
                "flag": applied.flag,
                "status": applied.status,
            }),
            AuditOutcome::Success,
        )?;
        if applied.completed_now {
            self.audit.record(
                actor,
                AuditAction::OrderCompleted,
                ResourceType::Order,
                submission.order_id.to_string(),
                serde_json::json!({ "sample_id": applied.sample_id }),
                AuditOutcome::Success,
            )?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Worklist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worklist").finish_non_exhaustive()
    }
}

struct Applied {
    status: OrderStatus,
    flag: Option<ResultFlag>,
    value: String,
    completed_now: bool,
    /// Any result on the order carries a flag.
    any_abnormal: bool,
    sample_id: String,
    patient: PatientRef,
    ordering_clinician: Option<ActorId>,
}

/// Derives HIGH or LOW from a numeric value and a numeric reference range.
///
/// Accepted ranges are `low-high` (either bound may be negative), `<x` and `>x`, each optionally
/// followed by units. Anything non-numeric yields no flag.
pub fn derive_flag(value: &str, reference_range: Option<&str>) -> Option<ResultFlag> {
    let value = leading_number(value)?;
    let range = reference_range?.trim();

    if let Some(upper) = range.strip_prefix('<') {
        let upper = leading_number(upper.trim_start_matches('='))?;
        return (value >= upper).then_some(ResultFlag::High);
    }
    if let Some(lower) = range.strip_prefix('>') {
        let lower = leading_number(lower.trim_start_matches('='))?;
        return (value <= lower).then_some(ResultFlag::Low);
    }

    // Skip a leading sign so "-5-10" splits after the low bound.
    let split = range.char_indices().skip(1).find(|&(_, c)| c == '-')?.0;
    let low = leading_number(&range[..split])?;
    let high = leading_number(&range[split + 1..])?;
    if value < low {
        Some(ResultFlag::Low)
    } else if value > high {
        Some(ResultFlag::High)
    } else {
        None
    }
}

fn leading_number(text: &str) -> Option<f64> {
    text.split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}
