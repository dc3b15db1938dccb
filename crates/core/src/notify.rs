//! Outbound notifications.
//!
//! Real email and SMS transports live outside this crate. Services hand messages to an injected
//! [`NotificationPort`]; the default [`LogNotifier`] simulates delivery through `tracing`.

use crate::actor::Actor;
use crate::audit::{AuditAction, AuditOutcome, AuditTrail, ResourceType};
use crate::error::ClinicalResult;
use crate::ids::{ActorId, OrderId, PatientRef};
use crate::lock;
use std::fmt;
use std::sync::Mutex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    Clinician(ActorId),
    Patient(PatientRef),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clinician(id) => write!(f, "clinician:{}", id),
            Self::Patient(id) => write!(f, "patient:{}", id),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub urgent: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
}

pub trait NotificationPort: Send + Sync {
    fn send(&self, recipient: &Recipient, notification: &Notification) -> DeliveryOutcome;
}

/// Writes simulated email (and SMS for urgent messages) to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl NotificationPort for LogNotifier {
    fn send(&self, recipient: &Recipient, notification: &Notification) -> DeliveryOutcome {
        tracing::info!(
            %recipient,
            subject = %notification.subject,
            "simulated email sent"
        );
        if notification.urgent {
            tracing::warn!(%recipient, subject = %notification.subject, "simulated SMS sent");
        }
        DeliveryOutcome::Delivered
    }
}

/// Records every message it is given. Can be built to fail every delivery.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<(Recipient, Notification)>>,
    fail: bool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    /// Messages handed to the port so far, including failed attempts.
    pub fn sent(&self) -> Vec<(Recipient, Notification)> {
        lock(&self.sent).clone()
    }
}

impl NotificationPort for MemoryNotifier {
    fn send(&self, recipient: &Recipient, notification: &Notification) -> DeliveryOutcome {
        lock(&self.sent).push((recipient.clone(), notification.clone()));
        if self.fail {
            DeliveryOutcome::Failed("delivery disabled".into())
        } else {
            DeliveryOutcome::Delivered
        }
    }
}

/// Sends a critical alert for an order and audits the attempt.
///
/// The alert goes to the ordering clinician. Orders without one still get an attempt against the
/// audit trail so the missing recipient is visible; nothing here can fail the caller's
/// transaction except the audit write itself.
pub(crate) fn dispatch_critical_alert(
    notifier: &dyn NotificationPort,
    audit: &AuditTrail,
    actor: &Actor,
    order_id: &OrderId,
    sample_id: &str,
    ordering_clinician: Option<&ActorId>,
    what: &str,
) -> ClinicalResult<DeliveryOutcome> {
    let outcome = match ordering_clinician {
        Some(clinician) => notifier.send(
            &Recipient::Clinician(clinician.clone()),
            &Notification {
                subject: format!("CRITICAL result for sample {}", sample_id),
                body: format!("A critical value was recorded: {}. Review immediately.", what),
                urgent: true,
            },
        ),
        None => DeliveryOutcome::Failed("order has no ordering clinician".into()),
    };

    let (action, audit_outcome) = match &outcome {
        DeliveryOutcome::Delivered => (AuditAction::CriticalAlertSent, AuditOutcome::Success),
        DeliveryOutcome::Failed(reason) => {
            tracing::error!(order = %order_id, %reason, "critical alert delivery failed");
            (AuditAction::CriticalAlertFailed, AuditOutcome::Failure)
        }
    };

    audit.record(
        actor,
        action,
        ResourceType::Order,
        order_id.to_string(),
        serde_json::json!({
            "sample_id": sample_id,
            "recipient": ordering_clinician.map(|c| c.to_string()),
            "detail": what,
        }),
        audit_outcome,
    )?;
    Ok(outcome)
}

/// Tells the ordering clinician that new results can be reviewed.
///
/// Routine channel, separate from critical alerts. Abnormal results are marked in the subject.
/// Failures are logged, never propagated.
pub(crate) fn notify_results_available(
    notifier: &dyn NotificationPort,
    ordering_clinician: Option<&ActorId>,
    sample_id: &str,
    what: &str,
    abnormal: bool,
) -> DeliveryOutcome {
    let Some(clinician) = ordering_clinician else {
        tracing::debug!(%sample_id, "no ordering clinician to notify");
        return DeliveryOutcome::Failed("order has no ordering clinician".into());
    };
    let marker = if abnormal { "[ABNORMAL] " } else { "" };
    let outcome = notifier.send(
        &Recipient::Clinician(clinician.clone()),
        &Notification {
            subject: format!("{}Results available for sample {}", marker, sample_id),
            body: format!("New results for sample {}: {}.", sample_id, what),
            urgent: false,
        },
    );
    if let DeliveryOutcome::Failed(reason) = &outcome {
        tracing::warn!(%sample_id, %reason, "results-available notification failed");
    }
    outcome
}

/// Tells a patient their results are ready. Failures are logged, never propagated.
pub(crate) fn notify_results_ready(
    notifier: &dyn NotificationPort,
    patient: &PatientRef,
    sample_id: &str,
) -> DeliveryOutcome {
    let outcome = notifier.send(
        &Recipient::Patient(patient.clone()),
        &Notification {
            subject: "Your lab results are ready".into(),
            body: format!("Results for sample {} are available to your care team.", sample_id),
            urgent: false,
        },
    );
    if let DeliveryOutcome::Failed(reason) = &outcome {
        tracing::warn!(%sample_id, %reason, "results-ready notification failed");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Role;

    #[test]
    fn critical_alert_without_clinician_is_audited_as_failure() {
        let audit = AuditTrail::in_memory();
        let notifier = MemoryNotifier::new();
        let tech = Actor::new("t-1", "Tech", Role::Technician).unwrap();
        let order = OrderId::new();

        let outcome =
            dispatch_critical_alert(&notifier, &audit, &tech, &order, "SMP-1", None, "K 7.9")
                .unwrap();

        assert!(matches!(outcome, DeliveryOutcome::Failed(_)));
        assert!(notifier.sent().is_empty());
        let records = audit.all().unwrap();
        assert_eq!(records[0].action, AuditAction::CriticalAlertFailed);
    }

    #[test]
    fn critical_alert_is_urgent_and_addressed_to_clinician() {
        let audit = AuditTrail::in_memory();
        let notifier = MemoryNotifier::new();
        let tech = Actor::new("t-1", "Tech", Role::Technician).unwrap();
        let dr = ActorId::new("dr-9").unwrap();

        dispatch_critical_alert(&notifier, &audit, &tech, &OrderId::new(), "SMP-2", Some(&dr), "K 7.9")
            .unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Recipient::Clinician(dr));
        assert!(sent[0].1.urgent);
        assert_eq!(audit.all().unwrap()[0].action, AuditAction::CriticalAlertSent);
    }

    #[test]
    fn results_available_marks_abnormal_and_stays_routine() {
        let notifier = MemoryNotifier::new();
        let dr = ActorId::new("dr-9").unwrap();

        notify_results_available(&notifier, Some(&dr), "SMP-4", "report uploaded", false);
        notify_results_available(&notifier, Some(&dr), "SMP-4", "report uploaded", true);
        let outcome = notify_results_available(&notifier, None, "SMP-5", "report uploaded", true);

        assert!(matches!(outcome, DeliveryOutcome::Failed(_)));
        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(to, n)| to == &Recipient::Clinician(dr.clone()) && !n.urgent));
        assert!(!sent[0].1.subject.contains("[ABNORMAL]"));
        assert!(sent[1].1.subject.starts_with("[ABNORMAL] "));
    }

    #[test]
    fn failing_notifier_still_records_attempt() {
        let notifier = MemoryNotifier::failing();
        let outcome = notify_results_ready(&notifier, &PatientRef::new("p-1").unwrap(), "SMP-3");
        assert!(matches!(outcome, DeliveryOutcome::Failed(_)));
        assert_eq!(notifier.sent().len(), 1);
    }
}
