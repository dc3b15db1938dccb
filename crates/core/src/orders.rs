//! Clinical orders and their structured results.
//!
//! Every order lives behind its own mutex inside [`OrderBook`]. Anything that reads an order,
//! decides, and writes it back (artifact upload, result submission, cancellation) does so inside
//! [`OrderBook::with_order`], so two requests for the same order never interleave.
//!
//! Status only moves forward:
//!
//! ```text
//! ORDERED ─▶ COLLECTED ─▶ PROCESSING ─▶ COMPLETED
//!    └───────────┴────────────┴──▶ CANCELLED
//! ```

use crate::actor::{Actor, Capability, Role};
use crate::audit::{AuditAction, AuditOutcome, AuditTrail, ResourceType};
use crate::constants::SAMPLE_ID_PREFIX;
use crate::error::{ClinicalError, ClinicalResult};
use crate::grants::GrantManager;
use crate::ids::{ActorId, OrderId, PatientRef, TestCode};
use crate::lock;
use crate::validation::optional_text;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    #[default]
    Routine,
    Urgent,
    Stat,
}

impl Priority {
    /// Sort key: lower is more urgent.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Stat => 0,
            Self::Urgent => 1,
            Self::Routine => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Ordered,
    Collected,
    Processing,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RequestedTest {
    pub code: TestCode,
    pub name: String,
    #[serde(default)]
    pub fasting_required: bool,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClinicalOrder {
    pub id: OrderId,
    /// De-identified label used on tubes and the worklist.
    pub sample_id: String,
    pub patient: PatientRef,
    pub ordering_clinician: Option<ActorId>,
    pub tests: Vec<RequestedTest>,
    pub priority: Priority,
    pub status: OrderStatus,
    pub clinical_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Creation order within this process; breaks ties between equal timestamps.
    pub sequence: u64,
}

impl ClinicalOrder {
    pub fn requests(&self, code: &TestCode) -> bool {
        self.tests.iter().any(|t| &t.code == code)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultFlag {
    High,
    Low,
    Critical,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TestResult {
    pub order_id: OrderId,
    pub test_code: TestCode,
    pub value: String,
    pub reference_range: Option<String>,
    pub units: Option<String>,
    pub flag: Option<ResultFlag>,
    pub notes: Option<String>,
    pub technician: ActorId,
    pub processed_at: DateTime<Utc>,
}

/// An order together with the results entered so far.
#[derive(Clone, Debug)]
pub(crate) struct OrderEntry {
    pub(crate) order: ClinicalOrder,
    pub(crate) results: BTreeMap<TestCode, TestResult>,
}

impl OrderEntry {
    /// Moves ORDERED or COLLECTED to PROCESSING. Returns whether the status changed.
    ///
    /// # Errors
    ///
    /// `Conflict` for a cancelled order.
    pub(crate) fn advance_to_processing(&mut self, now: DateTime<Utc>) -> ClinicalResult<bool> {
        match self.order.status {
            OrderStatus::Ordered | OrderStatus::Collected => {
                self.order.status = OrderStatus::Processing;
                self.order.updated_at = now;
                Ok(true)
            }
            OrderStatus::Processing | OrderStatus::Completed => Ok(false),
            OrderStatus::Cancelled => Err(ClinicalError::Conflict("order is cancelled".into())),
        }
    }

    /// Inserts a result and recomputes the status.
    ///
    /// The first result for a test wins; a second is a `Conflict`.
    pub(crate) fn record_result(&mut self, result: TestResult) -> ClinicalResult<OrderStatus> {
        if self.order.status == OrderStatus::Cancelled {
            return Err(ClinicalError::Conflict("order is cancelled".into()));
        }
        if !self.order.requests(&result.test_code) {
            return Err(ClinicalError::Validation(format!(
                "test '{}' was not requested on this order",
                result.test_code
            )));
        }
        if self.results.contains_key(&result.test_code) {
            return Err(ClinicalError::Conflict(format!(
                "a result for '{}' already exists",
                result.test_code
            )));
        }

        let now = result.processed_at;
        self.results.insert(result.test_code.clone(), result);

        if self.order.tests.iter().all(|t| self.results.contains_key(&t.code)) {
            self.order.status = OrderStatus::Completed;
            self.order.updated_at = now;
        } else {
            self.advance_to_processing(now)?;
        }
        Ok(self.order.status)
    }

    pub(crate) fn unresulted_tests(&self) -> impl Iterator<Item = &RequestedTest> {
        self.order
            .tests
            .iter()
            .filter(|t| !self.results.contains_key(&t.code))
    }
}

/// Input to [`OrderBook::create`].
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub patient: PatientRef,
    pub tests: Vec<RequestedTest>,
    pub priority: Priority,
    pub clinical_notes: Option<String>,
}

/// An order as shown to someone allowed to read it.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderView {
    pub order: ClinicalOrder,
    pub results: Vec<TestResult>,
}

pub struct OrderBook {
    orders: RwLock<HashMap<OrderId, Arc<Mutex<OrderEntry>>>>,
    /// Every sample id handed out, so no two orders share a tube label.
    sample_ids: Mutex<HashSet<String>>,
    sequence: AtomicU64,
    grants: Arc<GrantManager>,
    audit: AuditTrail,
}

impl OrderBook {
    pub fn new(grants: Arc<GrantManager>, audit: AuditTrail) -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            sample_ids: Mutex::new(HashSet::new()),
            sequence: AtomicU64::new(0),
            grants,
            audit,
        }
    }

    /// Places a new order in `ORDERED`.
    ///
    /// A clinician becomes the ordering clinician. Admins may place orders on behalf of the lab,
    /// in which case the order has no ordering clinician.
    ///
    /// # Errors
    ///
    /// `AccessDenied` without the ordering capability; `Validation` for an empty or duplicated
    /// test list or overlong notes.
    pub fn create(&self, actor: &Actor, new_order: NewOrder) -> ClinicalResult<ClinicalOrder> {
        if let Err(err) = actor.require(Capability::OrderTests) {
            self.audit.record(
                actor,
                AuditAction::OrderCreated,
                ResourceType::Patient,
                new_order.patient.to_string(),
                serde_json::Value::Null,
                AuditOutcome::Denied,
            )?;
            return Err(err);
        }

        if new_order.tests.is_empty() {
            return Err(ClinicalError::Validation(
                "an order needs at least one test".into(),
            ));
        }
        let mut seen = HashSet::new();
        for test in &new_order.tests {
            if !seen.insert(&test.code) {
                return Err(ClinicalError::Validation(format!(
                    "test '{}' requested twice",
                    test.code
                )));
            }
            if test.name.trim().is_empty() {
                return Err(ClinicalError::Validation(format!(
                    "test '{}' needs a name",
                    test.code
                )));
            }
        }
        let clinical_notes = optional_text("clinical_notes", new_order.clinical_notes.as_deref())?;

        let (id, sample_id) = self.reserve_sample_id();
        let now = Utc::now();
        let order = ClinicalOrder {
            id,
            sample_id,
            patient: new_order.patient,
            ordering_clinician: (actor.role == Role::Clinician).then(|| actor.id.clone()),
            tests: new_order.tests,
            priority: new_order.priority,
            status: OrderStatus::Ordered,
            clinical_notes,
            created_at: now,
            updated_at: now,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
        };

        let recorded = self.audit.record(
            actor,
            AuditAction::OrderCreated,
            ResourceType::Order,
            id.to_string(),
            serde_json::json!({
                "sample_id": order.sample_id,
                "patient": order.patient,
                "tests": order.tests.iter().map(|t| t.code.as_str()).collect::<Vec<_>>(),
                "priority": order.priority,
            }),
            AuditOutcome::Success,
        );
        if let Err(err) = recorded {
            lock(&self.sample_ids).remove(&order.sample_id);
            return Err(err);
        }

        self.orders
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(
                id,
                Arc::new(Mutex::new(OrderEntry {
                    order: order.clone(),
                    results: BTreeMap::new(),
                })),
            );
        tracing::info!(order = %id, sample = %order.sample_id, priority = ?order.priority, "order created");
        Ok(order)
    }

    /// Draws order ids until one yields a sample id not yet handed out.
    fn reserve_sample_id(&self) -> (OrderId, String) {
        let mut issued = lock(&self.sample_ids);
        loop {
            let id = OrderId::new();
            let sample_id = format!("{}{}", SAMPLE_ID_PREFIX, id.as_shardable().short_code());
            if issued.insert(sample_id.clone()) {
                return (id, sample_id);
            }
            tracing::debug!(%sample_id, "sample id already issued, drawing again");
        }
    }

    /// Runs `f` with the order's mutex held.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, otherwise whatever `f` returns.
    pub(crate) fn with_order<R>(
        &self,
        id: &OrderId,
        f: impl FnOnce(&mut OrderEntry) -> ClinicalResult<R>,
    ) -> ClinicalResult<R> {
        let entry = self
            .orders
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| ClinicalError::NotFound(format!("order {}", id)))?;
        let mut guard = lock(&entry);
        f(&mut guard)
    }

    /// Copies of every order entry, each taken under its own lock.
    pub(crate) fn snapshot(&self) -> Vec<OrderEntry> {
        let entries: Vec<_> = self
            .orders
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        entries.iter().map(|e| lock(e).clone()).collect()
    }

    /// Reads an order and its results.
    ///
    /// Allowed for the ordering clinician and anyone passing the patient access check. An
    /// unknown id and a refusal both come back as `AccessDenied`.
    pub fn view(&self, actor: &Actor, id: &OrderId) -> ClinicalResult<OrderView> {
        let found = self.with_order(id, |entry| {
            Ok(OrderView {
                order: entry.order.clone(),
                results: entry.results.values().cloned().collect(),
            })
        });

        let view = match found {
            Ok(view) => Some(view),
            Err(ClinicalError::NotFound(_)) => None,
            Err(err) => return Err(err),
        };

        let allowed = match &view {
            Some(v) => self.grants.can_read(
                actor,
                &v.order.patient,
                v.order.ordering_clinician.as_ref(),
            )?,
            None => false,
        };

        self.audit.record(
            actor,
            AuditAction::OrderViewed,
            ResourceType::Order,
            id.to_string(),
            serde_json::Value::Null,
            if allowed {
                AuditOutcome::Success
            } else {
                AuditOutcome::Denied
            },
        )?;

        match view {
            Some(view) if allowed => Ok(view),
            _ => {
                tracing::warn!(actor = %actor.id, order = %id, "order view denied");
                Err(ClinicalError::AccessDenied("order not available".into()))
            }
        }
    }

    /// Marks the sample as collected. Lab staff only; only from `ORDERED`.
    pub fn mark_collected(&self, actor: &Actor, id: &OrderId) -> ClinicalResult<ClinicalOrder> {
        let result = actor.require(Capability::ProcessSamples).and_then(|_| {
            self.with_order(id, |entry| match entry.order.status {
                OrderStatus::Ordered => {
                    entry.order.status = OrderStatus::Collected;
                    entry.order.updated_at = Utc::now();
                    Ok(entry.order.clone())
                }
                other => Err(ClinicalError::Conflict(format!(
                    "cannot collect an order that is {:?}",
                    other
                ))),
            })
        });
        self.audit_outcome(actor, AuditAction::OrderCollected, id, &result, serde_json::Value::Null)?;
        result
    }

    /// Cancels an order that is not yet completed. Ordering clinician or admin.
    pub fn cancel(
        &self,
        actor: &Actor,
        id: &OrderId,
        reason: Option<&str>,
    ) -> ClinicalResult<ClinicalOrder> {
        let reason = optional_text("reason", reason)?;
        let result = self.with_order(id, |entry| {
            let is_owner = entry.order.ordering_clinician.as_ref() == Some(&actor.id);
            if !is_owner && actor.role != Role::Admin {
                return Err(ClinicalError::AccessDenied(
                    "only the ordering clinician or an admin can cancel".into(),
                ));
            }
            if entry.order.status.is_terminal() {
                return Err(ClinicalError::Conflict(format!(
                    "order is already {:?}",
                    entry.order.status
                )));
            }
            entry.order.status = OrderStatus::Cancelled;
            entry.order.updated_at = Utc::now();
            Ok(entry.order.clone())
        });
        self.audit_outcome(
            actor,
            AuditAction::OrderCancelled,
            id,
            &result,
            serde_json::json!({ "reason": reason }),
        )?;
        result
    }

    fn audit_outcome<T>(
        &self,
        actor: &Actor,
        action: AuditAction,
        id: &OrderId,
        result: &ClinicalResult<T>,
        detail: serde_json::Value,
    ) -> ClinicalResult<()> {
        let (outcome, detail) = match result {
            Ok(_) => (AuditOutcome::Success, detail),
            Err(ClinicalError::AccessDenied(_)) => (AuditOutcome::Denied, detail),
            Err(err) => (
                AuditOutcome::Failure,
                serde_json::json!({ "error": err.to_string() }),
            ),
        };
        self.audit
            .record(actor, action, ResourceType::Order, id.to_string(), detail, outcome)?;
        Ok(())
    }
}

impl std::fmt::Debug for OrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBook")
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::assignments::StaticAssignments;
    use crate::grants::GrantRequest;

    pub(crate) fn test(code: &str) -> RequestedTest {
        RequestedTest {
            code: TestCode::new(code).unwrap(),
            name: format!("{} panel", code),
            fasting_required: false,
        }
    }

    pub(crate) fn new_order(patient: &str, codes: &[&str], priority: Priority) -> NewOrder {
        NewOrder {
            patient: PatientRef::new(patient).unwrap(),
            tests: codes.iter().map(|c| test(c)).collect(),
            priority,
            clinical_notes: None,
        }
    }

    fn book() -> (OrderBook, Arc<GrantManager>, AuditTrail) {
        let audit = AuditTrail::in_memory();
        let grants = Arc::new(GrantManager::new(
            Arc::new(StaticAssignments::default()),
            audit.clone(),
        ));
        (OrderBook::new(grants.clone(), audit.clone()), grants, audit)
    }

    fn result_for(order: &ClinicalOrder, code: &str) -> TestResult {
        TestResult {
            order_id: order.id,
            test_code: TestCode::new(code).unwrap(),
            value: "5.0".into(),
            reference_range: None,
            units: None,
            flag: None,
            notes: None,
            technician: ActorId::new("t-1").unwrap(),
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn create_assigns_sample_id_and_clinician() {
        let (book, _, _) = book();
        let dr = Actor::new("dr-1", "Dr One", Role::Clinician).unwrap();
        let order = book
            .create(&dr, new_order("p-1", &["CBC"], Priority::Urgent))
            .unwrap();

        assert!(order.sample_id.starts_with("SMP-"));
        assert_eq!(order.sample_id.len(), 16);
        assert_eq!(order.ordering_clinician.as_ref(), Some(&dr.id));
        assert_eq!(order.status, OrderStatus::Ordered);
    }

    #[test]
    fn sample_ids_are_never_reused() {
        let (book, _, _) = book();
        let dr = Actor::new("dr-1", "Dr One", Role::Clinician).unwrap();
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let order = book
                .create(&dr, new_order("p-1", &["CBC"], Priority::Routine))
                .unwrap();
            assert!(seen.insert(order.sample_id));
        }
        assert_eq!(lock(&book.sample_ids).len(), 500);
    }

    #[test]
    fn failed_audit_write_places_no_order() {
        let sink = Arc::new(crate::audit::FlakyAuditSink::default());
        let audit = AuditTrail::new(sink.clone());
        let grants = Arc::new(GrantManager::new(
            Arc::new(StaticAssignments::default()),
            audit.clone(),
        ));
        let book = OrderBook::new(grants, audit);
        let dr = Actor::new("dr-1", "Dr One", Role::Clinician).unwrap();

        sink.set_failing(true);
        assert!(book
            .create(&dr, new_order("p-1", &["CBC"], Priority::Routine))
            .is_err());
        sink.set_failing(false);

        assert!(book.snapshot().is_empty());
        assert!(lock(&book.sample_ids).is_empty());
    }

    #[test]
    fn admin_orders_have_no_ordering_clinician() {
        let (book, _, _) = book();
        let admin = Actor::new("adm", "Admin", Role::Admin).unwrap();
        let order = book
            .create(&admin, new_order("p-1", &["CBC"], Priority::Routine))
            .unwrap();
        assert_eq!(order.ordering_clinician, None);
    }

    #[test]
    fn create_rejects_bad_test_lists() {
        let (book, _, _) = book();
        let dr = Actor::new("dr-1", "Dr One", Role::Clinician).unwrap();
        assert!(matches!(
            book.create(&dr, new_order("p-1", &[], Priority::Routine)),
            Err(ClinicalError::Validation(_))
        ));
        assert!(matches!(
            book.create(&dr, new_order("p-1", &["K", "K"], Priority::Routine)),
            Err(ClinicalError::Validation(_))
        ));

        let tech = Actor::new("t-1", "Tech", Role::Technician).unwrap();
        assert!(matches!(
            book.create(&tech, new_order("p-1", &["K"], Priority::Routine)),
            Err(ClinicalError::AccessDenied(_))
        ));
    }

    #[test]
    fn two_test_order_processes_then_completes_once() {
        let (book, _, _) = book();
        let dr = Actor::new("dr-1", "Dr One", Role::Clinician).unwrap();
        let order = book
            .create(&dr, new_order("p-1", &["A", "B"], Priority::Routine))
            .unwrap();

        let status = book
            .with_order(&order.id, |e| e.record_result(result_for(&order, "A")))
            .unwrap();
        assert_eq!(status, OrderStatus::Processing);

        let status = book
            .with_order(&order.id, |e| e.record_result(result_for(&order, "B")))
            .unwrap();
        assert_eq!(status, OrderStatus::Completed);

        let again = book.with_order(&order.id, |e| e.record_result(result_for(&order, "B")));
        assert!(matches!(again, Err(ClinicalError::Conflict(_))));
    }

    #[test]
    fn cancelled_order_refuses_progress() {
        let (book, _, _) = book();
        let dr = Actor::new("dr-1", "Dr One", Role::Clinician).unwrap();
        let order = book
            .create(&dr, new_order("p-1", &["A"], Priority::Routine))
            .unwrap();

        let other = Actor::new("dr-2", "Dr Two", Role::Clinician).unwrap();
        assert!(matches!(
            book.cancel(&other, &order.id, None),
            Err(ClinicalError::AccessDenied(_))
        ));

        let cancelled = book.cancel(&dr, &order.id, Some("duplicate")).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        assert!(matches!(
            book.cancel(&dr, &order.id, None),
            Err(ClinicalError::Conflict(_))
        ));
        assert!(matches!(
            book.with_order(&order.id, |e| e.advance_to_processing(Utc::now())),
            Err(ClinicalError::Conflict(_))
        ));
    }

    #[test]
    fn collect_only_from_ordered() {
        let (book, _, audit) = book();
        let dr = Actor::new("dr-1", "Dr One", Role::Clinician).unwrap();
        let tech = Actor::new("t-1", "Tech", Role::Technician).unwrap();
        let order = book
            .create(&dr, new_order("p-1", &["A"], Priority::Routine))
            .unwrap();

        assert!(matches!(
            book.mark_collected(&dr, &order.id),
            Err(ClinicalError::AccessDenied(_))
        ));
        assert_eq!(
            book.mark_collected(&tech, &order.id).unwrap().status,
            OrderStatus::Collected
        );
        assert!(matches!(
            book.mark_collected(&tech, &order.id),
            Err(ClinicalError::Conflict(_))
        ));

        let outcomes: Vec<_> = audit
            .all()
            .unwrap()
            .into_iter()
            .filter(|r| r.action == AuditAction::OrderCollected)
            .map(|r| r.outcome)
            .collect();
        assert_eq!(
            outcomes,
            vec![AuditOutcome::Denied, AuditOutcome::Success, AuditOutcome::Failure]
        );
    }

    #[test]
    fn view_requires_ownership_or_grant() {
        let (book, grants, _) = book();
        let dr = Actor::new("dr-1", "Dr One", Role::Clinician).unwrap();
        let dr2 = Actor::new("dr-2", "Dr Two", Role::Clinician).unwrap();
        let order = book
            .create(&dr, new_order("p-1", &["A"], Priority::Routine))
            .unwrap();

        assert!(book.view(&dr, &order.id).is_ok());

        let denied = book.view(&dr2, &order.id).unwrap_err();
        let unknown = book.view(&dr2, &OrderId::new()).unwrap_err();
        assert_eq!(denied.to_string(), unknown.to_string());

        grants
            .create(&dr, GrantRequest::referral(dr2.id.clone(), order.patient.clone(), "cardio"))
            .unwrap();
        assert_eq!(book.view(&dr2, &order.id).unwrap().order.id, order.id);
    }
}
