//! Enrollment lifecycle orchestration.
//!
//! The orchestrator composes the store, reference lookups, payment gate, LMS and
//! messaging ports into the five exposed operations. It mirrors a command
//! dispatcher: load, decide (pure domain), persist, publish, and then fire the
//! matriculation triggers.
//!
//! ```text
//! update(id, patch)
//!   ↓ load record, check discount exists
//!   ↓ plan commands (domain)           no events → return record unchanged
//!   ↓ payment gate (false→true only)
//!   ↓ guarded, versioned write
//!   ↓ publish events
//!   ↓ trigger pipeline: LMS (required) → messaging (best effort)
//!   ↓ on required failure: revert write, surface ExternalService
//! ```
//!
//! Operations on different enrollments run independently; nothing here holds a
//! lock across an external call.

mod error;
mod gate;
mod preconditions;
mod reconciliation;
mod triggers;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};

use campus_core::{Aggregate, AggregateRoot, Entity, EnrollmentId, EntityKind, ExpectedVersion};
use campus_enrollment::{
    AGGREGATE_TYPE, BillingRecord, Course, Discount, Enrollment, EnrollmentCommand,
    EnrollmentEvent, EnrollmentPatch, ListQuery, NewEnrollment, Page, Person, Receipt,
    RevertMatriculation, Withdraw,
};
use campus_events::{EventBus, EventEnvelope};

use crate::config::{DeletionHookPolicy, OrchestratorConfig};
use crate::directory::{EntityLookup, References};
use crate::external::{CallContext, CancellationSignal};
use crate::lms::{LmsClient, LmsError};
use crate::payments::PaymentGate;
use crate::store::{EnrollmentStore, StoreError, WriteGuard};

pub use error::OrchestratorError;
pub use gate::MatriculationGate;
pub use preconditions::{CreateRequest, PreconditionValidator};
pub use reconciliation::RECONCILIATION_TARGET;
pub use triggers::{
    LmsEnrollmentTrigger, MatriculationTrigger, MessagingInvitationTrigger,
    RequiredTriggerFailure, TriggerContext, TriggerError, TriggerPipeline, TriggerReport,
};

const COMPENSATION_ATTEMPTS: usize = 3;

/// An enrollment with its references resolved.
///
/// References that could not be resolved (deleted since, or lookup failed) are
/// `None`; reads never fail because of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentDetails {
    pub enrollment: Enrollment,
    pub course: Option<Course>,
    pub person: Option<Person>,
    pub billing: Option<BillingRecord>,
    pub receipt: Option<Receipt>,
    pub discount: Option<Discount>,
}

/// Ports the orchestrator is built from.
#[derive(Clone)]
pub struct OrchestratorPorts {
    pub store: Arc<dyn EnrollmentStore>,
    pub references: References,
    pub payments: Arc<dyn PaymentGate>,
    pub lms: Arc<dyn LmsClient>,
    pub triggers: TriggerPipeline,
}

pub struct EnrollmentOrchestrator<B> {
    store: Arc<dyn EnrollmentStore>,
    references: References,
    payments: Arc<dyn PaymentGate>,
    lms: Arc<dyn LmsClient>,
    triggers: TriggerPipeline,
    bus: B,
    config: OrchestratorConfig,
}

impl<B> EnrollmentOrchestrator<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(ports: OrchestratorPorts, bus: B, config: OrchestratorConfig) -> Self {
        Self {
            store: ports.store,
            references: ports.references,
            payments: ports.payments,
            lms: ports.lms,
            triggers: ports.triggers,
            bus,
            config,
        }
    }

    /// Create an unmatriculated enrollment once all references exist and neither
    /// the receipt nor the (course, person) pair is taken.
    #[instrument(
        skip(self, cancel),
        fields(course_id = %request.course_id, person_id = %request.person_id),
        err
    )]
    pub async fn create(
        &self,
        request: CreateRequest,
        cancel: &CancellationSignal,
    ) -> Result<Enrollment, OrchestratorError> {
        let call = self.call_context(cancel);

        PreconditionValidator::new(&self.references, self.store.as_ref())
            .validate(&request, &call)
            .await?;

        let enrollment = self
            .store
            .insert(NewEnrollment {
                course_id: request.course_id,
                person_id: request.person_id,
                billing_id: request.billing_id,
                receipt_id: request.receipt_id,
                enrolled_at: Utc::now(),
            })
            .await
            .map_err(|e| OrchestratorError::from_store("create", None, e))?;

        self.publish(&enrollment, &[EnrollmentEvent::created(&enrollment)]);
        info!(enrollment_id = %enrollment.id_typed(), "enrollment created");
        Ok(enrollment)
    }

    /// Apply a discount and/or the false→true matriculation transition.
    #[instrument(skip(self, patch, cancel), fields(enrollment_id = %id), err)]
    pub async fn update(
        &self,
        id: EnrollmentId,
        patch: EnrollmentPatch,
        cancel: &CancellationSignal,
    ) -> Result<Enrollment, OrchestratorError> {
        let call = self.call_context(cancel);
        let current = self.load("update", id).await?;

        if let Some(discount_id) = patch.discount_id {
            self.lookup(self.references.discounts.as_ref(), discount_id, &call, Some(id))
                .await?
                .ok_or_else(|| OrchestratorError::not_found(EntityKind::Discount, discount_id))?;
        }

        let plan = current.plan_update(&patch, Utc::now())?;
        let (next, events) = decide(&current, &plan.commands)?;
        if events.is_empty() {
            debug!(enrollment_id = %id, "update is a no-op");
            return Ok(current);
        }

        let guard = if plan.wants_matriculation {
            MatriculationGate::new(self.payments.as_ref())
                .check(id, &call)
                .await?;
            WriteGuard::VerifiedPayment
        } else {
            WriteGuard::None
        };

        let stored = self
            .store
            .update(&next, ExpectedVersion::Exact(current.version()), guard)
            .await
            .map_err(|e| OrchestratorError::from_store("update", Some(id), e))?;
        self.publish(&stored, &events);

        if !plan.wants_matriculation {
            return Ok(stored);
        }

        info!(enrollment_id = %id, "enrollment matriculated");
        if let Err(cause) = self.fire_triggers(&stored, &call).await {
            self.compensate(&stored, &cause).await;
            return Err(OrchestratorError::ExternalService(cause));
        }

        Ok(stored)
    }

    /// Remove an enrollment after unenrolling the person from the LMS course.
    ///
    /// What happens when the unenrolment fails is set by
    /// [`DeletionHookPolicy`].
    #[instrument(skip(self, cancel), fields(enrollment_id = %id), err)]
    pub async fn delete(
        &self,
        id: EnrollmentId,
        cancel: &CancellationSignal,
    ) -> Result<(), OrchestratorError> {
        let call = self.call_context(cancel);
        let current = self.load("delete", id).await?;

        if let Err(cause) = self.unenroll_hook(&current, &call).await {
            match self.config.deletion_hook_policy {
                DeletionHookPolicy::BlockOnFailure => {
                    warn!(enrollment_id = %id, cause = %cause, "lms unenrollment failed; deletion blocked");
                    return Err(OrchestratorError::ExternalService(cause));
                }
                DeletionHookPolicy::ProceedOnFailure => {
                    let event = reconciliation::reconciliation_required(
                        id,
                        "delete",
                        format!("{cause}; the person may still hold an lms seat"),
                    );
                    self.publish(&current, &[event]);
                }
            }
        }

        let events = current.handle(&EnrollmentCommand::Withdraw(Withdraw {
            enrollment_id: id,
            occurred_at: Utc::now(),
        }))?;

        let removed = self
            .store
            .delete(id)
            .await
            .map_err(|e| OrchestratorError::from_store("delete", Some(id), e))?;
        if !removed {
            return Err(OrchestratorError::not_found(EntityKind::Enrollment, id));
        }

        self.publish(&current, &events);
        info!(enrollment_id = %id, "enrollment deleted");
        Ok(())
    }

    #[instrument(skip(self, cancel), fields(enrollment_id = %id), err)]
    pub async fn get(
        &self,
        id: EnrollmentId,
        cancel: &CancellationSignal,
    ) -> Result<EnrollmentDetails, OrchestratorError> {
        let call = self.call_context(cancel);
        let enrollment = self.load("get", id).await?;
        Ok(self.resolve(enrollment, &call).await)
    }

    #[instrument(skip(self, cancel), err)]
    pub async fn list(
        &self,
        query: &ListQuery,
        cancel: &CancellationSignal,
    ) -> Result<Page<EnrollmentDetails>, OrchestratorError> {
        let call = self.call_context(cancel);
        let page = self
            .store
            .list(query)
            .await
            .map_err(|e| OrchestratorError::from_store("list", None, e))?;

        let mut items = Vec::with_capacity(page.items.len());
        for enrollment in page.items {
            items.push(self.resolve(enrollment, &call).await);
        }
        Ok(Page {
            items,
            total: page.total,
        })
    }

    fn call_context(&self, cancel: &CancellationSignal) -> CallContext {
        CallContext::new(self.config.external_call_timeout, cancel.clone())
    }

    async fn load(
        &self,
        operation: &'static str,
        id: EnrollmentId,
    ) -> Result<Enrollment, OrchestratorError> {
        self.store
            .get(id)
            .await
            .map_err(|e| OrchestratorError::from_store(operation, Some(id), e))?
            .ok_or_else(|| OrchestratorError::not_found(EntityKind::Enrollment, id))
    }

    async fn lookup<T: Entity>(
        &self,
        directory: &dyn EntityLookup<T>,
        id: T::Id,
        call: &CallContext,
        enrollment_id: Option<EnrollmentId>,
    ) -> Result<Option<T>, OrchestratorError> {
        call.run(T::KIND.as_str(), directory.find_by_id(id))
            .await
            .map_err(|e| OrchestratorError::from_call("lookup", enrollment_id, e))?
            .map_err(|e| OrchestratorError::from_lookup("lookup", enrollment_id, e))
    }

    /// Course and person the triggers and the unenroll hook act on.
    ///
    /// `Err` means a lookup could not be answered; a record that no longer exists
    /// comes back as `None`.
    async fn lms_subjects(
        &self,
        enrollment: &Enrollment,
        call: &CallContext,
    ) -> Result<(Option<Course>, Option<Person>), String> {
        let id = Some(enrollment.id_typed());
        let course = self
            .lookup(self.references.courses.as_ref(), enrollment.course_id(), call, id)
            .await
            .map_err(|e| e.to_string())?;
        let person = self
            .lookup(self.references.people.as_ref(), enrollment.person_id(), call, id)
            .await
            .map_err(|e| e.to_string())?;
        Ok((course, person))
    }

    /// Run the trigger pipeline. `Err` carries the caller-facing cause.
    async fn fire_triggers(&self, stored: &Enrollment, call: &CallContext) -> Result<(), String> {
        let (course, person) = match self.lms_subjects(stored, call).await {
            Ok((Some(course), Some(person))) => (course, person),
            Ok((None, _)) => {
                return Err(format!(
                    "lms enrollment failed: course {} not found",
                    stored.course_id()
                ));
            }
            Ok((_, None)) => {
                return Err(format!(
                    "lms enrollment failed: person {} not found",
                    stored.person_id()
                ));
            }
            Err(cause) => return Err(format!("lms enrollment failed: {cause}")),
        };

        let ctx = TriggerContext {
            enrollment: stored,
            course: &course,
            person: &person,
            call,
        };
        let report = self
            .triggers
            .run(&ctx)
            .await
            .map_err(|failure| format!("{} failed: {}", failure.trigger, failure.error))?;

        debug!(
            enrollment_id = %stored.id_typed(),
            fired = ?report.fired,
            soft_failures = report.soft_failures.len(),
            "matriculation triggers done"
        );
        Ok(())
    }

    async fn unenroll_hook(&self, enrollment: &Enrollment, call: &CallContext) -> Result<(), String> {
        let (course, person) = match self.lms_subjects(enrollment, call).await {
            Ok((Some(course), Some(person))) => (course, person),
            // Without the course or the person there is no LMS seat we can name.
            Ok(_) => {
                warn!(
                    enrollment_id = %enrollment.id_typed(),
                    "course or person no longer exists; skipping lms unenrollment"
                );
                return Ok(());
            }
            Err(cause) => return Err(format!("lms unenrollment failed: {cause}")),
        };

        match call.run("lms unenroll", self.lms.unenroll(&person, &course)).await {
            Ok(Ok(outcome)) => {
                debug!(enrollment_id = %enrollment.id_typed(), ?outcome, "lms unenrollment done");
                Ok(())
            }
            // Course never provisioned in the LMS: there is no seat to remove.
            Ok(Err(LmsError::MissingCourseMapping(_))) => Ok(()),
            Ok(Err(err)) => Err(format!("lms unenrollment failed: {err}")),
            Err(err) => Err(format!("lms unenrollment failed: {err}")),
        }
    }

    /// Undo a matriculation whose required trigger failed.
    ///
    /// Reloads the record and writes the revert against its current version,
    /// retrying on version conflicts. Anything else ends in a reconciliation notice.
    async fn compensate(&self, stored: &Enrollment, cause: &str) {
        let id = stored.id_typed();
        let mut last_error = String::new();

        for attempt in 1..=COMPENSATION_ATTEMPTS {
            let fresh = match self.store.get(id).await {
                Ok(Some(fresh)) => fresh,
                Ok(None) => {
                    warn!(enrollment_id = %id, "enrollment removed before matriculation could be reverted");
                    return;
                }
                Err(err) => {
                    last_error = err.to_string();
                    break;
                }
            };

            let revert = EnrollmentCommand::RevertMatriculation(RevertMatriculation {
                enrollment_id: id,
                reason: cause.to_string(),
                occurred_at: Utc::now(),
            });
            let (reverted, events) = match decide(&fresh, std::slice::from_ref(&revert)) {
                Ok(decided) => decided,
                Err(err) => {
                    last_error = err.to_string();
                    break;
                }
            };
            if events.is_empty() {
                return;
            }

            match self
                .store
                .update(&reverted, ExpectedVersion::Exact(fresh.version()), WriteGuard::None)
                .await
            {
                Ok(saved) => {
                    self.publish(&saved, &events);
                    warn!(enrollment_id = %id, cause, "matriculation reverted");
                    return;
                }
                Err(StoreError::Concurrency(msg)) => {
                    debug!(enrollment_id = %id, attempt, "revert raced another write; retrying");
                    last_error = msg;
                }
                Err(StoreError::NotFound(_)) => {
                    warn!(enrollment_id = %id, "enrollment removed before matriculation could be reverted");
                    return;
                }
                Err(err) => {
                    last_error = err.to_string();
                    break;
                }
            }
        }

        let event = reconciliation::reconciliation_required(
            id,
            "revert matriculation",
            format!(
                "enrollment is matriculated but the lms step failed ({cause}); revert failed: {last_error}"
            ),
        );
        self.publish(stored, &[event]);
    }

    async fn resolve(&self, enrollment: Enrollment, call: &CallContext) -> EnrollmentDetails {
        let id = Some(enrollment.id_typed());
        let refs = &self.references;

        let course = self.lookup(refs.courses.as_ref(), enrollment.course_id(), call, id);
        let person = self.lookup(refs.people.as_ref(), enrollment.person_id(), call, id);
        let billing = self.lookup(refs.billing.as_ref(), enrollment.billing_id(), call, id);
        let receipt = self.lookup(refs.receipts.as_ref(), enrollment.receipt_id(), call, id);
        let (course, person, billing, receipt) = tokio::join!(course, person, billing, receipt);

        let discount = match enrollment.discount_id() {
            Some(d) => soft(self.lookup(refs.discounts.as_ref(), d, call, id).await),
            None => None,
        };

        EnrollmentDetails {
            course: soft(course),
            person: soft(person),
            billing: soft(billing),
            receipt: soft(receipt),
            discount,
            enrollment,
        }
    }

    /// Publish events for `enrollment`. Failures are logged, never returned.
    fn publish(&self, enrollment: &Enrollment, events: &[EnrollmentEvent]) {
        for event in events {
            let envelope = match EventEnvelope::from_typed(
                enrollment.id_typed(),
                AGGREGATE_TYPE,
                enrollment.version(),
                event,
            ) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(error = %err, "failed to serialize enrollment event");
                    continue;
                }
            };
            if let Err(err) = self.bus.publish(envelope) {
                warn!(error = ?err, "failed to publish enrollment event");
            }
        }
    }
}

/// Handle commands against a copy of `current`, returning the new state and events.
fn decide(
    current: &Enrollment,
    commands: &[EnrollmentCommand],
) -> Result<(Enrollment, Vec<EnrollmentEvent>), OrchestratorError> {
    let mut next = current.clone();
    let mut events = Vec::new();
    for command in commands {
        for event in next.handle(command)? {
            next.apply(&event);
            events.push(event);
        }
    }
    Ok((next, events))
}

fn soft<T>(result: Result<Option<T>, OrchestratorError>) -> Option<T> {
    match result {
        Ok(found) => found,
        Err(err) => {
            warn!(error = %err, "reference lookup failed while reading enrollment");
            None
        }
    }
}
