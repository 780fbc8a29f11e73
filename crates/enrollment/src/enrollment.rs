use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use campus_core::{
    Aggregate, AggregateRoot, BillingId, CourseId, DiscountId, DomainError, EnrollmentId,
    PersonId, ReceiptId,
};
use campus_events::Event;

/// Aggregate type used in published envelopes.
pub const AGGREGATE_TYPE: &str = "enrollment";

/// Matriculation lifecycle. `Matriculated` is terminal: no command moves an
/// enrollment back except the orchestrator's compensating revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatriculationState {
    Unmatriculated,
    Matriculated,
}

/// A validated request to create an enrollment. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEnrollment {
    pub course_id: CourseId,
    pub person_id: PersonId,
    pub billing_id: BillingId,
    pub receipt_id: ReceiptId,
    pub enrolled_at: DateTime<Utc>,
}

/// Persisted shape of an enrollment, used by stores to rebuild the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentParts {
    pub id: EnrollmentId,
    pub course_id: CourseId,
    pub person_id: PersonId,
    pub billing_id: BillingId,
    pub receipt_id: ReceiptId,
    pub discount_id: Option<DiscountId>,
    pub matriculated: bool,
    pub enrolled_at: DateTime<Utc>,
    pub version: u64,
}

/// Aggregate root: Enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    id: EnrollmentId,
    course_id: CourseId,
    person_id: PersonId,
    billing_id: BillingId,
    receipt_id: ReceiptId,
    discount_id: Option<DiscountId>,
    matriculated: bool,
    enrolled_at: DateTime<Utc>,
    version: u64,
}

impl Enrollment {
    /// First persisted state of a freshly created enrollment.
    pub fn create(id: EnrollmentId, new: &NewEnrollment) -> Self {
        Self {
            id,
            course_id: new.course_id,
            person_id: new.person_id,
            billing_id: new.billing_id,
            receipt_id: new.receipt_id,
            discount_id: None,
            matriculated: false,
            enrolled_at: new.enrolled_at,
            version: 1,
        }
    }

    pub fn restore(parts: EnrollmentParts) -> Self {
        Self {
            id: parts.id,
            course_id: parts.course_id,
            person_id: parts.person_id,
            billing_id: parts.billing_id,
            receipt_id: parts.receipt_id,
            discount_id: parts.discount_id,
            matriculated: parts.matriculated,
            enrolled_at: parts.enrolled_at,
            version: parts.version,
        }
    }

    pub fn id_typed(&self) -> EnrollmentId {
        self.id
    }

    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    pub fn person_id(&self) -> PersonId {
        self.person_id
    }

    pub fn billing_id(&self) -> BillingId {
        self.billing_id
    }

    pub fn receipt_id(&self) -> ReceiptId {
        self.receipt_id
    }

    pub fn discount_id(&self) -> Option<DiscountId> {
        self.discount_id
    }

    pub fn is_matriculated(&self) -> bool {
        self.matriculated
    }

    pub fn enrolled_at(&self) -> DateTime<Utc> {
        self.enrolled_at
    }

    pub fn state(&self) -> MatriculationState {
        if self.matriculated {
            MatriculationState::Matriculated
        } else {
            MatriculationState::Unmatriculated
        }
    }

    /// Translate a client patch into commands.
    ///
    /// `wants_matriculation` is true only for a false→true request; a request for the
    /// value the record already holds produces no command at all.
    pub fn plan_update(
        &self,
        patch: &EnrollmentPatch,
        now: DateTime<Utc>,
    ) -> Result<UpdatePlan, DomainError> {
        let mut commands = Vec::new();

        if let Some(discount_id) = patch.discount_id {
            commands.push(EnrollmentCommand::AssignDiscount(AssignDiscount {
                enrollment_id: self.id,
                discount_id,
                occurred_at: now,
            }));
        }

        let wants_matriculation = matches!(patch.matriculated, Some(true)) && !self.matriculated;
        if matches!(patch.matriculated, Some(false)) && self.matriculated {
            return Err(DomainError::conflict(format!(
                "matriculation of enrollment {} cannot be revoked",
                self.id
            )));
        }
        if wants_matriculation {
            commands.push(EnrollmentCommand::Matriculate(Matriculate {
                enrollment_id: self.id,
                occurred_at: now,
            }));
        }

        Ok(UpdatePlan {
            commands,
            wants_matriculation,
        })
    }
}

impl AggregateRoot for Enrollment {
    type Id = EnrollmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Fields a client may change on an existing enrollment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentPatch {
    pub discount_id: Option<DiscountId>,
    pub matriculated: Option<bool>,
}

/// Commands derived from a patch, in the order they must be handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    pub commands: Vec<EnrollmentCommand>,
    pub wants_matriculation: bool,
}

/// Command: AssignDiscount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignDiscount {
    pub enrollment_id: EnrollmentId,
    pub discount_id: DiscountId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Matriculate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matriculate {
    pub enrollment_id: EnrollmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RevertMatriculation (compensation after a failed LMS enrollment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertMatriculation {
    pub enrollment_id: EnrollmentId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Withdraw (record deletion).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdraw {
    pub enrollment_id: EnrollmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentCommand {
    AssignDiscount(AssignDiscount),
    Matriculate(Matriculate),
    RevertMatriculation(RevertMatriculation),
    Withdraw(Withdraw),
}

/// Event: EnrollmentCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentCreated {
    pub enrollment_id: EnrollmentId,
    pub course_id: CourseId,
    pub person_id: PersonId,
    pub receipt_id: ReceiptId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DiscountAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountAssigned {
    pub enrollment_id: EnrollmentId,
    pub discount_id: DiscountId,
    pub previous: Option<DiscountId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EnrollmentMatriculated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentMatriculated {
    pub enrollment_id: EnrollmentId,
    pub course_id: CourseId,
    pub person_id: PersonId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MatriculationReverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatriculationReverted {
    pub enrollment_id: EnrollmentId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: EnrollmentWithdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentWithdrawn {
    pub enrollment_id: EnrollmentId,
    pub course_id: CourseId,
    pub person_id: PersonId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReconciliationRequired.
///
/// Emitted when stores and external systems disagree and no automatic repair was
/// possible (e.g. the compensating revert itself failed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRequired {
    pub enrollment_id: EnrollmentId,
    pub operation: String,
    pub detail: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollmentEvent {
    EnrollmentCreated(EnrollmentCreated),
    DiscountAssigned(DiscountAssigned),
    EnrollmentMatriculated(EnrollmentMatriculated),
    MatriculationReverted(MatriculationReverted),
    EnrollmentWithdrawn(EnrollmentWithdrawn),
    ReconciliationRequired(ReconciliationRequired),
}

impl EnrollmentEvent {
    pub fn created(enrollment: &Enrollment) -> Self {
        EnrollmentEvent::EnrollmentCreated(EnrollmentCreated {
            enrollment_id: enrollment.id,
            course_id: enrollment.course_id,
            person_id: enrollment.person_id,
            receipt_id: enrollment.receipt_id,
            occurred_at: enrollment.enrolled_at,
        })
    }
}

impl Event for EnrollmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            EnrollmentEvent::EnrollmentCreated(_) => "enrollment.created",
            EnrollmentEvent::DiscountAssigned(_) => "enrollment.discount_assigned",
            EnrollmentEvent::EnrollmentMatriculated(_) => "enrollment.matriculated",
            EnrollmentEvent::MatriculationReverted(_) => "enrollment.matriculation_reverted",
            EnrollmentEvent::EnrollmentWithdrawn(_) => "enrollment.withdrawn",
            EnrollmentEvent::ReconciliationRequired(_) => "enrollment.reconciliation_required",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            EnrollmentEvent::EnrollmentCreated(e) => e.occurred_at,
            EnrollmentEvent::DiscountAssigned(e) => e.occurred_at,
            EnrollmentEvent::EnrollmentMatriculated(e) => e.occurred_at,
            EnrollmentEvent::MatriculationReverted(e) => e.occurred_at,
            EnrollmentEvent::EnrollmentWithdrawn(e) => e.occurred_at,
            EnrollmentEvent::ReconciliationRequired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Enrollment {
    type Command = EnrollmentCommand;
    type Event = EnrollmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            EnrollmentEvent::DiscountAssigned(e) => {
                self.discount_id = Some(e.discount_id);
            }
            EnrollmentEvent::EnrollmentMatriculated(_) => {
                self.matriculated = true;
            }
            EnrollmentEvent::MatriculationReverted(_) => {
                self.matriculated = false;
            }
            EnrollmentEvent::EnrollmentCreated(_)
            | EnrollmentEvent::EnrollmentWithdrawn(_)
            | EnrollmentEvent::ReconciliationRequired(_) => {}
        }
        // Versions are assigned by the store on write, not per event.
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            EnrollmentCommand::AssignDiscount(cmd) => self.handle_assign_discount(cmd),
            EnrollmentCommand::Matriculate(cmd) => self.handle_matriculate(cmd),
            EnrollmentCommand::RevertMatriculation(cmd) => self.handle_revert(cmd),
            EnrollmentCommand::Withdraw(cmd) => self.handle_withdraw(cmd),
        }
    }
}

impl Enrollment {
    fn ensure_enrollment_id(&self, enrollment_id: EnrollmentId) -> Result<(), DomainError> {
        if self.id != enrollment_id {
            return Err(DomainError::invariant("enrollment_id mismatch"));
        }
        Ok(())
    }

    fn handle_assign_discount(
        &self,
        cmd: &AssignDiscount,
    ) -> Result<Vec<EnrollmentEvent>, DomainError> {
        self.ensure_enrollment_id(cmd.enrollment_id)?;

        if self.discount_id == Some(cmd.discount_id) {
            return Ok(vec![]);
        }

        Ok(vec![EnrollmentEvent::DiscountAssigned(DiscountAssigned {
            enrollment_id: cmd.enrollment_id,
            discount_id: cmd.discount_id,
            previous: self.discount_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_matriculate(&self, cmd: &Matriculate) -> Result<Vec<EnrollmentEvent>, DomainError> {
        self.ensure_enrollment_id(cmd.enrollment_id)?;

        if self.matriculated {
            return Ok(vec![]);
        }

        Ok(vec![EnrollmentEvent::EnrollmentMatriculated(
            EnrollmentMatriculated {
                enrollment_id: cmd.enrollment_id,
                course_id: self.course_id,
                person_id: self.person_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_revert(
        &self,
        cmd: &RevertMatriculation,
    ) -> Result<Vec<EnrollmentEvent>, DomainError> {
        self.ensure_enrollment_id(cmd.enrollment_id)?;

        if !self.matriculated {
            return Ok(vec![]);
        }

        Ok(vec![EnrollmentEvent::MatriculationReverted(
            MatriculationReverted {
                enrollment_id: cmd.enrollment_id,
                reason: cmd.reason.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_withdraw(&self, cmd: &Withdraw) -> Result<Vec<EnrollmentEvent>, DomainError> {
        self.ensure_enrollment_id(cmd.enrollment_id)?;

        Ok(vec![EnrollmentEvent::EnrollmentWithdrawn(EnrollmentWithdrawn {
            enrollment_id: cmd.enrollment_id,
            course_id: self.course_id,
            person_id: self.person_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
