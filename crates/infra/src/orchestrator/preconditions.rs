//! Checks run before an enrollment is created.

use campus_core::{BillingId, CourseId, Entity, PersonId, ReceiptId};
use campus_enrollment::{BillingRecord, Course, Person, Receipt};

use super::OrchestratorError;
use crate::directory::{LookupError, References};
use crate::external::{CallContext, ExternalCallError};
use crate::store::{DUPLICATE_COURSE_PERSON, EnrollmentStore};

/// The four references a new enrollment points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateRequest {
    pub course_id: CourseId,
    pub person_id: PersonId,
    pub billing_id: BillingId,
    pub receipt_id: ReceiptId,
}

/// Validates a [`CreateRequest`] without side effects; safe to retry.
pub struct PreconditionValidator<'a> {
    references: &'a References,
    store: &'a dyn EnrollmentStore,
}

type Fetched<T> = Result<Result<Option<T>, LookupError>, ExternalCallError>;

impl<'a> PreconditionValidator<'a> {
    pub fn new(references: &'a References, store: &'a dyn EnrollmentStore) -> Self {
        Self { references, store }
    }

    /// Fetch all four records concurrently, then check them in declaration order
    /// (course, person, billing, receipt), then the two exclusivity rules.
    pub async fn validate(
        &self,
        request: &CreateRequest,
        call: &CallContext,
    ) -> Result<(), OrchestratorError> {
        let (course, person, billing, receipt) = tokio::join!(
            call.run("course lookup", self.references.courses.find_by_id(request.course_id)),
            call.run("person lookup", self.references.people.find_by_id(request.person_id)),
            call.run("billing lookup", self.references.billing.find_by_id(request.billing_id)),
            call.run("receipt lookup", self.references.receipts.find_by_id(request.receipt_id)),
        );

        require::<Course>(course, request.course_id)?;
        require::<Person>(person, request.person_id)?;
        require::<BillingRecord>(billing, request.billing_id)?;
        require::<Receipt>(receipt, request.receipt_id)?;

        let by_receipt = self
            .store
            .find_by_receipt(request.receipt_id)
            .await
            .map_err(|e| OrchestratorError::from_store("create", None, e))?;
        if let Some(existing) = by_receipt {
            return Err(OrchestratorError::Conflict(format!(
                "receipt already assigned to enrollment {}",
                existing.id_typed()
            )));
        }

        let by_pair = self
            .store
            .find_by_course_and_person(request.course_id, request.person_id)
            .await
            .map_err(|e| OrchestratorError::from_store("create", None, e))?;
        if by_pair.is_some() {
            return Err(OrchestratorError::Conflict(DUPLICATE_COURSE_PERSON.to_string()));
        }

        Ok(())
    }
}

fn require<T: Entity>(fetched: Fetched<T>, id: T::Id) -> Result<T, OrchestratorError> {
    let found = fetched
        .map_err(|e| OrchestratorError::from_call("create", None, e))?
        .map_err(|e| OrchestratorError::from_lookup("create", None, e))?;
    found.ok_or_else(|| OrchestratorError::not_found(T::KIND, id))
}
