use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use campus_core::{AggregateRoot, CourseId, EnrollmentId, ExpectedVersion, PersonId, ReceiptId};
use campus_enrollment::{
    Enrollment, EnrollmentParts, ListQuery, NewEnrollment, Page, ensure_payment_verified,
};

use super::{
    DUPLICATE_COURSE_PERSON, DUPLICATE_RECEIPT, EnrollmentStore, StoreError, WriteGuard,
    guard_rejection,
};
use crate::payments::PaymentGate;

#[derive(Debug, Default)]
struct State {
    last_id: i64,
    rows: BTreeMap<EnrollmentId, Enrollment>,
}

/// In-memory enrollment store (dev binary and tests).
///
/// Every write holds the table lock for its whole check-then-write, so the
/// uniqueness, version and guard checks are atomic with the write.
pub struct InMemoryEnrollmentStore {
    state: RwLock<State>,
    payments: Arc<dyn PaymentGate>,
}

impl InMemoryEnrollmentStore {
    /// `payments` is consulted for [`WriteGuard::VerifiedPayment`].
    pub fn new(payments: Arc<dyn PaymentGate>) -> Self {
        Self {
            state: RwLock::new(State::default()),
            payments,
        }
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.rows.len()
    }
}

#[async_trait::async_trait]
impl EnrollmentStore for InMemoryEnrollmentStore {
    async fn get(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StoreError> {
        Ok(self.state.read().await.rows.get(&id).cloned())
    }

    async fn find_by_course_and_person(
        &self,
        course_id: CourseId,
        person_id: PersonId,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .rows
            .values()
            .find(|e| e.course_id() == course_id && e.person_id() == person_id)
            .cloned())
    }

    async fn find_by_receipt(
        &self,
        receipt_id: ReceiptId,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .rows
            .values()
            .find(|e| e.receipt_id() == receipt_id)
            .cloned())
    }

    async fn insert(&self, new: NewEnrollment) -> Result<Enrollment, StoreError> {
        let mut state = self.state.write().await;

        if state
            .rows
            .values()
            .any(|e| e.course_id() == new.course_id && e.person_id() == new.person_id)
        {
            return Err(StoreError::UniqueViolation(DUPLICATE_COURSE_PERSON.to_string()));
        }
        if state.rows.values().any(|e| e.receipt_id() == new.receipt_id) {
            return Err(StoreError::UniqueViolation(DUPLICATE_RECEIPT.to_string()));
        }

        state.last_id += 1;
        let id = EnrollmentId::new(state.last_id);
        let enrollment = Enrollment::create(id, &new);
        state.rows.insert(id, enrollment.clone());
        Ok(enrollment)
    }

    async fn update(
        &self,
        enrollment: &Enrollment,
        expected: ExpectedVersion,
        guard: WriteGuard,
    ) -> Result<Enrollment, StoreError> {
        let id = enrollment.id_typed();
        let mut state = self.state.write().await;

        let current = state.rows.get(&id).ok_or(StoreError::NotFound(id))?;
        if !expected.matches(current.version()) {
            return Err(StoreError::Concurrency(format!(
                "enrollment {id} is at version {}, expected {expected:?}",
                current.version()
            )));
        }

        if guard == WriteGuard::VerifiedPayment {
            let invoices = self
                .payments
                .invoices_for_enrollment(id)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            ensure_payment_verified(id, &invoices)
                .map_err(guard_rejection)?;
        }

        // Identity columns are immutable; only the mutable fields are taken over.
        let next_version = current.version() + 1;
        let stored = Enrollment::restore(EnrollmentParts {
            id,
            course_id: current.course_id(),
            person_id: current.person_id(),
            billing_id: current.billing_id(),
            receipt_id: current.receipt_id(),
            discount_id: enrollment.discount_id(),
            matriculated: enrollment.is_matriculated(),
            enrolled_at: current.enrolled_at(),
            version: next_version,
        });
        state.rows.insert(id, stored.clone());

        tracing::trace!(enrollment_id = %id, version = next_version, "enrollment updated");
        Ok(stored)
    }

    async fn delete(&self, id: EnrollmentId) -> Result<bool, StoreError> {
        Ok(self.state.write().await.rows.remove(&id).is_some())
    }

    async fn list(&self, query: &ListQuery) -> Result<Page<Enrollment>, StoreError> {
        let all: Vec<Enrollment> = self.state.read().await.rows.values().cloned().collect();
        Ok(query.apply(all))
    }
}
