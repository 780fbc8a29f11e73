//! Enrollment persistence.
//!
//! Writes are optimistic: every stored enrollment carries a version, and an update
//! names the version it was computed from. A write may also carry a [`WriteGuard`]
//! that the store re-checks atomically with the row update, so a payment flag that
//! flips between the orchestrator's gate check and the write cannot slip through.
//!
//! ## Uniqueness
//!
//! Stores enforce two constraints independently of the orchestrator's precondition
//! checks, which only give friendlier messages:
//!
//! - one enrollment per (course, person) pair
//! - one enrollment per receipt

mod in_memory;
mod postgres;

use thiserror::Error;

use campus_core::{CourseId, DomainError, EnrollmentId, ExpectedVersion, PersonId, ReceiptId};
use campus_enrollment::{Enrollment, ListQuery, NewEnrollment, Page};

pub use in_memory::InMemoryEnrollmentStore;
pub use postgres::PostgresEnrollmentStore;

pub(crate) const DUPLICATE_COURSE_PERSON: &str = "person already enrolled in course";
pub(crate) const DUPLICATE_RECEIPT: &str = "receipt already assigned to an enrollment";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The stored version no longer matches the expected one.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// The write guard did not hold at write time.
    #[error("write guard rejected: {0}")]
    GuardRejected(String),

    #[error("enrollment {0} not found")]
    NotFound(EnrollmentId),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Keep the bare rule message of a failed payment check.
pub(crate) fn guard_rejection(err: DomainError) -> StoreError {
    match err {
        DomainError::Conflict(msg) => StoreError::GuardRejected(msg),
        other => StoreError::GuardRejected(other.to_string()),
    }
}

/// Condition re-checked inside the store's write, atomically with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGuard {
    None,
    /// At least one invoice for the enrollment must have verified payment.
    VerifiedPayment,
}

#[async_trait::async_trait]
pub trait EnrollmentStore: Send + Sync {
    async fn get(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StoreError>;

    async fn find_by_course_and_person(
        &self,
        course_id: CourseId,
        person_id: PersonId,
    ) -> Result<Option<Enrollment>, StoreError>;

    async fn find_by_receipt(&self, receipt_id: ReceiptId)
    -> Result<Option<Enrollment>, StoreError>;

    /// Persist a new enrollment, assigning its id. The result has version 1.
    async fn insert(&self, new: NewEnrollment) -> Result<Enrollment, StoreError>;

    /// Write the mutable fields (discount, matriculation) of `enrollment`.
    ///
    /// Fails with `Concurrency` unless the stored version satisfies `expected`, and
    /// with `GuardRejected` unless `guard` holds. Returns the stored record with its
    /// version bumped by one.
    async fn update(
        &self,
        enrollment: &Enrollment,
        expected: ExpectedVersion,
        guard: WriteGuard,
    ) -> Result<Enrollment, StoreError>;

    /// Remove an enrollment. Returns false if it did not exist.
    async fn delete(&self, id: EnrollmentId) -> Result<bool, StoreError>;

    async fn list(&self, query: &ListQuery) -> Result<Page<Enrollment>, StoreError>;
}
