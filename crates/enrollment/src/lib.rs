//! Enrollment domain module.
//!
//! Business rules for course enrollments ("inscripciones"): the enrollment
//! aggregate and its matriculation transition, the referenced records it points at,
//! and the payment check that gates matriculation. Pure, deterministic logic only
//! (no IO, no HTTP, no storage).

pub mod enrollment;
pub mod invoice;
pub mod query;
pub mod references;
pub mod trigger;

pub use enrollment::{
    AssignDiscount, DiscountAssigned, Enrollment, EnrollmentCommand, EnrollmentCreated,
    EnrollmentEvent, EnrollmentMatriculated, EnrollmentParts, EnrollmentPatch,
    EnrollmentWithdrawn, Matriculate, MatriculationReverted, MatriculationState, NewEnrollment,
    ReconciliationRequired, RevertMatriculation, UpdatePlan, Withdraw, AGGREGATE_TYPE,
};
pub use invoice::{Invoice, Money, ensure_payment_verified};
pub use query::{ListQuery, Page, SortField, SortOrder};
pub use references::{BillingRecord, ContactAddress, Course, Discount, Person, Receipt};
pub use trigger::TriggerKind;
