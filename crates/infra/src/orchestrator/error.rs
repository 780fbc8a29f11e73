//! Error type returned by the orchestrator and its mapping from lower layers.

use thiserror::Error;

use campus_core::{DomainError, EnrollmentId, EntityKind};

use crate::directory::LookupError;
use crate::external::ExternalCallError;
use crate::store::StoreError;

/// Errors returned by [`EnrollmentOrchestrator`](super::EnrollmentOrchestrator).
///
/// Callers must be able to tell a request they should change (`NotFound`,
/// `Conflict`, `Validation`) from a step that failed outside their control
/// (`ExternalService`, `Unknown`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: i64 },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    /// A required external step (the LMS) failed; any partial write was reverted.
    #[error("{0}")]
    ExternalService(String),

    /// Unexpected persistence or lookup failure.
    #[error("{operation} failed: {message}")]
    Unknown {
        operation: &'static str,
        enrollment_id: Option<EnrollmentId>,
        message: String,
    },
}

impl OrchestratorError {
    pub fn not_found(entity: EntityKind, id: impl Into<i64>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn unknown(
        operation: &'static str,
        enrollment_id: Option<EnrollmentId>,
        message: impl Into<String>,
    ) -> Self {
        Self::Unknown {
            operation,
            enrollment_id,
            message: message.into(),
        }
    }

    /// Map a store failure, keeping rule violations as conflicts.
    pub(crate) fn from_store(
        operation: &'static str,
        enrollment_id: Option<EnrollmentId>,
        err: StoreError,
    ) -> Self {
        match err {
            StoreError::UniqueViolation(msg) | StoreError::GuardRejected(msg) => {
                Self::Conflict(msg)
            }
            StoreError::Concurrency(msg) => {
                Self::Conflict(format!("enrollment was modified concurrently: {msg}"))
            }
            StoreError::NotFound(id) => Self::not_found(EntityKind::Enrollment, id),
            StoreError::Backend(msg) => Self::unknown(operation, enrollment_id, msg),
        }
    }

    pub(crate) fn from_lookup(
        operation: &'static str,
        enrollment_id: Option<EnrollmentId>,
        err: LookupError,
    ) -> Self {
        Self::unknown(operation, enrollment_id, err.to_string())
    }

    pub(crate) fn from_call(
        operation: &'static str,
        enrollment_id: Option<EnrollmentId>,
        err: ExternalCallError,
    ) -> Self {
        Self::unknown(operation, enrollment_id, err.to_string())
    }
}

impl From<DomainError> for OrchestratorError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::Conflict(msg) => Self::Conflict(msg),
            DomainError::NotFound { entity, id } => Self::NotFound { entity, id },
            DomainError::InvariantViolation(msg) => Self::unknown("domain", None, msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_rule_violations_are_conflicts() {
        let err = OrchestratorError::from_store(
            "create",
            None,
            StoreError::GuardRejected("payment not verified for enrollment 4".to_string()),
        );
        assert_eq!(
            err,
            OrchestratorError::Conflict("payment not verified for enrollment 4".to_string())
        );
        assert_eq!(err.to_string(), "payment not verified for enrollment 4");
    }

    #[test]
    fn backend_failures_keep_operation_and_id() {
        let err = OrchestratorError::from_store(
            "update",
            Some(EnrollmentId::new(9)),
            StoreError::Backend("connection reset".to_string()),
        );
        assert_eq!(
            err,
            OrchestratorError::Unknown {
                operation: "update",
                enrollment_id: Some(EnrollmentId::new(9)),
                message: "connection reset".to_string(),
            }
        );
    }

    #[test]
    fn domain_not_found_keeps_entity_and_id() {
        let err: OrchestratorError = DomainError::not_found(EntityKind::Discount, 3).into();
        assert_eq!(err.to_string(), "discount 3 not found");
    }
}
