//! Records that stores and external systems disagree and nobody fixed it.
//!
//! Logged at `error` on the `campus::reconciliation` target so operators can route
//! these lines to a separate sink, and published as a
//! `ReconciliationRequired` event for tooling that repairs them.
//!
//! The API binary publishes on an in-process bus with no subscribers, so there the
//! event is dropped and the error line is the only durable record. Route the
//! reconciliation target to a persistent sink in production.

use chrono::Utc;
use tracing::error;

use campus_core::EnrollmentId;
use campus_enrollment::{EnrollmentEvent, ReconciliationRequired};

pub const RECONCILIATION_TARGET: &str = "campus::reconciliation";

/// Build the event for a mismatch and write the error line.
pub(crate) fn reconciliation_required(
    enrollment_id: EnrollmentId,
    operation: &str,
    detail: String,
) -> EnrollmentEvent {
    error!(
        target: RECONCILIATION_TARGET,
        enrollment_id = %enrollment_id,
        operation,
        detail = %detail,
        "reconciliation required"
    );

    EnrollmentEvent::ReconciliationRequired(ReconciliationRequired {
        enrollment_id,
        operation: operation.to_string(),
        detail,
        occurred_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_events::Event;

    #[test]
    fn builds_a_reconciliation_event() {
        let event = reconciliation_required(
            EnrollmentId::new(8),
            "revert matriculation",
            "store unavailable".to_string(),
        );
        assert_eq!(event.event_type(), "enrollment.reconciliation_required");
        match event {
            EnrollmentEvent::ReconciliationRequired(e) => {
                assert_eq!(e.enrollment_id, EnrollmentId::new(8));
                assert_eq!(e.operation, "revert matriculation");
            }
            _ => panic!("Expected ReconciliationRequired event"),
        }
    }
}
