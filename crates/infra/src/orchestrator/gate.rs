//! Payment gate in front of the false→true matriculation transition.
//!
//! Reads the enrollment's invoices through the [`PaymentGate`] port and passes when at
//! least one is verified. The store re-checks the same rule when the write lands.

use tracing::debug;

use campus_core::EnrollmentId;
use campus_enrollment::ensure_payment_verified;

use super::OrchestratorError;
use crate::external::CallContext;
use crate::payments::PaymentGate;

/// Payment check in front of the false→true matriculation write.
///
/// Gives the caller an early, precise conflict. The store repeats the same check
/// atomically with the write (see [`WriteGuard`](crate::store::WriteGuard)).
pub struct MatriculationGate<'a> {
    payments: &'a dyn PaymentGate,
}

impl<'a> MatriculationGate<'a> {
    pub fn new(payments: &'a dyn PaymentGate) -> Self {
        Self { payments }
    }

    pub async fn check(
        &self,
        enrollment_id: EnrollmentId,
        call: &CallContext,
    ) -> Result<(), OrchestratorError> {
        let invoices = call
            .run("invoice lookup", self.payments.invoices_for_enrollment(enrollment_id))
            .await
            .map_err(|e| OrchestratorError::from_call("update", Some(enrollment_id), e))?
            .map_err(|e| OrchestratorError::from_lookup("update", Some(enrollment_id), e))?;

        let invoice = ensure_payment_verified(enrollment_id, &invoices)?;
        debug!(enrollment_id = %enrollment_id, invoice_id = %invoice.id, "payment verified");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::CancellationSignal;
    use crate::payments::InMemoryInvoices;
    use campus_core::InvoiceId;
    use campus_enrollment::{Invoice, Money};
    use std::time::Duration;

    fn call() -> CallContext {
        CallContext::new(Duration::from_secs(1), CancellationSignal::none())
    }

    #[tokio::test]
    async fn rejects_without_invoices_and_passes_with_a_verified_one() {
        let invoices = InMemoryInvoices::new();
        let gate = MatriculationGate::new(&invoices);
        let id = EnrollmentId::new(5);

        assert_eq!(
            gate.check(id, &call()).await.unwrap_err(),
            OrchestratorError::Conflict("no invoice exists for enrollment 5".to_string())
        );

        invoices
            .add(Invoice {
                id: InvoiceId::new(1),
                enrollment_id: id,
                payment_verified: false,
                amount_paid: Money(0),
            })
            .await;
        assert_eq!(
            gate.check(id, &call()).await.unwrap_err(),
            OrchestratorError::Conflict("payment not verified for enrollment 5".to_string())
        );

        invoices.set_verified(InvoiceId::new(1), true).await;
        assert!(gate.check(id, &call()).await.is_ok());
    }
}
