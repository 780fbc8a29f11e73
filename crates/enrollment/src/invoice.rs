use serde::{Deserialize, Serialize};

use campus_core::{DomainError, EnrollmentId, InvoiceId, ValueObject};

/// Amount in the smallest currency unit (e.g., cents).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(pub u64);

impl ValueObject for Money {}

/// Invoice issued against an enrollment (read-only here).
///
/// A re-submitted fiscal form produces a new invoice row rather than mutating the
/// old one, so an enrollment may have several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub enrollment_id: EnrollmentId,
    pub payment_verified: bool,
    pub amount_paid: Money,
}

/// Payment check behind matriculation.
///
/// Passes when at least one invoice for the enrollment is verified; which one does
/// not matter. Returns that invoice for logging.
pub fn ensure_payment_verified(
    enrollment_id: EnrollmentId,
    invoices: &[Invoice],
) -> Result<&Invoice, DomainError> {
    if invoices.is_empty() {
        return Err(DomainError::conflict(format!(
            "no invoice exists for enrollment {enrollment_id}"
        )));
    }

    invoices
        .iter()
        .find(|inv| inv.payment_verified)
        .ok_or_else(|| {
            DomainError::conflict(format!(
                "payment not verified for enrollment {enrollment_id}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn invoice(id: i64, verified: bool) -> Invoice {
        Invoice {
            id: InvoiceId::new(id),
            enrollment_id: EnrollmentId::new(1),
            payment_verified: verified,
            amount_paid: Money(15_000),
        }
    }

    #[test]
    fn no_invoices_is_a_conflict() {
        let err = ensure_payment_verified(EnrollmentId::new(1), &[]).unwrap_err();
        assert_eq!(
            err,
            DomainError::Conflict("no invoice exists for enrollment 1".to_string())
        );
    }

    #[test]
    fn unverified_invoices_are_a_conflict() {
        let err = ensure_payment_verified(
            EnrollmentId::new(1),
            &[invoice(1, false), invoice(2, false)],
        )
        .unwrap_err();
        assert_eq!(
            err,
            DomainError::Conflict("payment not verified for enrollment 1".to_string())
        );
    }

    #[test]
    fn any_verified_invoice_passes() {
        let invoices = [invoice(1, false), invoice(2, true)];
        let found = ensure_payment_verified(EnrollmentId::new(1), &invoices).unwrap();
        assert_eq!(found.id, InvoiceId::new(2));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the check passes iff at least one invoice is verified.
        #[test]
        fn gate_passes_iff_some_invoice_verified(
            flags in prop::collection::vec(any::<bool>(), 0..12)
        ) {
            let invoices: Vec<Invoice> = flags
                .iter()
                .enumerate()
                .map(|(i, v)| invoice(i as i64 + 1, *v))
                .collect();

            let result = ensure_payment_verified(EnrollmentId::new(1), &invoices);
            prop_assert_eq!(result.is_ok(), flags.iter().any(|v| *v));
        }
    }
}
