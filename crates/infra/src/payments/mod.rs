//! Read-only access to invoices, the source of truth for payment verification.

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use tracing::instrument;

use campus_core::{EnrollmentId, InvoiceId};
use campus_enrollment::{Invoice, Money};

use crate::directory::LookupError;

/// Lists the invoices issued against an enrollment.
#[async_trait::async_trait]
pub trait PaymentGate: Send + Sync {
    async fn invoices_for_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<Vec<Invoice>, LookupError>;
}

/// In-memory invoice table.
#[derive(Debug, Default)]
pub struct InMemoryInvoices {
    invoices: RwLock<Vec<Invoice>>,
}

impl InMemoryInvoices {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, invoice: Invoice) {
        self.invoices.write().await.push(invoice);
    }

    /// Flip the verification flag of an existing invoice. Returns false if absent.
    pub async fn set_verified(&self, id: InvoiceId, verified: bool) -> bool {
        let mut invoices = self.invoices.write().await;
        match invoices.iter_mut().find(|inv| inv.id == id) {
            Some(inv) => {
                inv.payment_verified = verified;
                true
            }
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl PaymentGate for InMemoryInvoices {
    async fn invoices_for_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<Vec<Invoice>, LookupError> {
        Ok(self
            .invoices
            .read()
            .await
            .iter()
            .filter(|inv| inv.enrollment_id == enrollment_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct PostgresPaymentGate {
    pool: Arc<PgPool>,
}

impl PostgresPaymentGate {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl PaymentGate for PostgresPaymentGate {
    #[instrument(skip(self), fields(enrollment_id = %enrollment_id), err)]
    async fn invoices_for_enrollment(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<Vec<Invoice>, LookupError> {
        let rows = sqlx::query(
            r#"
            SELECT id, enrollment_id, payment_verified, amount_paid
            FROM invoices
            WHERE enrollment_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(enrollment_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| LookupError::Backend(format!("sqlx error in list_invoices: {e}")))?;

        rows.iter().map(invoice_from_row).collect()
    }
}

pub(crate) fn invoice_from_row(row: &sqlx::postgres::PgRow) -> Result<Invoice, LookupError> {
    let decode = |e: sqlx::Error| LookupError::Backend(format!("failed to decode invoice row: {e}"));
    let amount: i64 = row.try_get("amount_paid").map_err(decode)?;

    Ok(Invoice {
        id: InvoiceId::new(row.try_get("id").map_err(decode)?),
        enrollment_id: EnrollmentId::new(row.try_get("enrollment_id").map_err(decode)?),
        payment_verified: row.try_get("payment_verified").map_err(decode)?,
        amount_paid: Money(u64::try_from(amount).unwrap_or_default()),
    })
}
