//! Postgres-backed lookups for referenced records.

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tracing::instrument;

use campus_core::{BillingId, CourseId, DiscountId, PersonId, ReceiptId};
use campus_enrollment::{BillingRecord, ContactAddress, Course, Discount, Person, Receipt};

use super::{EntityLookup, LookupError};

/// Reads courses, people, billing records, receipts and discounts from their tables.
#[derive(Debug, Clone)]
pub struct PostgresDirectory {
    pool: Arc<PgPool>,
}

impl PostgresDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn backend(operation: &str, err: sqlx::Error) -> LookupError {
    LookupError::Backend(format!("sqlx error in {operation}: {err}"))
}

#[async_trait::async_trait]
impl EntityLookup<Course> for PostgresDirectory {
    #[instrument(skip(self), fields(course_id = %id), err)]
    async fn find_by_id(&self, id: CourseId) -> Result<Option<Course>, LookupError> {
        let row = sqlx::query("SELECT id, name, lms_course_id FROM courses WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| backend("find_course", e))?;

        row.map(|row| {
            Ok::<_, sqlx::Error>(Course {
                id: CourseId::new(row.try_get("id")?),
                name: row.try_get("name")?,
                lms_course_id: row.try_get("lms_course_id")?,
            })
        })
        .transpose()
        .map_err(|e| backend("decode_course", e))
    }
}

#[async_trait::async_trait]
impl EntityLookup<Person> for PostgresDirectory {
    #[instrument(skip(self), fields(person_id = %id), err)]
    async fn find_by_id(&self, id: PersonId) -> Result<Option<Person>, LookupError> {
        let row = sqlx::query(
            r#"
            SELECT id, first_names, last_names, document_number, email
            FROM people
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| backend("find_person", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decode = |e: sqlx::Error| backend("decode_person", e);
        let email: Option<String> = row.try_get("email").map_err(decode)?;

        Ok(Some(Person {
            id: PersonId::new(row.try_get("id").map_err(decode)?),
            first_names: row.try_get("first_names").map_err(decode)?,
            last_names: row.try_get("last_names").map_err(decode)?,
            document_number: row.try_get("document_number").map_err(decode)?,
            // A blank address column means "no address on file".
            email: email.and_then(|e| ContactAddress::new(e).ok()),
        }))
    }
}

#[async_trait::async_trait]
impl EntityLookup<BillingRecord> for PostgresDirectory {
    #[instrument(skip(self), fields(billing_id = %id), err)]
    async fn find_by_id(&self, id: BillingId) -> Result<Option<BillingRecord>, LookupError> {
        let row = sqlx::query("SELECT id, holder_name, tax_id FROM billing_records WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| backend("find_billing", e))?;

        row.map(|row| {
            Ok::<_, sqlx::Error>(BillingRecord {
                id: BillingId::new(row.try_get("id")?),
                holder_name: row.try_get("holder_name")?,
                tax_id: row.try_get("tax_id")?,
            })
        })
        .transpose()
        .map_err(|e| backend("decode_billing", e))
    }
}

#[async_trait::async_trait]
impl EntityLookup<Receipt> for PostgresDirectory {
    #[instrument(skip(self), fields(receipt_id = %id), err)]
    async fn find_by_id(&self, id: ReceiptId) -> Result<Option<Receipt>, LookupError> {
        let row = sqlx::query("SELECT id, storage_key FROM receipts WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| backend("find_receipt", e))?;

        row.map(|row| {
            Ok::<_, sqlx::Error>(Receipt {
                id: ReceiptId::new(row.try_get("id")?),
                storage_key: row.try_get("storage_key")?,
            })
        })
        .transpose()
        .map_err(|e| backend("decode_receipt", e))
    }
}

#[async_trait::async_trait]
impl EntityLookup<Discount> for PostgresDirectory {
    #[instrument(skip(self), fields(discount_id = %id), err)]
    async fn find_by_id(&self, id: DiscountId) -> Result<Option<Discount>, LookupError> {
        let row = sqlx::query("SELECT id, name, percentage FROM discounts WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| backend("find_discount", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let decode = |e: sqlx::Error| backend("decode_discount", e);
        let percentage: i16 = row.try_get("percentage").map_err(decode)?;

        Ok(Some(Discount {
            id: DiscountId::new(row.try_get("id").map_err(decode)?),
            name: row.try_get("name").map_err(decode)?,
            percentage: u8::try_from(percentage).map_err(|_| {
                LookupError::Backend(format!("discount {id} has out-of-range percentage {percentage}"))
            })?,
        }))
    }
}
