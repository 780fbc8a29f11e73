//! Postgres-backed enrollment store.
//!
//! ## Error Mapping
//!
//! | Source | Code | Maps to |
//! |--------|------|---------|
//! | unique violation on `(course_id, person_id)` | `23505` | `UniqueViolation` (duplicate pair) |
//! | unique violation on `receipt_id` | `23505` | `UniqueViolation` (receipt reuse) |
//! | anything else | | `Backend` |
//!
//! ## Guarded Writes
//!
//! `update` runs in one transaction: the enrollment row is locked with
//! `SELECT ... FOR UPDATE`, its version compared, the invoices read `FOR SHARE` when
//! the payment guard is requested, and only then is the row written. A concurrent
//! writer blocks on the row lock and then sees the bumped version.

use std::sync::Arc;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use campus_core::{
    AggregateRoot, BillingId, CourseId, DiscountId, EnrollmentId, ExpectedVersion, PersonId, ReceiptId,
};
use campus_enrollment::{
    Enrollment, EnrollmentParts, ListQuery, NewEnrollment, Page, ensure_payment_verified,
};

use super::{
    DUPLICATE_COURSE_PERSON, DUPLICATE_RECEIPT, EnrollmentStore, StoreError, WriteGuard,
    guard_rejection,
};
use crate::payments::invoice_from_row;

const SCHEMA: &str = include_str!("../../migrations/0001_enrollment_core.sql");

const SELECT_COLUMNS: &str = r#"
    SELECT id, course_id, person_id, billing_id, receipt_id, discount_id,
           matriculated, enrolled_at, version
    FROM enrollments
"#;

#[derive(Debug, Clone)]
pub struct PostgresEnrollmentStore {
    pool: Arc<PgPool>,
}

impl PostgresEnrollmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the tables if they do not exist yet. Safe to run on every start.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn fetch_one_where(
        &self,
        operation: &str,
        clause: &str,
        binds: &[i64],
    ) -> Result<Option<Enrollment>, StoreError> {
        let sql = format!("{SELECT_COLUMNS} WHERE {clause}");
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(*value);
        }
        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.as_ref().map(enrollment_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl EnrollmentStore for PostgresEnrollmentStore {
    #[instrument(skip(self), fields(enrollment_id = %id), err)]
    async fn get(&self, id: EnrollmentId) -> Result<Option<Enrollment>, StoreError> {
        self.fetch_one_where("get_enrollment", "id = $1", &[id.get()])
            .await
    }

    #[instrument(skip(self), fields(course_id = %course_id, person_id = %person_id), err)]
    async fn find_by_course_and_person(
        &self,
        course_id: CourseId,
        person_id: PersonId,
    ) -> Result<Option<Enrollment>, StoreError> {
        self.fetch_one_where(
            "find_by_course_and_person",
            "course_id = $1 AND person_id = $2",
            &[course_id.get(), person_id.get()],
        )
        .await
    }

    #[instrument(skip(self), fields(receipt_id = %receipt_id), err)]
    async fn find_by_receipt(
        &self,
        receipt_id: ReceiptId,
    ) -> Result<Option<Enrollment>, StoreError> {
        self.fetch_one_where("find_by_receipt", "receipt_id = $1", &[receipt_id.get()])
            .await
    }

    #[instrument(
        skip(self, new),
        fields(course_id = %new.course_id, person_id = %new.person_id),
        err
    )]
    async fn insert(&self, new: NewEnrollment) -> Result<Enrollment, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO enrollments (course_id, person_id, billing_id, receipt_id, enrolled_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, course_id, person_id, billing_id, receipt_id, discount_id,
                      matriculated, enrolled_at, version
            "#,
        )
        .bind(new.course_id.get())
        .bind(new.person_id.get())
        .bind(new.billing_id.get())
        .bind(new.receipt_id.get())
        .bind(new.enrolled_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_enrollment", e))?;

        enrollment_from_row(&row)
    }

    #[instrument(
        skip(self, enrollment),
        fields(enrollment_id = %enrollment.id_typed(), version = tracing::field::Empty),
        err
    )]
    async fn update(
        &self,
        enrollment: &Enrollment,
        expected: ExpectedVersion,
        guard: WriteGuard,
    ) -> Result<Enrollment, StoreError> {
        let id = enrollment.id_typed();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current = lock_version(&mut tx, id).await?;
        let Some(current) = current else {
            rollback(tx).await?;
            return Err(StoreError::NotFound(id));
        };
        if !expected.matches(current) {
            rollback(tx).await?;
            return Err(StoreError::Concurrency(format!(
                "enrollment {id} is at version {current}, expected {expected:?}"
            )));
        }

        if guard == WriteGuard::VerifiedPayment {
            let rows = sqlx::query(
                r#"
                SELECT id, enrollment_id, payment_verified, amount_paid
                FROM invoices
                WHERE enrollment_id = $1
                FOR SHARE
                "#,
            )
            .bind(id.get())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_invoices", e))?;

            let invoices = rows
                .iter()
                .map(invoice_from_row)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            if let Err(err) = ensure_payment_verified(id, &invoices) {
                rollback(tx).await?;
                return Err(guard_rejection(err));
            }
        }

        let row = sqlx::query(
            r#"
            UPDATE enrollments
            SET discount_id = $2, matriculated = $3, version = version + 1
            WHERE id = $1
            RETURNING id, course_id, person_id, billing_id, receipt_id, discount_id,
                      matriculated, enrolled_at, version
            "#,
        )
        .bind(id.get())
        .bind(enrollment.discount_id().map(|d| d.get()))
        .bind(enrollment.is_matriculated())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_enrollment", e))?;

        let stored = enrollment_from_row(&row)?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("version", stored.version());
        Ok(stored)
    }

    #[instrument(skip(self), fields(enrollment_id = %id), err)]
    async fn delete(&self, id: EnrollmentId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM enrollments WHERE id = $1")
            .bind(id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_enrollment", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn list(&self, query: &ListQuery) -> Result<Page<Enrollment>, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrollments")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_enrollments", e))?;

        // Column and direction come from closed enums, never from raw input.
        let dir = query.order.keyword();
        let sql = format!(
            "{SELECT_COLUMNS} ORDER BY {col} {dir}, id {dir} LIMIT $1 OFFSET $2",
            col = query.order_by.column(),
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(query.limit))
            .bind(query.offset() as i64)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_enrollments", e))?;

        let items = rows
            .iter()
            .map(enrollment_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            total: total.max(0) as u64,
        })
    }
}

async fn lock_version(
    tx: &mut Transaction<'_, Postgres>,
    id: EnrollmentId,
) -> Result<Option<u64>, StoreError> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM enrollments WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_enrollment", e))?;
    Ok(version.map(|v| v.max(0) as u64))
}

async fn rollback(tx: Transaction<'_, Postgres>) -> Result<(), StoreError> {
    tx.rollback()
        .await
        .map_err(|e| map_sqlx_error("rollback", e))
}

fn enrollment_from_row(row: &PgRow) -> Result<Enrollment, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Backend(format!("failed to decode enrollment row: {e}"));
    let discount_id: Option<i64> = row.try_get("discount_id").map_err(decode)?;
    let version: i64 = row.try_get("version").map_err(decode)?;

    Ok(Enrollment::restore(EnrollmentParts {
        id: EnrollmentId::new(row.try_get("id").map_err(decode)?),
        course_id: CourseId::new(row.try_get("course_id").map_err(decode)?),
        person_id: PersonId::new(row.try_get("person_id").map_err(decode)?),
        billing_id: BillingId::new(row.try_get("billing_id").map_err(decode)?),
        receipt_id: ReceiptId::new(row.try_get("receipt_id").map_err(decode)?),
        discount_id: discount_id.map(DiscountId::new),
        matriculated: row.try_get("matriculated").map_err(decode)?,
        enrolled_at: row.try_get("enrolled_at").map_err(decode)?,
        version: version.max(0) as u64,
    }))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                let message = match db_err.constraint() {
                    Some("enrollments_receipt_key") => DUPLICATE_RECEIPT,
                    _ => DUPLICATE_COURSE_PERSON,
                };
                return StoreError::UniqueViolation(message.to_string());
            }
            StoreError::Backend(format!(
                "database error in {operation}: {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        _ => StoreError::Backend(format!("sqlx error in {operation}: {err}")),
    }
}
