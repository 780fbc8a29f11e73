use serde::Deserialize;

use campus_core::{BillingId, CourseId, DiscountId, PersonId, ReceiptId};
use campus_enrollment::{EnrollmentPatch, ListQuery};
use campus_infra::orchestrator::{CreateRequest, OrchestratorError};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateEnrollmentRequest {
    pub course_id: CourseId,
    pub person_id: PersonId,
    pub billing_id: BillingId,
    pub receipt_id: ReceiptId,
}

impl From<CreateEnrollmentRequest> for CreateRequest {
    fn from(body: CreateEnrollmentRequest) -> Self {
        CreateRequest {
            course_id: body.course_id,
            person_id: body.person_id,
            billing_id: body.billing_id,
            receipt_id: body.receipt_id,
        }
    }
}

/// Partial update; absent fields are left alone.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateEnrollmentRequest {
    pub discount_id: Option<DiscountId>,
    pub matriculated: Option<bool>,
}

impl From<UpdateEnrollmentRequest> for EnrollmentPatch {
    fn from(body: UpdateEnrollmentRequest) -> Self {
        EnrollmentPatch {
            discount_id: body.discount_id,
            matriculated: body.matriculated,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListEnrollmentsParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub order_by: Option<String>,
    pub order: Option<String>,
}

impl ListEnrollmentsParams {
    pub fn to_query(&self) -> Result<ListQuery, OrchestratorError> {
        Ok(ListQuery::parse(
            self.page,
            self.limit,
            self.order_by.as_deref(),
            self.order.as_deref(),
        )?)
    }
}
