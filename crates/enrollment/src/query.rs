//! Listing parameters for enrollments.

use core::cmp::Ordering;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use campus_core::{AggregateRoot, DomainError};

use crate::Enrollment;

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 100;

/// Column an enrollment listing is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Id,
    EnrolledAt,
    CourseId,
    PersonId,
    Matriculated,
}

impl SortField {
    /// Column name used by SQL-backed stores.
    pub fn column(&self) -> &'static str {
        match self {
            SortField::Id => "id",
            SortField::EnrolledAt => "enrolled_at",
            SortField::CourseId => "course_id",
            SortField::PersonId => "person_id",
            SortField::Matriculated => "matriculated",
        }
    }
}

impl FromStr for SortField {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "id" => Ok(SortField::Id),
            "enrolled_at" | "enrolledat" => Ok(SortField::EnrolledAt),
            "course_id" | "courseid" => Ok(SortField::CourseId),
            "person_id" | "personid" => Ok(SortField::PersonId),
            "matriculated" => Ok(SortField::Matriculated),
            other => Err(DomainError::validation(format!(
                "cannot order enrollments by '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(DomainError::validation(format!(
                "order must be 'asc' or 'desc', got '{other}'"
            ))),
        }
    }
}

/// One page of enrollments, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub order_by: SortField,
    pub order: SortOrder,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
            order_by: SortField::Id,
            order: SortOrder::Asc,
        }
    }
}

impl ListQuery {
    /// Build a query from raw request values, applying defaults for absent ones.
    pub fn parse(
        page: Option<u32>,
        limit: Option<u32>,
        order_by: Option<&str>,
        order: Option<&str>,
    ) -> Result<Self, DomainError> {
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(DomainError::validation("page starts at 1"));
        }
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        if limit == 0 || limit > MAX_LIMIT {
            return Err(DomainError::validation(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }

        Ok(Self {
            page,
            limit,
            order_by: order_by
                .map(|s| s.parse::<SortField>())
                .transpose()?
                .unwrap_or(SortField::Id),
            order: order
                .map(|s| s.parse::<SortOrder>())
                .transpose()?
                .unwrap_or(SortOrder::Asc),
        })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    /// Compare two enrollments under this ordering; ties broken by id.
    pub fn compare(&self, a: &Enrollment, b: &Enrollment) -> Ordering {
        let primary = match self.order_by {
            SortField::Id => a.id().cmp(b.id()),
            SortField::EnrolledAt => a.enrolled_at().cmp(&b.enrolled_at()),
            SortField::CourseId => a.course_id().cmp(&b.course_id()),
            SortField::PersonId => a.person_id().cmp(&b.person_id()),
            SortField::Matriculated => a.is_matriculated().cmp(&b.is_matriculated()),
        }
        .then_with(|| a.id().cmp(b.id()));

        match self.order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        }
    }

    /// Sort and slice an in-memory collection.
    pub fn apply(&self, mut all: Vec<Enrollment>) -> Page<Enrollment> {
        let total = all.len() as u64;
        all.sort_by(|a, b| self.compare(a, b));
        let items = all
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.limit as usize)
            .collect();
        Page { items, total }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewEnrollment;
    use campus_core::{BillingId, CourseId, EnrollmentId, PersonId, ReceiptId};
    use chrono::Utc;

    fn enrollment(id: i64, course: i64) -> Enrollment {
        Enrollment::create(
            EnrollmentId::new(id),
            &NewEnrollment {
                course_id: CourseId::new(course),
                person_id: PersonId::new(id),
                billing_id: BillingId::new(id),
                receipt_id: ReceiptId::new(id),
                enrolled_at: Utc::now(),
            },
        )
    }

    #[test]
    fn parse_applies_defaults() {
        let q = ListQuery::parse(None, None, None, None).unwrap();
        assert_eq!(q, ListQuery::default());
    }

    #[test]
    fn parse_rejects_bad_values() {
        assert!(ListQuery::parse(Some(0), None, None, None).is_err());
        assert!(ListQuery::parse(None, Some(101), None, None).is_err());
        assert!(ListQuery::parse(None, None, Some("name"), None).is_err());
        assert!(ListQuery::parse(None, None, None, Some("sideways")).is_err());
    }

    #[test]
    fn apply_sorts_and_pages() {
        let all = vec![enrollment(1, 3), enrollment(2, 1), enrollment(3, 2)];
        let q = ListQuery::parse(Some(1), Some(2), Some("course_id"), Some("desc")).unwrap();

        let page = q.apply(all);
        assert_eq!(page.total, 3);
        let ids: Vec<i64> = page.items.iter().map(|e| e.id_typed().get()).collect();
        assert_eq!(ids, vec![1, 3]);

        let q2 = ListQuery { page: 2, ..q };
        let page2 = q2.apply(vec![enrollment(1, 3), enrollment(2, 1), enrollment(3, 2)]);
        assert_eq!(page2.items.len(), 1);
        assert_eq!(page2.items[0].id_typed(), EnrollmentId::new(2));
    }
}
