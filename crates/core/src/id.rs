//! Strongly-typed identifiers used across the domain.
//!
//! Every record in the registration system is keyed by a database-assigned integer.
//! Wrapping them keeps a `PersonId` from ever being passed where a `CourseId` belongs.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of an enrollment (the aggregate root).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnrollmentId(i64);

/// Identifier of a course.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(i64);

/// Identifier of a participant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(i64);

/// Identifier of a billing (fiscal data) record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillingId(i64);

/// Identifier of an uploaded payment receipt.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptId(i64);

/// Identifier of a discount.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscountId(i64);

/// Identifier of an invoice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(i64);

macro_rules! impl_int_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                if value <= 0 {
                    return Err(DomainError::invalid_id(format!(
                        "{}: must be a positive integer",
                        $name
                    )));
                }
                Ok(Self(value))
            }
        }
    };
}

impl_int_newtype!(EnrollmentId, "EnrollmentId");
impl_int_newtype!(CourseId, "CourseId");
impl_int_newtype!(PersonId, "PersonId");
impl_int_newtype!(BillingId, "BillingId");
impl_int_newtype!(ReceiptId, "ReceiptId");
impl_int_newtype!(DiscountId, "DiscountId");
impl_int_newtype!(InvoiceId, "InvoiceId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_ids() {
        let id: CourseId = "42".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn rejects_non_positive_and_garbage() {
        assert!(matches!("0".parse::<PersonId>(), Err(DomainError::InvalidId(_))));
        assert!(matches!("-3".parse::<PersonId>(), Err(DomainError::InvalidId(_))));
        assert!(matches!("abc".parse::<ReceiptId>(), Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn serializes_transparently() {
        let json = serde_json::to_string(&EnrollmentId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}
