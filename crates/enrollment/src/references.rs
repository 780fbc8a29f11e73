//! Records an enrollment points at but does not own.
//!
//! Their CRUD lives elsewhere; only the attributes the lifecycle needs are modelled
//! (identity for precondition checks, LMS identities for the triggers, a contact
//! address for invitations).

use serde::{Deserialize, Serialize};

use campus_core::{
    BillingId, CourseId, DiscountId, DomainError, Entity, EntityKind, PersonId, ReceiptId,
    ValueObject,
};

/// Address an invitation notification is delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactAddress(String);

impl ContactAddress {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_string();
        if value.is_empty() {
            return Err(DomainError::validation("contact address must not be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for ContactAddress {}

impl core::fmt::Display for ContactAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub name: String,
    /// Remote course id in the LMS, once the course has been provisioned there.
    pub lms_course_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub first_names: String,
    pub last_names: String,
    /// National identity document number (cédula); doubles as the LMS username.
    pub document_number: String,
    pub email: Option<ContactAddress>,
}

impl Person {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_names.trim(), self.last_names.trim())
    }

    /// Username the LMS account was provisioned with.
    pub fn lms_username(&self) -> String {
        self.document_number.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRecord {
    pub id: BillingId,
    pub holder_name: String,
    pub tax_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: ReceiptId,
    pub storage_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discount {
    pub id: DiscountId,
    pub name: String,
    /// Whole percent off the course price.
    pub percentage: u8,
}

macro_rules! impl_entity {
    ($t:ty, $id:ty, $kind:expr) => {
        impl Entity for $t {
            type Id = $id;

            const KIND: EntityKind = $kind;

            fn id(&self) -> Self::Id {
                self.id
            }
        }
    };
}

impl_entity!(Course, CourseId, EntityKind::Course);
impl_entity!(Person, PersonId, EntityKind::Person);
impl_entity!(BillingRecord, BillingId, EntityKind::Billing);
impl_entity!(Receipt, ReceiptId, EntityKind::Receipt);
impl_entity!(Discount, DiscountId, EntityKind::Discount);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_address_is_trimmed_and_required() {
        assert_eq!(
            ContactAddress::new("  ana@example.org ").unwrap().as_str(),
            "ana@example.org"
        );
        assert!(ContactAddress::new("   ").is_err());
    }

    #[test]
    fn lms_username_is_normalised_document_number() {
        let person = Person {
            id: PersonId::new(1),
            first_names: "Ana".to_string(),
            last_names: "Pérez".to_string(),
            document_number: " 17ABC ".to_string(),
            email: None,
        };
        assert_eq!(person.lms_username(), "17abc");
        assert_eq!(person.full_name(), "Ana Pérez");
    }
}
