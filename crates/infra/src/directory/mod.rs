//! Read access to the records an enrollment references.
//!
//! Courses, people, billing records, receipts and discounts are owned by other parts
//! of the system. The orchestrator only needs to know whether one exists and, for the
//! triggers, a handful of its attributes.

mod in_memory;
mod postgres;

use std::sync::Arc;

use thiserror::Error;

use campus_core::Entity;
use campus_enrollment::{BillingRecord, Course, Discount, Person, Receipt};

pub use in_memory::InMemoryDirectory;
pub use postgres::PostgresDirectory;

/// A lookup could not be answered (as opposed to answering "absent").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("lookup backend error: {0}")]
    Backend(String),
}

/// Fetch a record by id. `Ok(None)` means it does not exist.
#[async_trait::async_trait]
pub trait EntityLookup<T: Entity>: Send + Sync {
    async fn find_by_id(&self, id: T::Id) -> Result<Option<T>, LookupError>;
}

/// One lookup per referenced record type.
#[derive(Clone)]
pub struct References {
    pub courses: Arc<dyn EntityLookup<Course>>,
    pub people: Arc<dyn EntityLookup<Person>>,
    pub billing: Arc<dyn EntityLookup<BillingRecord>>,
    pub receipts: Arc<dyn EntityLookup<Receipt>>,
    pub discounts: Arc<dyn EntityLookup<Discount>>,
}

impl References {
    /// Empty in-memory directories, returned alongside the handles used to seed them.
    pub fn in_memory() -> (Self, InMemoryReferences) {
        let seeds = InMemoryReferences::default();
        (seeds.as_references(), seeds)
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let dir = Arc::new(PostgresDirectory::new(pool));
        Self {
            courses: dir.clone(),
            people: dir.clone(),
            billing: dir.clone(),
            receipts: dir.clone(),
            discounts: dir,
        }
    }
}

/// Seedable in-memory directories backing [`References::in_memory`].
#[derive(Clone, Default)]
pub struct InMemoryReferences {
    pub courses: Arc<InMemoryDirectory<Course>>,
    pub people: Arc<InMemoryDirectory<Person>>,
    pub billing: Arc<InMemoryDirectory<BillingRecord>>,
    pub receipts: Arc<InMemoryDirectory<Receipt>>,
    pub discounts: Arc<InMemoryDirectory<Discount>>,
}

impl InMemoryReferences {
    pub fn as_references(&self) -> References {
        References {
            courses: self.courses.clone(),
            people: self.people.clone(),
            billing: self.billing.clone(),
            receipts: self.receipts.clone(),
            discounts: self.discounts.clone(),
        }
    }
}
