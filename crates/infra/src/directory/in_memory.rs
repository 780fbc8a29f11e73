use std::collections::HashMap;

use tokio::sync::RwLock;

use campus_core::Entity;

use super::{EntityLookup, LookupError};

/// In-memory directory for one record type.
///
/// Used by the dev binary and tests; records are seeded through [`insert`](Self::insert).
pub struct InMemoryDirectory<T: Entity> {
    records: RwLock<HashMap<T::Id, T>>,
}

impl<T: Entity> Default for InMemoryDirectory<T> {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Entity> InMemoryDirectory<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: T) {
        self.records.write().await.insert(record.id(), record);
    }

    pub async fn remove(&self, id: T::Id) -> Option<T> {
        self.records.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait::async_trait]
impl<T> EntityLookup<T> for InMemoryDirectory<T>
where
    T: Entity + Clone,
{
    async fn find_by_id(&self, id: T::Id) -> Result<Option<T>, LookupError> {
        Ok(self.records.read().await.get(&id).cloned())
    }
}
