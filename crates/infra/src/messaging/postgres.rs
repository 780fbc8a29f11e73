use std::sync::Arc;

use sqlx::PgPool;
use tracing::instrument;

use campus_core::CourseId;

use super::{MessagingChannelDirectory, MessagingError};

#[derive(Debug, Clone)]
pub struct PostgresChannelDirectory {
    pool: Arc<PgPool>,
}

impl PostgresChannelDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn fetch_link(&self, course_id: CourseId) -> Result<Option<String>, MessagingError> {
        sqlx::query_scalar("SELECT invitation_link FROM messaging_channels WHERE course_id = $1")
            .bind(course_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| MessagingError::Directory(e.to_string()))
    }
}

#[async_trait::async_trait]
impl MessagingChannelDirectory for PostgresChannelDirectory {
    #[instrument(skip(self), fields(course_id = %course_id), err)]
    async fn exists_for_course(&self, course_id: CourseId) -> Result<bool, MessagingError> {
        Ok(self.fetch_link(course_id).await?.is_some())
    }

    #[instrument(skip(self), fields(course_id = %course_id), err)]
    async fn invitation_link(&self, course_id: CourseId) -> Result<Option<String>, MessagingError> {
        // Blank links are stored by admins who have not set the group up yet.
        Ok(self
            .fetch_link(course_id)
            .await?
            .filter(|link| !link.trim().is_empty()))
    }
}
