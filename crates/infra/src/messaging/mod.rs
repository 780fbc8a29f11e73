//! Course messaging channels and invitation delivery.
//!
//! A course may have a group chat channel with an invitation link. Once a person is
//! matriculated they are sent that link. Nothing in this path is allowed to fail a
//! matriculation; callers treat every error here as a soft failure.

mod in_memory;
mod postgres;
mod webhook;

use serde::Serialize;
use thiserror::Error;

use campus_core::CourseId;
use campus_enrollment::{ContactAddress, Course, Person};

pub use in_memory::{InMemoryChannelDirectory, RecordingNotificationSender, SentInvitation};
pub use postgres::PostgresChannelDirectory;
pub use webhook::WebhookNotificationSender;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessagingError {
    #[error("channel directory error: {0}")]
    Directory(String),

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait::async_trait]
pub trait MessagingChannelDirectory: Send + Sync {
    async fn exists_for_course(&self, course_id: CourseId) -> Result<bool, MessagingError>;

    /// `None` when the channel exists but has no invitation link yet.
    async fn invitation_link(&self, course_id: CourseId) -> Result<Option<String>, MessagingError>;
}

#[async_trait::async_trait]
pub trait NotificationSender: Send + Sync {
    /// False when no delivery backend is set up; the invitation is then skipped.
    fn is_configured(&self) -> bool;

    /// Returns whether the backend accepted the message.
    async fn send_invitation(
        &self,
        to: &ContactAddress,
        invitation: &Invitation,
    ) -> Result<bool, MessagingError>;
}

/// Rendered invitation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invitation {
    pub subject: String,
    pub html: String,
    pub link: String,
}

impl Invitation {
    pub fn render(person: &Person, course: &Course, link: &str) -> Self {
        Self {
            subject: format!("Join the {} group", course.name),
            html: format!(
                "<p>Hello {name},</p>\
                 <p>Your enrollment in <strong>{course}</strong> is confirmed. \
                 Join the course group here: <a href=\"{link}\">{link}</a></p>",
                name = person.full_name(),
                course = course.name,
            ),
            link: link.to_string(),
        }
    }
}
