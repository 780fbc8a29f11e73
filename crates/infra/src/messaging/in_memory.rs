use std::collections::HashMap;
use std::sync::Mutex;

use campus_core::CourseId;
use campus_enrollment::ContactAddress;

use super::{Invitation, MessagingChannelDirectory, MessagingError, NotificationSender};
use crate::external::CallJournal;

/// Channels keyed by course; the value is the optional invitation link.
#[derive(Debug, Default)]
pub struct InMemoryChannelDirectory {
    channels: Mutex<HashMap<CourseId, Option<String>>>,
    failure: Mutex<Option<MessagingError>>,
}

impl InMemoryChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, course_id: CourseId, link: Option<&str>) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.insert(course_id, link.map(str::to_string));
        }
    }

    pub fn fail_with(&self, err: MessagingError) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(err);
        }
    }

    fn check_failure(&self) -> Result<(), MessagingError> {
        match self.failure.lock() {
            Ok(failure) => failure.clone().map_or(Ok(()), Err),
            Err(_) => Err(MessagingError::Directory("channel fake poisoned".to_string())),
        }
    }
}

#[async_trait::async_trait]
impl MessagingChannelDirectory for InMemoryChannelDirectory {
    async fn exists_for_course(&self, course_id: CourseId) -> Result<bool, MessagingError> {
        self.check_failure()?;
        Ok(self
            .channels
            .lock()
            .map(|c| c.contains_key(&course_id))
            .unwrap_or(false))
    }

    async fn invitation_link(&self, course_id: CourseId) -> Result<Option<String>, MessagingError> {
        self.check_failure()?;
        Ok(self
            .channels
            .lock()
            .ok()
            .and_then(|c| c.get(&course_id).cloned().flatten()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentInvitation {
    pub to: String,
    pub subject: String,
    pub link: String,
}

/// Notification sender that keeps what it sent instead of delivering it.
#[derive(Debug)]
pub struct RecordingNotificationSender {
    configured: bool,
    sent: Mutex<Vec<SentInvitation>>,
    failure: Mutex<Option<MessagingError>>,
    journal: CallJournal,
}

impl RecordingNotificationSender {
    pub fn new(configured: bool) -> Self {
        Self::with_journal(configured, CallJournal::new())
    }

    pub fn with_journal(configured: bool, journal: CallJournal) -> Self {
        Self {
            configured,
            sent: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            journal,
        }
    }

    pub fn fail_with(&self, err: MessagingError) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = Some(err);
        }
    }

    pub fn sent(&self) -> Vec<SentInvitation> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl NotificationSender for RecordingNotificationSender {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn send_invitation(
        &self,
        to: &ContactAddress,
        invitation: &Invitation,
    ) -> Result<bool, MessagingError> {
        self.journal.record(format!("messaging.invite to={to}"));

        if let Some(err) = self.failure.lock().ok().and_then(|f| f.clone()) {
            return Err(err);
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentInvitation {
                to: to.to_string(),
                subject: invitation.subject.clone(),
                link: invitation.link.clone(),
            });
        }
        Ok(true)
    }
}
