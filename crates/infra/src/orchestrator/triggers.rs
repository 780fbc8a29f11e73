//! Side effects fired after a successful matriculation write.
//!
//! Each trigger declares a [`TriggerKind`]. The pipeline runs triggers strictly in
//! registration order: a `Required` failure stops it (later triggers never run) and
//! is handed back for compensation, a `BestEffort` failure is logged and skipped.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use campus_enrollment::{Course, Enrollment, Person, TriggerKind};

use crate::external::{CallContext, ExternalCallError};
use crate::lms::{LmsClient, LmsError, LmsOutcome};
use crate::messaging::{Invitation, MessagingChannelDirectory, MessagingError, NotificationSender};

/// Everything a trigger may need about the freshly matriculated enrollment.
pub struct TriggerContext<'a> {
    pub enrollment: &'a Enrollment,
    pub course: &'a Course,
    pub person: &'a Person,
    pub call: &'a CallContext,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error(transparent)]
    Lms(#[from] LmsError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Call(#[from] ExternalCallError),
}

#[async_trait::async_trait]
pub trait MatriculationTrigger: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> TriggerKind;

    async fn fire(&self, ctx: &TriggerContext<'_>) -> Result<(), TriggerError>;
}

/// A `Required` trigger failed; the write it followed must be compensated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredTriggerFailure {
    pub trigger: &'static str,
    pub error: TriggerError,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TriggerReport {
    pub fired: Vec<&'static str>,
    pub soft_failures: Vec<(&'static str, TriggerError)>,
}

#[derive(Clone, Default)]
pub struct TriggerPipeline {
    triggers: Vec<Arc<dyn MatriculationTrigger>>,
}

impl TriggerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, trigger: Arc<dyn MatriculationTrigger>) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// LMS enrolment (required) followed by the messaging invitation (best effort).
    pub fn standard(
        lms: Arc<dyn LmsClient>,
        channels: Arc<dyn MessagingChannelDirectory>,
        sender: Arc<dyn NotificationSender>,
    ) -> Self {
        Self::new()
            .with(Arc::new(LmsEnrollmentTrigger::new(lms)))
            .with(Arc::new(MessagingInvitationTrigger::new(channels, sender)))
    }

    pub async fn run(
        &self,
        ctx: &TriggerContext<'_>,
    ) -> Result<TriggerReport, RequiredTriggerFailure> {
        let enrollment_id = ctx.enrollment.id_typed();
        let mut report = TriggerReport::default();

        for trigger in &self.triggers {
            match trigger.fire(ctx).await {
                Ok(()) => report.fired.push(trigger.name()),
                Err(error) if trigger.kind().is_required() => {
                    return Err(RequiredTriggerFailure {
                        trigger: trigger.name(),
                        error,
                    });
                }
                Err(error) => {
                    warn!(
                        trigger = trigger.name(),
                        enrollment_id = %enrollment_id,
                        error = %error,
                        "best-effort trigger failed; continuing"
                    );
                    report.soft_failures.push((trigger.name(), error));
                }
            }
        }

        Ok(report)
    }
}

/// Enrols the person in the course's LMS counterpart.
pub struct LmsEnrollmentTrigger {
    lms: Arc<dyn LmsClient>,
}

impl LmsEnrollmentTrigger {
    pub fn new(lms: Arc<dyn LmsClient>) -> Self {
        Self { lms }
    }
}

#[async_trait::async_trait]
impl MatriculationTrigger for LmsEnrollmentTrigger {
    fn name(&self) -> &'static str {
        "lms enrollment"
    }

    fn kind(&self) -> TriggerKind {
        TriggerKind::Required
    }

    async fn fire(&self, ctx: &TriggerContext<'_>) -> Result<(), TriggerError> {
        let outcome = ctx
            .call
            .run("lms enroll", self.lms.enroll(ctx.person, ctx.course))
            .await??;

        if outcome == LmsOutcome::AlreadyEnrolled {
            info!(enrollment_id = %ctx.enrollment.id_typed(), "person already enrolled in lms course");
        }
        Ok(())
    }
}

/// Sends the course group invitation link to the person.
pub struct MessagingInvitationTrigger {
    channels: Arc<dyn MessagingChannelDirectory>,
    sender: Arc<dyn NotificationSender>,
}

impl MessagingInvitationTrigger {
    pub fn new(
        channels: Arc<dyn MessagingChannelDirectory>,
        sender: Arc<dyn NotificationSender>,
    ) -> Self {
        Self { channels, sender }
    }
}

#[async_trait::async_trait]
impl MatriculationTrigger for MessagingInvitationTrigger {
    fn name(&self) -> &'static str {
        "messaging invitation"
    }

    fn kind(&self) -> TriggerKind {
        TriggerKind::BestEffort
    }

    async fn fire(&self, ctx: &TriggerContext<'_>) -> Result<(), TriggerError> {
        let course_id = ctx.course.id;

        let exists = ctx
            .call
            .run("channel lookup", self.channels.exists_for_course(course_id))
            .await??;
        if !exists {
            debug!(course_id = %course_id, "course has no messaging channel");
            return Ok(());
        }

        let link = ctx
            .call
            .run("invitation link lookup", self.channels.invitation_link(course_id))
            .await??;
        let Some(link) = link else {
            debug!(course_id = %course_id, "messaging channel has no invitation link");
            return Ok(());
        };

        if !self.sender.is_configured() {
            debug!("notification sender not configured; invitation skipped");
            return Ok(());
        }

        let Some(address) = &ctx.person.email else {
            debug!(person_id = %ctx.person.id, "person has no contact address");
            return Ok(());
        };

        let invitation = Invitation::render(ctx.person, ctx.course, &link);
        let accepted = ctx
            .call
            .run("send invitation", self.sender.send_invitation(address, &invitation))
            .await??;
        if !accepted {
            return Err(MessagingError::Delivery("invitation was not accepted".to_string()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{CallJournal, CancellationSignal};
    use crate::lms::InMemoryLms;
    use crate::messaging::{InMemoryChannelDirectory, RecordingNotificationSender};
    use campus_core::{BillingId, CourseId, EnrollmentId, PersonId, ReceiptId};
    use campus_enrollment::{ContactAddress, NewEnrollment};
    use chrono::Utc;
    use std::time::Duration;

    struct Fixture {
        enrollment: Enrollment,
        course: Course,
        person: Person,
        call: CallContext,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                enrollment: Enrollment::create(
                    EnrollmentId::new(1),
                    &NewEnrollment {
                        course_id: CourseId::new(2),
                        person_id: PersonId::new(3),
                        billing_id: BillingId::new(4),
                        receipt_id: ReceiptId::new(5),
                        enrolled_at: Utc::now(),
                    },
                ),
                course: Course {
                    id: CourseId::new(2),
                    name: "Rust I".to_string(),
                    lms_course_id: Some(20),
                },
                person: Person {
                    id: PersonId::new(3),
                    first_names: "Ana".to_string(),
                    last_names: "Pérez".to_string(),
                    document_number: "0102".to_string(),
                    email: Some(ContactAddress::new("ana@example.org").unwrap()),
                },
                call: CallContext::new(Duration::from_secs(1), CancellationSignal::none()),
            }
        }

        fn ctx(&self) -> TriggerContext<'_> {
            TriggerContext {
                enrollment: &self.enrollment,
                course: &self.course,
                person: &self.person,
                call: &self.call,
            }
        }
    }

    struct Pipeline {
        pipeline: TriggerPipeline,
        lms: Arc<InMemoryLms>,
        channels: Arc<InMemoryChannelDirectory>,
        sender: Arc<RecordingNotificationSender>,
        journal: CallJournal,
    }

    fn pipeline(sender_configured: bool) -> Pipeline {
        let journal = CallJournal::new();
        let lms = Arc::new(InMemoryLms::with_journal(journal.clone()));
        let channels = Arc::new(InMemoryChannelDirectory::new());
        let sender = Arc::new(RecordingNotificationSender::with_journal(
            sender_configured,
            journal.clone(),
        ));
        Pipeline {
            pipeline: TriggerPipeline::standard(lms.clone(), channels.clone(), sender.clone()),
            lms,
            channels,
            sender,
            journal,
        }
    }

    #[tokio::test]
    async fn lms_runs_before_messaging() {
        let fx = Fixture::new();
        let p = pipeline(true);
        p.channels.add_channel(CourseId::new(2), Some("https://chat.example/j/1"));

        let report = p.pipeline.run(&fx.ctx()).await.unwrap();
        assert_eq!(report.fired, vec!["lms enrollment", "messaging invitation"]);
        assert_eq!(
            p.journal.entries(),
            vec![
                "lms.enroll course=2 user=0102".to_string(),
                "messaging.invite to=ana@example.org".to_string(),
            ]
        );
        assert!(p.lms.is_enrolled("0102", 20));
        assert_eq!(p.sender.sent()[0].link, "https://chat.example/j/1");
    }

    #[tokio::test]
    async fn required_failure_stops_the_pipeline() {
        let fx = Fixture::new();
        let p = pipeline(true);
        p.channels.add_channel(CourseId::new(2), Some("https://chat.example/j/1"));
        p.lms.fail_enroll_with(LmsError::Network("connection refused".to_string()));

        let failure = p.pipeline.run(&fx.ctx()).await.unwrap_err();
        assert_eq!(failure.trigger, "lms enrollment");
        assert!(p.sender.sent().is_empty());
        assert_eq!(p.journal.entries().len(), 1);
    }

    #[tokio::test]
    async fn best_effort_failure_is_reported_not_raised() {
        let fx = Fixture::new();
        let p = pipeline(true);
        p.channels.add_channel(CourseId::new(2), Some("https://chat.example/j/1"));
        p.sender
            .fail_with(MessagingError::Delivery("mailbox full".to_string()));

        let report = p.pipeline.run(&fx.ctx()).await.unwrap();
        assert_eq!(report.fired, vec!["lms enrollment"]);
        assert_eq!(report.soft_failures.len(), 1);
        assert_eq!(report.soft_failures[0].0, "messaging invitation");
    }

    #[tokio::test]
    async fn messaging_skips_quietly_when_nothing_to_send() {
        let fx = Fixture::new();

        // No channel.
        let p = pipeline(true);
        assert!(p.pipeline.run(&fx.ctx()).await.unwrap().soft_failures.is_empty());
        assert!(p.sender.sent().is_empty());

        // Channel without link.
        let p = pipeline(true);
        p.channels.add_channel(CourseId::new(2), None);
        p.pipeline.run(&fx.ctx()).await.unwrap();
        assert!(p.sender.sent().is_empty());

        // Sender not configured.
        let p = pipeline(false);
        p.channels.add_channel(CourseId::new(2), Some("https://chat.example/j/1"));
        let report = p.pipeline.run(&fx.ctx()).await.unwrap();
        assert!(report.soft_failures.is_empty());
        assert!(p.sender.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lms_times_out_as_required_failure() {
        let mut fx = Fixture::new();
        fx.call = CallContext::new(Duration::from_millis(100), CancellationSignal::none());
        let p = pipeline(true);
        p.lms.delay_calls_by(Duration::from_secs(30));

        let failure = p.pipeline.run(&fx.ctx()).await.unwrap_err();
        assert!(matches!(failure.error, TriggerError::Call(ExternalCallError::Timeout { .. })));
    }
}
