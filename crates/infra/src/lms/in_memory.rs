use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use campus_enrollment::{Course, Person};

use super::{LmsClient, LmsError, LmsOutcome, remote_course_id};
use crate::external::CallJournal;

#[derive(Debug, Default)]
struct Behaviour {
    enroll_failure: Option<LmsError>,
    unenroll_failure: Option<LmsError>,
    delay: Option<Duration>,
}

/// In-memory LMS: keeps the set of seats and logs each call to a [`CallJournal`].
///
/// Journal entries look like `lms.enroll course=3 user=0102`. Failures and latency can
/// be injected to exercise rollback and timeout paths.
#[derive(Debug, Default)]
pub struct InMemoryLms {
    seats: Mutex<HashSet<(String, i64)>>,
    behaviour: Mutex<Behaviour>,
    journal: CallJournal,
}

impl InMemoryLms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: CallJournal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub fn fail_enroll_with(&self, err: LmsError) {
        if let Ok(mut b) = self.behaviour.lock() {
            b.enroll_failure = Some(err);
        }
    }

    pub fn fail_unenroll_with(&self, err: LmsError) {
        if let Ok(mut b) = self.behaviour.lock() {
            b.unenroll_failure = Some(err);
        }
    }

    /// Make every call sleep first (for timeout tests).
    pub fn delay_calls_by(&self, delay: Duration) {
        if let Ok(mut b) = self.behaviour.lock() {
            b.delay = Some(delay);
        }
    }

    pub fn is_enrolled(&self, username: &str, remote_course: i64) -> bool {
        self.seats
            .lock()
            .map(|s| s.contains(&(username.to_string(), remote_course)))
            .unwrap_or(false)
    }

    /// Seat a person directly, as if enrolled out of band.
    pub fn seed_seat(&self, username: &str, remote_course: i64) {
        if let Ok(mut seats) = self.seats.lock() {
            seats.insert((username.to_string(), remote_course));
        }
    }

    pub fn journal(&self) -> &CallJournal {
        &self.journal
    }

    fn prepare(&self, unenroll: bool) -> (Option<LmsError>, Option<Duration>) {
        match self.behaviour.lock() {
            Ok(b) => (
                if unenroll {
                    b.unenroll_failure.clone()
                } else {
                    b.enroll_failure.clone()
                },
                b.delay,
            ),
            Err(_) => (Some(LmsError::Network("lms fake poisoned".to_string())), None),
        }
    }

    fn toggle_seat(&self, username: String, remote_course: i64, seat: bool) -> bool {
        match self.seats.lock() {
            Ok(mut seats) if seat => seats.insert((username, remote_course)),
            Ok(mut seats) => seats.remove(&(username, remote_course)),
            Err(_) => false,
        }
    }
}

#[async_trait::async_trait]
impl LmsClient for InMemoryLms {
    async fn enroll(&self, person: &Person, course: &Course) -> Result<LmsOutcome, LmsError> {
        let username = person.lms_username();
        self.journal
            .record(format!("lms.enroll course={} user={username}", course.id));

        let (failure, delay) = self.prepare(false);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let remote = remote_course_id(course)?;
        if self.toggle_seat(username, remote, true) {
            Ok(LmsOutcome::Applied)
        } else {
            Ok(LmsOutcome::AlreadyEnrolled)
        }
    }

    async fn unenroll(&self, person: &Person, course: &Course) -> Result<LmsOutcome, LmsError> {
        let username = person.lms_username();
        self.journal
            .record(format!("lms.unenroll course={} user={username}", course.id));

        let (failure, delay) = self.prepare(true);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let remote = remote_course_id(course)?;
        if self.toggle_seat(username, remote, false) {
            Ok(LmsOutcome::Applied)
        } else {
            Ok(LmsOutcome::NotEnrolled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_core::{CourseId, PersonId};

    fn person() -> Person {
        Person {
            id: PersonId::new(1),
            first_names: "Ana".to_string(),
            last_names: "Pérez".to_string(),
            document_number: "0102".to_string(),
            email: None,
        }
    }

    fn course(lms: Option<i64>) -> Course {
        Course {
            id: CourseId::new(3),
            name: "Rust I".to_string(),
            lms_course_id: lms,
        }
    }

    #[tokio::test]
    async fn enroll_is_idempotent() {
        let lms = InMemoryLms::new();
        assert_eq!(lms.enroll(&person(), &course(Some(30))).await, Ok(LmsOutcome::Applied));
        assert_eq!(
            lms.enroll(&person(), &course(Some(30))).await,
            Ok(LmsOutcome::AlreadyEnrolled)
        );
        assert!(lms.is_enrolled("0102", 30));
        assert_eq!(lms.journal().entries().len(), 2);
    }

    #[tokio::test]
    async fn unenroll_without_seat_is_not_enrolled() {
        let lms = InMemoryLms::new();
        assert_eq!(
            lms.unenroll(&person(), &course(Some(30))).await,
            Ok(LmsOutcome::NotEnrolled)
        );
    }

    #[tokio::test]
    async fn unmapped_course_and_injected_failures_surface() {
        let lms = InMemoryLms::new();
        assert_eq!(
            lms.enroll(&person(), &course(None)).await,
            Err(LmsError::MissingCourseMapping(CourseId::new(3)))
        );

        lms.fail_enroll_with(LmsError::Network("connection refused".to_string()));
        assert!(matches!(
            lms.enroll(&person(), &course(Some(30))).await,
            Err(LmsError::Network(_))
        ));
    }
}
