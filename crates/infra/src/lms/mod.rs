//! Learning management system (LMS) port.
//!
//! The LMS holds the course seats; matriculating an enrollment enrols the person in
//! the course there, and deleting an enrollment unenrols them.

mod http;
mod in_memory;

use thiserror::Error;

use campus_core::CourseId;
use campus_enrollment::{Course, Person};

pub use http::HttpLmsClient;
pub use in_memory::InMemoryLms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LmsOutcome {
    /// The LMS changed state.
    Applied,
    /// Enrol found the person already enrolled.
    AlreadyEnrolled,
    /// Unenrol found nothing to remove.
    NotEnrolled,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LmsError {
    #[error("course {0} has no LMS course mapping")]
    MissingCourseMapping(CourseId),

    #[error("no LMS user with username '{0}'")]
    UnknownUser(String),

    #[error("LMS rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected LMS response: {0}")]
    Decode(String),
}

/// Remote course id for `course`, or the mapping error.
pub fn remote_course_id(course: &Course) -> Result<i64, LmsError> {
    course
        .lms_course_id
        .ok_or(LmsError::MissingCourseMapping(course.id))
}

#[async_trait::async_trait]
pub trait LmsClient: Send + Sync {
    /// Enrol `person` as a student of `course`. "Already enrolled" is a success.
    async fn enroll(&self, person: &Person, course: &Course) -> Result<LmsOutcome, LmsError>;

    /// Remove `person` from `course`. "Not enrolled" is a success.
    async fn unenroll(&self, person: &Person, course: &Course) -> Result<LmsOutcome, LmsError>;
}
