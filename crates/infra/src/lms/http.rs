//! LMS client for a web-service style REST endpoint.
//!
//! Every call is a form POST to `{base}/webservice/rest/server.php` naming the remote
//! function in `wsfunction`. Remote failures come back as HTTP 200 with an
//! `{"exception", "errorcode", "message"}` object.

use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use campus_enrollment::{Course, Person};

use super::{LmsClient, LmsError, LmsOutcome, remote_course_id};
use crate::config::LmsSettings;

const FN_FIND_USERS: &str = "core_user_get_users_by_field";
const FN_ENROL: &str = "enrol_manual_enrol_users";
const FN_UNENROL: &str = "enrol_manual_unenrol_users";

#[derive(Debug, Clone)]
pub struct HttpLmsClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    student_role_id: i64,
}

impl HttpLmsClient {
    pub fn new(settings: &LmsSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    pub fn with_client(client: reqwest::Client, settings: &LmsSettings) -> Self {
        Self {
            client,
            endpoint: format!(
                "{}/webservice/rest/server.php",
                settings.base_url.trim_end_matches('/')
            ),
            token: settings.token.clone(),
            student_role_id: settings.student_role_id,
        }
    }

    async fn call(
        &self,
        function: &'static str,
        params: Vec<(String, String)>,
    ) -> Result<JsonValue, LmsError> {
        let mut form = vec![
            ("wstoken".to_string(), self.token.clone()),
            ("wsfunction".to_string(), function.to_string()),
            ("moodlewsrestformat".to_string(), "json".to_string()),
        ];
        form.extend(params);

        let resp = self
            .client
            .post(&self.endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| LmsError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| LmsError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(LmsError::Rejected {
                code: status.as_u16().to_string(),
                message: body,
            });
        }

        debug!(function, "lms call completed");
        interpret_response(&body)
    }

    async fn resolve_user_id(&self, person: &Person) -> Result<i64, LmsError> {
        let username = person.lms_username();
        let users = self
            .call(
                FN_FIND_USERS,
                vec![
                    ("field".to_string(), "username".to_string()),
                    ("values[0]".to_string(), username.clone()),
                ],
            )
            .await?;

        users
            .as_array()
            .and_then(|users| users.first())
            .and_then(|user| user.get("id"))
            .and_then(JsonValue::as_i64)
            .ok_or(LmsError::UnknownUser(username))
    }
}

/// Turn a response body into a value or the remote error it encodes.
fn interpret_response(body: &str) -> Result<JsonValue, LmsError> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(JsonValue::Null);
    }

    let value: JsonValue =
        serde_json::from_str(trimmed).map_err(|e| LmsError::Decode(e.to_string()))?;

    if value.get("exception").is_some() || value.get("errorcode").is_some() {
        let field = |name: &str| {
            value
                .get(name)
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let code = field("errorcode");
        return Err(LmsError::Rejected {
            code: if code.is_empty() { "unknown".to_string() } else { code },
            message: field("message"),
        });
    }

    Ok(value)
}

fn mentions(code: &str, message: &str, compact: &str, spaced: &str) -> bool {
    code.to_lowercase().contains(compact) || message.to_lowercase().contains(spaced)
}

#[async_trait::async_trait]
impl LmsClient for HttpLmsClient {
    #[instrument(skip(self, person, course), fields(course_id = %course.id, person_id = %person.id), err)]
    async fn enroll(&self, person: &Person, course: &Course) -> Result<LmsOutcome, LmsError> {
        let remote_course = remote_course_id(course)?;
        let user_id = self.resolve_user_id(person).await?;

        let result = self
            .call(
                FN_ENROL,
                vec![
                    ("enrolments[0][roleid]".to_string(), self.student_role_id.to_string()),
                    ("enrolments[0][userid]".to_string(), user_id.to_string()),
                    ("enrolments[0][courseid]".to_string(), remote_course.to_string()),
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(LmsOutcome::Applied),
            Err(LmsError::Rejected { code, message })
                if mentions(&code, &message, "alreadyenrolled", "already enrolled") =>
            {
                Ok(LmsOutcome::AlreadyEnrolled)
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, person, course), fields(course_id = %course.id, person_id = %person.id), err)]
    async fn unenroll(&self, person: &Person, course: &Course) -> Result<LmsOutcome, LmsError> {
        let remote_course = remote_course_id(course)?;
        let user_id = match self.resolve_user_id(person).await {
            Ok(id) => id,
            // No account means no seat to remove.
            Err(LmsError::UnknownUser(_)) => return Ok(LmsOutcome::NotEnrolled),
            Err(err) => return Err(err),
        };

        let result = self
            .call(
                FN_UNENROL,
                vec![
                    ("enrolments[0][userid]".to_string(), user_id.to_string()),
                    ("enrolments[0][courseid]".to_string(), remote_course.to_string()),
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(LmsOutcome::Applied),
            Err(LmsError::Rejected { code, message })
                if mentions(&code, &message, "notenrolled", "not enrolled") =>
            {
                Ok(LmsOutcome::NotEnrolled)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_core::{CourseId, PersonId};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    #[test]
    fn null_and_empty_bodies_are_success() {
        assert_eq!(interpret_response("null").unwrap(), JsonValue::Null);
        assert_eq!(interpret_response("  ").unwrap(), JsonValue::Null);
    }

    #[test]
    fn exception_objects_become_rejections() {
        let err = interpret_response(
            r#"{"exception":"moodle_exception","errorcode":"invalidtoken","message":"Invalid token"}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            LmsError::Rejected {
                code: "invalidtoken".to_string(),
                message: "Invalid token".to_string(),
            }
        );
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            interpret_response("<html>"),
            Err(LmsError::Decode(_))
        ));
    }

    #[test]
    fn already_enrolled_is_recognised_by_code_or_message() {
        assert!(mentions("alreadyEnrolled", "", "alreadyenrolled", "already enrolled"));
        assert!(mentions("x", "User is already enrolled", "alreadyenrolled", "already enrolled"));
        assert!(!mentions("invalidtoken", "bad token", "alreadyenrolled", "already enrolled"));
    }

    /// Serves one canned JSON body per connection, in order, and hands back
    /// the form bodies it received.
    async fn stub_lms(replies: Vec<&'static str>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for reply in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                seen.push(read_form_body(&mut socket).await);
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    reply.len(),
                    reply
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
            seen
        });

        (base_url, handle)
    }

    async fn read_form_body(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed before sending a full request");
            buf.extend_from_slice(&chunk[..n]);

            let Some(split) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..split]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let body = &buf[split + 4..];
            if body.len() >= length {
                return String::from_utf8_lossy(&body[..length]).into_owned();
            }
        }
    }

    fn client_for(base_url: String) -> HttpLmsClient {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        HttpLmsClient::with_client(
            http,
            &LmsSettings {
                base_url,
                token: "secret".to_string(),
                student_role_id: 5,
            },
        )
    }

    fn mapped_course() -> Course {
        Course {
            id: CourseId::new(1),
            name: "Data Engineering".to_string(),
            lms_course_id: Some(310),
        }
    }

    fn ana() -> Person {
        Person {
            id: PersonId::new(1),
            first_names: "Ana".to_string(),
            last_names: "Pérez".to_string(),
            document_number: "0102".to_string(),
            email: None,
        }
    }

    const USER_FOUND: &str = r#"[{"id":42,"username":"0102"}]"#;

    #[tokio::test]
    async fn enroll_resolves_the_user_then_enrols_them() {
        let (base_url, server) = stub_lms(vec![USER_FOUND, "null"]).await;
        let client = client_for(base_url);

        let outcome = client.enroll(&ana(), &mapped_course()).await.unwrap();
        assert_eq!(outcome, LmsOutcome::Applied);

        let seen = server.await.unwrap();
        assert!(seen[0].contains("wsfunction=core_user_get_users_by_field"));
        assert!(seen[0].contains("wstoken=secret"));
        assert!(seen[1].contains("wsfunction=enrol_manual_enrol_users"));
        assert!(seen[1].contains("=42"));
        assert!(seen[1].contains("=310"));
    }

    #[tokio::test]
    async fn enroll_reports_an_existing_seat_as_already_enrolled() {
        let (base_url, server) = stub_lms(vec![
            USER_FOUND,
            r#"{"exception":"moodle_exception","errorcode":"alreadyenrolled","message":"User is already enrolled"}"#,
        ])
        .await;
        let client = client_for(base_url);

        let outcome = client.enroll(&ana(), &mapped_course()).await.unwrap();
        assert_eq!(outcome, LmsOutcome::AlreadyEnrolled);
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn enroll_surfaces_other_remote_errors() {
        let (base_url, server) = stub_lms(vec![
            USER_FOUND,
            r#"{"exception":"moodle_exception","errorcode":"invalidtoken","message":"Invalid token"}"#,
        ])
        .await;
        let client = client_for(base_url);

        let err = client.enroll(&ana(), &mapped_course()).await.unwrap_err();
        assert_eq!(
            err,
            LmsError::Rejected {
                code: "invalidtoken".to_string(),
                message: "Invalid token".to_string(),
            }
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn enroll_of_unknown_user_fails() {
        let (base_url, server) = stub_lms(vec!["[]"]).await;
        let client = client_for(base_url);

        let err = client.enroll(&ana(), &mapped_course()).await.unwrap_err();
        assert_eq!(err, LmsError::UnknownUser("0102".to_string()));
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unenroll_of_unknown_user_is_not_enrolled() {
        let (base_url, server) = stub_lms(vec!["[]"]).await;
        let client = client_for(base_url);

        let outcome = client.unenroll(&ana(), &mapped_course()).await.unwrap();
        assert_eq!(outcome, LmsOutcome::NotEnrolled);
        // No unenrol call follows a failed lookup.
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unenroll_maps_not_enrolled_rejection() {
        let (base_url, server) = stub_lms(vec![
            USER_FOUND,
            r#"{"exception":"moodle_exception","errorcode":"notenrolled","message":"User is not enrolled"}"#,
        ])
        .await;
        let client = client_for(base_url);

        let outcome = client.unenroll(&ana(), &mapped_course()).await.unwrap();
        assert_eq!(outcome, LmsOutcome::NotEnrolled);
        let seen = server.await.unwrap();
        assert!(seen[1].contains("wsfunction=enrol_manual_unenrol_users"));
    }

    #[tokio::test]
    async fn missing_course_mapping_fails_before_any_request() {
        let client = HttpLmsClient::new(&LmsSettings {
            // Unroutable: the test would fail with a network error if a call were made.
            base_url: "http://127.0.0.1:9".to_string(),
            token: "t".to_string(),
            student_role_id: 5,
        });
        let course = Course {
            id: CourseId::new(3),
            name: "Unmapped".to_string(),
            lms_course_id: None,
        };
        let person = Person {
            id: PersonId::new(1),
            first_names: "Ana".to_string(),
            last_names: "Pérez".to_string(),
            document_number: "0102".to_string(),
            email: None,
        };

        let err = client.enroll(&person, &course).await.unwrap_err();
        assert_eq!(err, LmsError::MissingCourseMapping(CourseId::new(3)));
    }
}
