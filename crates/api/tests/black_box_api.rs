use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{Value, json};

use campus_api::app::services::{InMemoryBackends, build_in_memory_services};
use campus_core::{BillingId, CourseId, EnrollmentId, InvoiceId, PersonId, ReceiptId};
use campus_enrollment::{BillingRecord, ContactAddress, Course, Invoice, Money, Person, Receipt};
use campus_infra::config::Settings;

struct TestServer {
    base_url: String,
    backends: InMemoryBackends,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory adapters, ephemeral port.
        let settings = Settings::from_lookup(|_| None).expect("default settings");
        let (services, backends) = build_in_memory_services(&settings);
        seed(&backends).await;

        let app = campus_api::app::router(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            backends,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn verify_payment(&self, enrollment_id: i64) {
        self.backends
            .invoices
            .add(Invoice {
                id: InvoiceId::new(enrollment_id + 100),
                enrollment_id: EnrollmentId::new(enrollment_id),
                payment_verified: true,
                amount_paid: Money(40_000),
            })
            .await;
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn seed(backends: &InMemoryBackends) {
    let refs = &backends.references;
    refs.courses
        .insert(Course {
            id: CourseId::new(1),
            name: "Data Engineering".to_string(),
            lms_course_id: Some(310),
        })
        .await;
    for (id, doc) in [(1, "1712345678"), (2, "1798765432")] {
        refs.people
            .insert(Person {
                id: PersonId::new(id),
                first_names: format!("Student {id}"),
                last_names: "Example".to_string(),
                document_number: doc.to_string(),
                email: Some(ContactAddress::new(format!("student{id}@example.org")).unwrap()),
            })
            .await;
    }
    refs.billing
        .insert(BillingRecord {
            id: BillingId::new(1),
            holder_name: "Student 1 Example".to_string(),
            tax_id: "1712345678001".to_string(),
        })
        .await;
    for id in 1..=3 {
        refs.receipts
            .insert(Receipt {
                id: ReceiptId::new(id),
                storage_key: format!("receipts/{id}.png"),
            })
            .await;
    }
}

async fn create(
    client: &reqwest::Client,
    srv: &TestServer,
    person_id: i64,
    receipt_id: i64,
) -> reqwest::Response {
    client
        .post(srv.url("/enrollments"))
        .json(&json!({
            "course_id": 1,
            "person_id": person_id,
            "billing_id": 1,
            "receipt_id": receipt_id,
        }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_is_public_and_echoes_request_id() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(srv.url("/health"))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("req-42")
    );

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert!(res.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn enrollment_lifecycle_over_http() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // Create
    let res = create(&client, &srv, 1, 1).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    assert_eq!(created["matriculated"], false);
    assert_eq!(created["version"], 1);
    let id = created["id"].as_i64().unwrap();

    // Get resolves references
    let res = client
        .get(srv.url(&format!("/enrollments/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let details: Value = res.json().await.unwrap();
    assert_eq!(details["course"]["name"], "Data Engineering");
    assert_eq!(details["enrollment"]["receipt_id"], 1);

    // Matriculation is gated on payment
    let res = client
        .patch(srv.url(&format!("/enrollments/{id}")))
        .json(&json!({ "matriculated": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");

    srv.verify_payment(id).await;
    let res = client
        .patch(srv.url(&format!("/enrollments/{id}")))
        .json(&json!({ "matriculated": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let updated: Value = res.json().await.unwrap();
    assert_eq!(updated["matriculated"], true);
    assert!(srv.backends.lms.is_enrolled("1712345678", 310));

    // Delete unenrolls, then the record is gone
    let res = client
        .delete(srv.url(&format!("/enrollments/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert!(!srv.backends.lms.is_enrolled("1712345678", 310));

    let res = client
        .get(srv.url(&format!("/enrollments/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["message"], format!("enrollment {id} not found"));
}

#[tokio::test]
async fn create_maps_rule_violations_to_status_codes() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/enrollments"))
        .json(&json!({ "course_id": 99, "person_id": 1, "billing_id": 1, "receipt_id": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "course 99 not found");

    assert_eq!(create(&client, &srv, 1, 1).await.status(), StatusCode::CREATED);

    // Same (course, person)
    let res = create(&client, &srv, 1, 2).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    // Receipt already used
    let res = create(&client, &srv, 2, 1).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "receipt already assigned to enrollment 1");

    // Malformed body
    let res = client
        .post(srv.url("/enrollments"))
        .json(&json!({ "course_id": "one" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn list_pages_and_validates_parameters() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    create(&client, &srv, 1, 1).await;
    create(&client, &srv, 2, 2).await;

    let res = client
        .get(srv.url("/enrollments?page=1&limit=1&order_by=person_id&order=desc"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let page: Value = res.json().await.unwrap();
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["items"][0]["enrollment"]["person_id"], 2);

    let res = client
        .get(srv.url("/enrollments?order=sideways"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn malformed_id_is_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(srv.url("/enrollments/abc"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");
}
