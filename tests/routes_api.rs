#![cfg(feature = "inmem-store")]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use actix_web::{test, web, App};
use async_trait::async_trait;
use claimdesk::notify::{MailTransport, OutgoingMail, ReportMailer, TransportError};
use claimdesk::render::ReportRenderer;
use claimdesk::repo::inmem::InMemRepo;
use claimdesk::routes::{config, AppState};
use claimdesk::storage::{normalize_object_path, ObjectStore, StorageError};
use serde_json::{json, Value};

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R'];

/// Object store double holding a fixed set of objects.
struct MockObjectStore {
    objects: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn upload_url(&self) -> Result<String, StorageError> {
        Ok("http://minio:9000/claim-photos/uploads/new-object?X-Amz-Signature=sig".into())
    }

    fn normalize_path(&self, raw: &str) -> String {
        normalize_object_path(raw, "claim-photos", "uploads")
    }

    async fn load(&self, object_path: &str) -> Result<(Vec<u8>, String), StorageError> {
        self.objects
            .get(object_path)
            .map(|b| (b.clone(), "image/png".to_string()))
            .ok_or(StorageError::NotFound)
    }
}

/// Records every mail instead of delivering it.
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<OutgoingMail>>,
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

struct FailingTransport;

#[async_trait]
impl MailTransport for FailingTransport {
    async fn send(&self, _mail: &OutgoingMail) -> Result<(), TransportError> {
        Err(TransportError::Permanent("550 mailbox unavailable".into()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

fn state_with(transport: Arc<dyn MailTransport>) -> web::Data<AppState> {
    let renderer = ReportRenderer::new(Some("https://claims.example.com".into()));
    let mut objects = HashMap::new();
    objects.insert("/objects/0b1e".to_string(), PNG.to_vec());
    web::Data::new(AppState {
        repo: Arc::new(InMemRepo::new()),
        object_store: Arc::new(MockObjectStore { objects }),
        mailer: ReportMailer::new(transport, renderer.clone(), "claims@example.com"),
        renderer,
    })
}

fn report_body(photos: usize) -> Value {
    let photo_urls: Vec<String> = (0..photos).map(|i| format!("/objects/photo-{i}")).collect();
    json!({
        "licensePlate": "ABC-1234",
        "vin": "",
        "make": "Toyota",
        "model": "Corolla",
        "year": "2019",
        "color": "Silver",
        "incidentDate": "2024-03-14",
        "incidentTime": "17:45",
        "location": "Main St & 5th Ave",
        "description": "Rear bumper dented while parked outside the office.",
        "reporterName": "Jordan Blake",
        "reporterPhone": "+1 555 0100",
        "reporterEmail": "jordan@example.com",
        "photoUrls": photo_urls
    })
}

fn is_reference(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    parts.len() == 3
        && parts[0] == "VCR"
        && parts[1].len() == 4
        && parts[2].len() == 6
        && parts[1..].iter().all(|p| p.chars().all(|c| c.is_ascii_digit()))
}

#[actix_web::test]
async fn submit_fetch_review_flow() {
    let app = test::init_service(App::new().app_data(state_with(Arc::new(RecordingTransport::default()))).configure(config)).await;

    // empty list
    let req = test::TestRequest::get().uri("/api/reports").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(v.as_array().unwrap().len(), 0);

    // submit
    let req = test::TestRequest::post().uri("/api/reports").set_json(report_body(2)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: Value = test::read_body_json(resp).await;
    let id = created["id"].as_str().unwrap().to_string();
    let reference = created["referenceNumber"].as_str().unwrap().to_string();
    assert!(is_reference(&reference), "unexpected reference {reference}");
    assert_eq!(created["status"], "submitted");
    assert_eq!(created["photoUrls"].as_array().unwrap().len(), 2);
    // blank optional field is stored as absent
    assert!(created["vin"].is_null());

    // get by id
    let req = test::TestRequest::get().uri(&format!("/api/reports/{id}")).to_request();
    let fetched: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(fetched, created);

    // get by reference
    let req = test::TestRequest::get().uri(&format!("/api/reports/reference/{reference}")).to_request();
    let by_ref: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(by_ref["id"], created["id"]);

    // approve
    let req = test::TestRequest::patch()
        .uri(&format!("/api/reports/{id}/status"))
        .set_json(json!({"status": "approved"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let updated: Value = test::read_body_json(resp).await;
    assert_eq!(updated["status"], "approved");
    assert_eq!(updated["referenceNumber"], created["referenceNumber"]);

    let req = test::TestRequest::get().uri(&format!("/api/reports/{id}")).to_request();
    let fetched: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(fetched["status"], "approved");

    // search and status filter
    let req = test::TestRequest::get().uri("/api/reports?search=COROLLA").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(v.as_array().unwrap().len(), 1);
    let req = test::TestRequest::get().uri("/api/reports?search=tesla").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert!(v.as_array().unwrap().is_empty());
    let req = test::TestRequest::get().uri("/api/reports?status=rejected").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert!(v.as_array().unwrap().is_empty());

    // stats
    let req = test::TestRequest::post().uri("/api/reports").set_json(report_body(1)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);
    let req = test::TestRequest::get().uri("/api/reports/stats").to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["byStatus"]["approved"], 1);
    assert_eq!(stats["byStatus"]["submitted"], 1);
}

#[actix_web::test]
async fn submit_rejects_bad_photo_counts() {
    let app = test::init_service(App::new().app_data(state_with(Arc::new(RecordingTransport::default()))).configure(config)).await;

    for count in [0, 11] {
        let req = test::TestRequest::post().uri("/api/reports").set_json(report_body(count)).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400, "{count} photos");
        let body: Value = test::read_body_json(resp).await;
        assert!(body["details"]["photoUrls"].is_array(), "{body}");
    }

    // nothing stored
    let req = test::TestRequest::get().uri("/api/reports").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert!(v.as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn submit_rejects_invalid_fields_and_bodies() {
    let app = test::init_service(App::new().app_data(state_with(Arc::new(RecordingTransport::default()))).configure(config)).await;

    let mut body = report_body(1);
    body["reporterEmail"] = json!("not-an-email");
    body["description"] = json!("short");
    body["year"] = json!("19");
    let req = test::TestRequest::post().uri("/api/reports").set_json(body).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Validation failed");
    for field in ["reporterEmail", "description", "year"] {
        assert!(body["details"][field].is_array(), "missing {field} in {body}");
    }

    // absent keys are reported per field, like empty ones
    let mut body = report_body(1);
    body.as_object_mut().unwrap().remove("make");
    body.as_object_mut().unwrap().remove("photoUrls");
    let req = test::TestRequest::post().uri("/api/reports").set_json(body).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Validation failed");
    assert_eq!(body["details"]["make"], json!(["Make is required"]));
    assert_eq!(body["details"]["photoUrls"], json!(["Between 1 and 10 photos are required"]));
    assert!(body["details"].get("model").is_none());

    // wrong type still fails deserialisation
    let mut body = report_body(1);
    body["photoUrls"] = json!("/objects/a");
    let req = test::TestRequest::post().uri("/api/reports").set_json(body).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    // malformed json
    let req = test::TestRequest::post()
        .uri("/api/reports")
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{ nope")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
async fn unknown_reports_are_404() {
    let app = test::init_service(App::new().app_data(state_with(Arc::new(RecordingTransport::default()))).configure(config)).await;

    for uri in ["/api/reports/nope", "/api/reports/nope/pdf", "/api/reports/nope/html", "/api/reports/reference/VCR-2024-000000"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404, "{uri}");
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Report not found");
    }

    let req = test::TestRequest::patch()
        .uri("/api/reports/nope/status")
        .set_json(json!({"status": "approved"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    // the failed update did not create anything
    let req = test::TestRequest::get().uri("/api/reports").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert!(v.as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn status_update_requires_status() {
    let app = test::init_service(App::new().app_data(state_with(Arc::new(RecordingTransport::default()))).configure(config)).await;
    let req = test::TestRequest::post().uri("/api/reports").set_json(report_body(1)).to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let id = created["id"].as_str().unwrap();

    for payload in [json!({}), json!({"status": "  "})] {
        let req = test::TestRequest::patch()
            .uri(&format!("/api/reports/{id}/status"))
            .set_json(payload)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }
}

#[actix_web::test]
async fn pdf_and_html_documents() {
    let app = test::init_service(App::new().app_data(state_with(Arc::new(RecordingTransport::default()))).configure(config)).await;
    let req = test::TestRequest::post().uri("/api/reports").set_json(report_body(1)).to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let id = created["id"].as_str().unwrap();
    let reference = created["referenceNumber"].as_str().unwrap();

    let req = test::TestRequest::get().uri(&format!("/api/reports/{id}/pdf")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "application/pdf");
    let disposition = resp.headers().get("content-disposition").unwrap().to_str().unwrap().to_string();
    assert!(disposition.contains(&format!("vehicle-damage-report-{reference}.pdf")), "{disposition}");
    let body = test::read_body(resp).await;
    assert!(body.starts_with(b"%PDF"));

    let req = test::TestRequest::get().uri(&format!("/api/reports/{id}/html")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let html = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(html.contains(reference));
    assert!(html.contains("Vehicle Information"));
}

#[actix_web::test]
async fn email_dispatch() {
    let transport = Arc::new(RecordingTransport::default());
    let app = test::init_service(App::new().app_data(state_with(transport.clone())).configure(config)).await;
    let req = test::TestRequest::post().uri("/api/reports").set_json(report_body(1)).to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let id = created["id"].as_str().unwrap();
    let reference = created["referenceNumber"].as_str().unwrap();

    // missing email
    let req = test::TestRequest::post().uri(&format!("/api/reports/{id}/email")).set_json(json!({})).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    // malformed email
    let req = test::TestRequest::post()
        .uri(&format!("/api/reports/{id}/email"))
        .set_json(json!({"email": "adjuster"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    // unknown report
    let req = test::TestRequest::post()
        .uri("/api/reports/nope/email")
        .set_json(json!({"email": "adjuster@insurer.example"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    assert!(transport.sent.lock().unwrap().is_empty());

    // with attachment (default)
    let req = test::TestRequest::post()
        .uri(&format!("/api/reports/{id}/email"))
        .set_json(json!({"email": "adjuster@insurer.example"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Report sent successfully");

    // without attachment
    let req = test::TestRequest::post()
        .uri(&format!("/api/reports/{id}/email"))
        .set_json(json!({"email": "adjuster@insurer.example", "includeAttachment": false}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].to, "adjuster@insurer.example");
    assert_eq!(sent[0].subject, format!("Vehicle Damage Report - {reference}"));
    let attachment = sent[0].attachment.as_ref().unwrap();
    assert!(attachment.bytes.starts_with(b"%PDF"));
    assert!(sent[0].html_body.contains(reference));
    assert!(sent[1].attachment.is_none());
}

#[actix_web::test]
async fn email_transport_failure_is_500() {
    let app = test::init_service(App::new().app_data(state_with(Arc::new(FailingTransport))).configure(config)).await;
    let req = test::TestRequest::post().uri("/api/reports").set_json(report_body(1)).to_request();
    let created: Value = test::call_and_read_body_json(&app, req).await;
    let id = created["id"].as_str().unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/reports/{id}/email"))
        .set_json(json!({"email": "adjuster@insurer.example"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Failed to send report via email");
}

#[actix_web::test]
async fn photo_upload_and_serving() {
    let app = test::init_service(App::new().app_data(state_with(Arc::new(RecordingTransport::default()))).configure(config)).await;

    let req = test::TestRequest::post().uri("/api/photos/upload").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    let upload_url = v["uploadURL"].as_str().unwrap().to_string();
    assert!(upload_url.starts_with("http://minio:9000/"));

    let req = test::TestRequest::post()
        .uri("/api/photos/process")
        .set_json(json!({"photoURL": upload_url}))
        .to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(v["objectPath"], "/objects/new-object");

    let req = test::TestRequest::post().uri("/api/photos/process").set_json(json!({})).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::get().uri("/objects/0b1e").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "image/png");
    assert_eq!(test::read_body(resp).await.as_ref(), PNG);

    let req = test::TestRequest::get().uri("/objects/missing").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Object not found");
}

#[actix_web::test]
async fn health_check() {
    let app = test::init_service(App::new().app_data(state_with(Arc::new(RecordingTransport::default()))).configure(config)).await;
    let req = test::TestRequest::get().uri("/health").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(v["status"], "ok");
}
