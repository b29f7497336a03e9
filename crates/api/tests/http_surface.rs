//! HTTP surface tests over SQLite with a mocked Square API

mod support;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{SecondsFormat, Utc};
use ledgerlink_infra::signatures;
use serde_json::{json, Value};
use support::{body_json, body_text, get, json_request, TestApp, SIGNING_KEY};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn square_event(event_id: &str, payment_id: &str, amount: i64) -> Vec<u8> {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    serde_json::to_vec(&json!({
        "merchant_id": "M1",
        "type": "payment.updated",
        "event_id": event_id,
        "created_at": now,
        "data": {
            "type": "payment",
            "id": payment_id,
            "object": {"payment": {
                "id": payment_id,
                "status": "COMPLETED",
                "amount_money": {"amount": amount, "currency": "USD"},
                "created_at": now,
            }}
        }
    }))
    .expect("event body")
}

fn webhook_request(app: &TestApp, body: &[u8], signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/webhooks/square/{}", app.integration_id))
        .header("x-square-hmacsha256-signature", signature)
        .body(Body::from(body.to_vec()))
        .expect("request should build")
}

fn sign(app: &TestApp, body: &[u8]) -> String {
    signatures::sign_base64(SIGNING_KEY.as_bytes(), &[app.notification_url().as_bytes(), body])
}

async fn register(app: &TestApp, amount_minor: i64) -> Value {
    let response = app
        .send(json_request(
            "POST",
            "/transactions",
            &json!({
                "integration_id": app.integration_id,
                "amount_minor": amount_minor,
                "currency": "usd",
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

#[tokio::test]
async fn livez_and_metrics_respond() {
    let server = MockServer::start().await;
    let app = TestApp::new(&server.uri()).await;

    let response = app.send(get("/livez")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["database"], true);
    assert_eq!(body["scheduler_running"], false);

    let response = app.send(get("/metrics")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
        .expect("content type");
    assert!(content_type.starts_with("text/plain"));
    let _ = body_text(response).await;
}

#[tokio::test]
async fn webhook_statuses_follow_the_delivery_outcome() {
    let server = MockServer::start().await;
    let app = TestApp::new(&server.uri()).await;
    register(&app, 4_200).await;

    let body = square_event("evt-1", "pay-1", 4_200);
    let signature = sign(&app, &body);

    let accepted = app.send(webhook_request(&app, &body, &signature)).await;
    assert_eq!(accepted.status(), StatusCode::OK);
    let receipt = body_json(accepted).await;
    assert_eq!(receipt["outcome"], "accepted");
    assert_eq!(receipt["transactions"], 1);

    let duplicate = app.send(webhook_request(&app, &body, &signature)).await;
    assert_eq!(duplicate.status(), StatusCode::OK);
    assert_eq!(body_json(duplicate).await["outcome"], "duplicate");

    let forged = app.send(webhook_request(&app, &body, "Zm9yZ2Vk")).await;
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(forged).await["reject_reason"], "invalid_signature");

    let garbage = br#"{"not":"a square event"}"#;
    let malformed = app.send(webhook_request(&app, garbage, &sign(&app, garbage))).await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(malformed).await["reject_reason"], "malformed");

    let alerts = app.send(get("/alerts?open_only=true")).await;
    assert_eq!(alerts.status(), StatusCode::OK);
    let alerts = body_json(alerts).await;
    let kinds: Vec<&str> = alerts
        .as_array()
        .expect("alert list")
        .iter()
        .filter_map(|alert| alert["kind"].as_str())
        .collect();
    assert!(kinds.contains(&"webhook_signature"));

    let health = app.send(get(&format!("/health/integrations/{}", app.integration_id))).await;
    assert_eq!(health.status(), StatusCode::OK);
    let health = body_json(health).await;
    assert_eq!(health["webhooks"]["total"], 4);
    assert_eq!(health["pending_count"], 0);
}

#[tokio::test]
async fn unknown_routes_targets_are_not_found() {
    let server = MockServer::start().await;
    let app = TestApp::new(&server.uri()).await;
    let body = square_event("evt-2", "pay-2", 100);

    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri(format!("/webhooks/paypal/{}", app.integration_id))
                .body(Body::from(body.clone()))
                .expect("request should build"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["type"], "not_found");

    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri(format!("/webhooks/square/{}", Uuid::now_v7()))
                .body(Body::from(body))
                .expect("request should build"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.send(get(&format!("/health/integrations/{}", Uuid::now_v7()))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn override_is_audited_and_validated() {
    let server = MockServer::start().await;
    let app = TestApp::new(&server.uri()).await;
    let record = register(&app, 15_000).await;
    let record_id = record["id"].as_str().expect("record id");
    assert_eq!(record["currency"], "USD");

    let rejected = app
        .send(json_request(
            "POST",
            &format!("/transactions/{record_id}/override"),
            &json!({"actor": "ops@example.com", "amount_minor": 15_000, "reason": "  "}),
        ))
        .await;
    assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let error = body_json(rejected).await;
    assert_eq!(error["type"], "validation");
    assert_eq!(error["retryable"], false);

    let overridden = app
        .send(json_request(
            "POST",
            &format!("/transactions/{record_id}/override"),
            &json!({
                "actor": "ops@example.com",
                "amount_minor": 15_000,
                "reason": "customer provided receipt"
            }),
        ))
        .await;
    assert_eq!(overridden.status(), StatusCode::OK);
    let overridden = body_json(overridden).await;
    assert_eq!(overridden["state"], "overridden");
    assert_eq!(overridden["override_amount_minor"], 15_000);

    let entries = app.send(get(&format!("/overrides?integration_id={}", app.integration_id))).await;
    assert_eq!(entries.status(), StatusCode::OK);
    let entries = body_json(entries).await;
    let entries = entries.as_array().expect("override list");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "manual_verification");
    assert_eq!(entries[0]["reason"], "customer provided receipt");
}

#[tokio::test]
async fn reconfigure_and_malformed_bodies() {
    let server = MockServer::start().await;
    let app = TestApp::new(&server.uri()).await;

    let response = app
        .send(json_request(
            "PATCH",
            &format!("/integrations/{}", app.integration_id),
            &json!({"actor": "ops@example.com", "reason": "quiet hours", "sync_interval_secs": 900}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let integration = body_json(response).await;
    assert_eq!(integration["sync_interval_secs"], 900);
    assert_eq!(integration["status"], "active");

    let entries = body_json(app.send(get("/overrides?business_id=biz-1")).await).await;
    assert_eq!(entries[0]["action"], "reconfiguration");

    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/transactions")
                .header("content-type", "application/json")
                .body(Body::from("{ not json"))
                .expect("request should build"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["type"], "bad_request");
}

#[tokio::test]
async fn forced_sync_is_accepted_then_reported_in_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"payments": []})))
        .mount(&server)
        .await;
    let app = TestApp::new(&server.uri()).await;

    let response = app
        .send(json_request(
            "POST",
            &format!("/integrations/{}/sync", app.integration_id),
            &json!({"actor": "ops@example.com", "mode": {"type": "full"}, "reason": "backfill"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let handle = body_json(response).await;
    assert_eq!(handle["integration_id"], app.integration_id.to_string());
    assert_eq!(handle["priority"], "normal");
    let operation_id = handle["operation_id"].as_str().expect("operation id").to_string();

    let mut last_run = Value::Null;
    for _ in 0..100 {
        let health = body_json(app.send(get(&format!("/health/integrations/{}", app.integration_id))).await).await;
        if health["last_sync_run"]["operation_id"] == operation_id {
            last_run = health["last_sync_run"].clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(last_run["outcome"], "completed");
    assert_eq!(last_run["trigger"], "manual");

    let entries = body_json(app.send(get("/overrides")).await).await;
    assert_eq!(entries[0]["action"], "forced_sync");

    let missing = app
        .send(json_request(
            "POST",
            &format!("/integrations/{}/sync", Uuid::now_v7()),
            &json!({"actor": "ops@example.com"}),
        ))
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}
