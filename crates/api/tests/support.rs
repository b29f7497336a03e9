//! Shared fixtures for HTTP tests: an `AppContext` over a temporary database
//! with one seeded Square integration.

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, Response};
use axum::Router;
use ledgerlink_api::{router, AppContext};
use ledgerlink_domain::{
    Config, DatabaseConfig, IntegrationSeed, Provider, SchedulerConfig, ServerConfig,
};
use serde_json::Value;
use tempfile::{NamedTempFile, TempDir};
use tower::ServiceExt;
use uuid::Uuid;

pub const PUBLIC_BASE_URL: &str = "https://ledgerlink.test";
pub const SIGNING_KEY: &str = "api-test-signing-key";

pub struct TestApp {
    pub ctx: Arc<AppContext>,
    pub integration_id: Uuid,
    _dir: TempDir,
    _credentials: NamedTempFile,
}

impl TestApp {
    /// Square integration whose API lives at `api_base_url`
    pub async fn new(api_base_url: &str) -> Self {
        let dir = TempDir::new().expect("temp dir should be created");
        let credentials = credential_file(api_base_url);
        let integration_id = Uuid::now_v7();

        let config = Config {
            database: DatabaseConfig {
                path: dir.path().join("ledgerlink.db").display().to_string(),
                pool_size: 4,
                ..DatabaseConfig::default()
            },
            server: ServerConfig {
                public_base_url: PUBLIC_BASE_URL.to_string(),
                ..ServerConfig::default()
            },
            scheduler: SchedulerConfig { enabled: false, ..SchedulerConfig::default() },
            integrations: vec![IntegrationSeed {
                id: Some(integration_id),
                business_id: "biz-1".to_string(),
                provider: Provider::Square,
                credential_ref: format!("file:{}", credentials.path().display()),
                sync_interval_secs: None,
                retry_policy: None,
                enabled: true,
            }],
            ..Config::default()
        };

        let ctx = Arc::new(AppContext::new(config).await.expect("context should build"));
        Self { ctx, integration_id, _dir: dir, _credentials: credentials }
    }

    pub fn router(&self) -> Router {
        router(Arc::clone(&self.ctx))
    }

    pub fn notification_url(&self) -> String {
        format!("{PUBLIC_BASE_URL}/webhooks/square/{}", self.integration_id)
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router().oneshot(request).await.expect("router should respond")
    }
}

pub fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request should build")
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body should read");
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body should read");
    String::from_utf8(bytes.to_vec()).expect("body should be UTF-8")
}

fn credential_file(api_base_url: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("credential file");
    let body = serde_json::json!({
        "access_token": "test-access-token",
        "webhook_signing_key": SIGNING_KEY,
        "api_base_url": api_base_url,
    });
    write!(file, "{body}").expect("credentials written");
    file
}
