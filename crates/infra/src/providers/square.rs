//! Square Payments adapter

use async_trait::async_trait;
use ledgerlink_core::ProviderAdapter;
use ledgerlink_domain::{
    FetchPage, FetchWindow, LedgerLinkError, Provider, Result, SquarePayment, SyncCursor,
};
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use super::credentials::ProviderCredentials;
use super::paging::{self, Observed};
use super::rate_limit::RateLimitTracker;
use super::signatures;
use crate::http::HttpClient;

const SQUARE_API_BASE: &str = "https://connect.squareup.com";
const SQUARE_API_VERSION: &str = "2024-01-18";

/// Header carrying the webhook signature
pub const SQUARE_SIGNATURE_HEADER: &str = "x-square-hmacsha256-signature";

#[derive(Debug, Deserialize)]
struct ListPaymentsResponse {
    #[serde(default)]
    payments: Vec<SquarePayment>,
    #[serde(default)]
    cursor: Option<String>,
}

pub struct SquareAdapter {
    http: HttpClient,
    base_url: String,
    business_id: String,
    access_token: String,
    signing_key: String,
    /// Square signs the notification URL together with the body
    notification_url: String,
    rate_limit: RateLimitTracker,
}

impl SquareAdapter {
    pub fn new(
        http: HttpClient,
        business_id: impl Into<String>,
        credentials: &ProviderCredentials,
        notification_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: credentials
                .api_base_url
                .clone()
                .unwrap_or_else(|| SQUARE_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            business_id: business_id.into(),
            access_token: credentials.access_token.clone(),
            signing_key: credentials.webhook_signing_key.clone(),
            notification_url: notification_url.into(),
            rate_limit: RateLimitTracker::new(),
        }
    }

    async fn list_payments(&self, query: &[(&str, String)]) -> Result<ListPaymentsResponse> {
        let request = self
            .http
            .request(Method::GET, format!("{}/v2/payments", self.base_url))
            .bearer_auth(&self.access_token)
            .header("Square-Version", SQUARE_API_VERSION)
            .query(query);

        match self.http.send_json::<ListPaymentsResponse>(request).await {
            Ok(response) => {
                self.rate_limit.observe_success();
                Ok(response.body)
            }
            Err(err) => {
                if matches!(err, LedgerLinkError::RateLimited { .. }) {
                    self.rate_limit.observe_throttled();
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for SquareAdapter {
    fn provider(&self) -> Provider {
        Provider::Square
    }

    async fn fetch_transactions(
        &self,
        cursor: Option<&SyncCursor>,
        window: &FetchWindow,
    ) -> Result<FetchPage> {
        let mut query = vec![
            ("sort_order", "ASC".to_string()),
            ("limit", paging::page_limit(window).to_string()),
        ];
        // A cursor continues the query that issued it; a fresh time range would not match
        if let Some(token) = paging::resume_token(cursor) {
            query.push(("cursor", token.to_string()));
        } else {
            if let Some(begin) = paging::resume_from(cursor, window) {
                query.push(("begin_time", paging::format_timestamp(begin)));
            }
            if let Some(end) = window.end {
                query.push(("end_time", paging::format_timestamp(end)));
            }
        }

        let response = self.list_payments(&query).await?;
        debug!(
            business_id = %self.business_id,
            payments = response.payments.len(),
            has_cursor = response.cursor.is_some(),
            "fetched Square payments"
        );

        let observed = response
            .payments
            .iter()
            .map(|payment| {
                if payment.is_completed() {
                    payment.to_transaction(&self.business_id).map(Observed::settled)
                } else {
                    Ok(Observed::skipped(payment.created_at))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(paging::assemble_page(observed, cursor, window, response.cursor))
    }

    fn verify_webhook(&self, raw_payload: &[u8], signature: Option<&str>) -> bool {
        signature.is_some_and(|signature| {
            signatures::verify_base64(
                self.signing_key.as_bytes(),
                &[self.notification_url.as_bytes(), raw_payload],
                signature,
            )
        })
    }

    fn rate_limit_headroom(&self) -> Option<f64> {
        self.rate_limit.headroom()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const NOTIFICATION_URL: &str = "https://ledgerlink.test/webhooks/square/abc";

    fn adapter(server: &MockServer) -> SquareAdapter {
        let credentials = ProviderCredentials {
            access_token: "sq-token".to_string(),
            webhook_signing_key: "sq-key".to_string(),
            api_base_url: Some(server.uri()),
            shop_domain: None,
        };
        SquareAdapter::new(HttpClient::new().expect("client"), "biz-1", &credentials, NOTIFICATION_URL)
    }

    fn payment(id: &str, status: &str, created_at: &str) -> serde_json::Value {
        json!({
            "id": id,
            "status": status,
            "amount_money": {"amount": 1500, "currency": "USD"},
            "created_at": created_at,
            "location_id": "L1"
        })
    }

    fn ts(raw: &str) -> DateTime<Utc> {
        raw.parse().expect("timestamp")
    }

    #[tokio::test]
    async fn pages_completed_payments_and_carries_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/payments"))
            .and(header("authorization", "Bearer sq-token"))
            .and(query_param("sort_order", "ASC"))
            .and(query_param("begin_time", "2024-03-01T00:00:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payments": [
                    payment("p-1", "COMPLETED", "2024-03-01T10:00:00Z"),
                    payment("p-2", "APPROVED", "2024-03-01T11:00:00Z"),
                ],
                "cursor": "page-2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter(&server);
        let cursor = SyncCursor::new(ts("2024-03-01T00:00:00Z"));
        let page = adapter
            .fetch_transactions(Some(&cursor), &FetchWindow::open(50))
            .await
            .expect("page");

        assert_eq!(page.transactions.len(), 1);
        assert_eq!(page.transactions[0].provider_txn_id, "p-1");
        assert_eq!(page.transactions[0].amount_minor, 1500);
        assert!(page.has_more);
        let next = page.next_cursor.expect("cursor");
        assert_eq!(next.watermark, ts("2024-03-01T11:00:00Z"));
        assert_eq!(next.token.as_deref(), Some("page-2"));
        assert_eq!(adapter.rate_limit_headroom(), Some(1.0));
    }

    #[tokio::test]
    async fn resumes_with_provider_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/payments"))
            .and(query_param("cursor", "page-2"))
            .and(query_param("sort_order", "ASC"))
            .and(query_param_is_missing("begin_time"))
            .and(query_param_is_missing("end_time"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"payments": []})))
            .expect(1)
            .mount(&server)
            .await;

        let cursor = SyncCursor::new(ts("2024-03-01T11:00:00Z")).with_token("page-2");
        let window = FetchWindow::between(ts("2024-03-01T00:00:00Z"), ts("2024-03-02T00:00:00Z"), 50);
        let page = adapter(&server).fetch_transactions(Some(&cursor), &window).await.expect("page");
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, Some(SyncCursor::new(ts("2024-03-01T11:00:00Z"))));
    }

    #[tokio::test]
    async fn throttling_and_auth_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("UNAUTHORIZED"))
            .mount(&server)
            .await;

        let adapter = adapter(&server);
        assert_eq!(adapter.rate_limit_headroom(), None);

        let err = adapter.fetch_transactions(None, &FetchWindow::open(10)).await.expect_err("429");
        assert!(matches!(err, LedgerLinkError::RateLimited { retry_after_secs: Some(3), .. }));
        assert_eq!(adapter.rate_limit_headroom(), Some(0.0));

        let err = adapter.fetch_transactions(None, &FetchWindow::open(10)).await.expect_err("401");
        assert!(matches!(err, LedgerLinkError::Authentication(_)));
    }

    #[test]
    fn signature_covers_notification_url_and_body() {
        let credentials = ProviderCredentials {
            access_token: "t".to_string(),
            webhook_signing_key: "sq-key".to_string(),
            api_base_url: None,
            shop_domain: None,
        };
        let adapter =
            SquareAdapter::new(HttpClient::new().expect("client"), "biz-1", &credentials, NOTIFICATION_URL);
        let body = br#"{"event_id":"evt-1"}"#;

        let good = signatures::sign_base64(b"sq-key", &[NOTIFICATION_URL.as_bytes(), body]);
        assert!(adapter.verify_webhook(body, Some(&good)));

        let body_only = signatures::sign_base64(b"sq-key", &[body]);
        assert!(!adapter.verify_webhook(body, Some(&body_only)));
        assert!(!adapter.verify_webhook(body, None));
    }
}
