use std::time::Duration;

use ledgerlink_domain::{LedgerLinkError, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::InfraError;

/// Longest error body excerpt carried into an error message
const ERROR_BODY_EXCERPT: usize = 200;

/// HTTP client for provider APIs.
///
/// Performs exactly one attempt per call; retries and backoff belong to the
/// reconciliation engine so that every attempt is visible to the circuit
/// breaker.
#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    timeout: Duration,
}

/// Decoded body together with the response headers.
#[derive(Debug)]
pub struct JsonResponse<T> {
    pub body: T,
    pub headers: HeaderMap,
}

impl HttpClient {
    /// Start building a new HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a request builder using the underlying reqwest client.
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// Execute the request once; transport failures are classified.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build().map_err(|err| LedgerLinkError::from(InfraError::from(err)))?;
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "sending HTTP request");

        match self.client.execute(request).await {
            Ok(response) => {
                debug!(%method, %url, status = %response.status(), "received HTTP response");
                Ok(response)
            }
            Err(err) if err.is_timeout() => {
                debug!(%method, %url, "HTTP request timed out");
                Err(LedgerLinkError::Timeout(duration_millis(self.timeout)))
            }
            Err(err) => {
                debug!(%method, %url, error = %err, "HTTP request failed");
                Err(InfraError::from(err).into())
            }
        }
    }

    /// Execute the request, reject non-success statuses and decode the JSON
    /// body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<JsonResponse<T>> {
        let response = self.send(builder).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(|err| LedgerLinkError::from(InfraError::from(err)))?;

        if let Some(error) = classify_status(status, &headers, &bytes) {
            return Err(error);
        }

        let body = serde_json::from_slice(&bytes).map_err(|err| {
            LedgerLinkError::Transient(format!("undecodable provider response: {err}"))
        })?;
        Ok(JsonResponse { body, headers })
    }

    /// Configured per-request timeout.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    user_agent: Option<String>,
    default_headers: Option<HeaderMap>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: Some(format!("ledgerlink/{}", env!("CARGO_PKG_VERSION"))),
            default_headers: None,
        }
    }
}

impl HttpClientBuilder {
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    #[must_use]
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let mut builder = ReqwestClient::builder().timeout(self.timeout).no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client = builder.build().map_err(|err| LedgerLinkError::from(InfraError::from(err)))?;

        Ok(HttpClient { client, timeout: self.timeout })
    }
}

/// Map a non-success status into the error taxonomy; `None` for 2xx/3xx.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Option<LedgerLinkError> {
    if status.is_success() || status.is_redirection() {
        return None;
    }

    let excerpt = String::from_utf8_lossy(&body[..body.len().min(ERROR_BODY_EXCERPT)]);
    let message = format!(
        "HTTP {} {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("unknown status"),
        excerpt.trim()
    );

    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LedgerLinkError::Authentication(message),
        StatusCode::TOO_MANY_REQUESTS => {
            LedgerLinkError::RateLimited { message, retry_after_secs: retry_after_secs(headers) }
        }
        StatusCode::REQUEST_TIMEOUT => LedgerLinkError::Transient(message),
        s if s.is_client_error() => LedgerLinkError::Validation(message),
        _ => LedgerLinkError::Transient(message),
    })
}

/// `Retry-After` in delay-seconds form
pub fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Pong {
        ok: bool,
    }

    #[tokio::test]
    async fn decodes_successful_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-request-id", "r-1")
                    .set_body_json(serde_json::json!({ "ok": true })),
            )
            .mount(&server)
            .await;

        let client = HttpClient::builder().timeout(Duration::from_secs(2)).build().expect("client");
        let response: JsonResponse<Pong> = client
            .send_json(client.request(Method::GET, format!("{}/ping", server.uri())))
            .await
            .expect("decoded");
        assert!(response.body.ok);
        assert_eq!(response.headers.get("x-request-id").expect("header"), "r-1");
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new().expect("client");
        let err = client
            .send_json::<Pong>(client.request(Method::GET, server.uri()))
            .await
            .expect_err("rate limited");
        assert!(matches!(err, LedgerLinkError::RateLimited { retry_after_secs: Some(7), .. }));
    }

    #[tokio::test]
    async fn undecodable_body_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let client = HttpClient::new().expect("client");
        let err = client
            .send_json::<Pong>(client.request(Method::GET, server.uri()))
            .await
            .expect_err("not json");
        assert!(matches!(err, LedgerLinkError::Transient(msg) if msg.contains("undecodable")));
    }

    #[tokio::test]
    async fn slow_response_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = HttpClient::builder().timeout(Duration::from_millis(50)).build().expect("client");
        let err = client.send(client.request(Method::GET, server.uri())).await.expect_err("timeout");
        assert_eq!(err, LedgerLinkError::Timeout(50));
    }

    #[test]
    fn status_classification() {
        let headers = HeaderMap::new();
        assert!(classify_status(StatusCode::OK, &headers, b"").is_none());
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, &headers, b"denied"),
            Some(LedgerLinkError::Authentication(msg)) if msg.contains("denied")
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, &headers, b""),
            Some(LedgerLinkError::Validation(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, &headers, b""),
            Some(LedgerLinkError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &headers, b""),
            Some(LedgerLinkError::RateLimited { retry_after_secs: None, .. })
        ));
    }
}
