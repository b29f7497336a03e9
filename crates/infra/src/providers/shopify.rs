//! Shopify Admin REST adapter (orders)

use async_trait::async_trait;
use ledgerlink_core::ProviderAdapter;
use ledgerlink_domain::{
    FetchPage, FetchWindow, LedgerLinkError, Provider, Result, ShopifyOrder, SyncCursor,
};
use reqwest::header::{HeaderMap, LINK};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};

use super::credentials::ProviderCredentials;
use super::paging::{self, Observed};
use super::rate_limit::RateLimitTracker;
use super::signatures;
use crate::http::HttpClient;

const SHOPIFY_API_VERSION: &str = "2024-01";
const CALL_LIMIT_HEADER: &str = "x-shopify-shop-api-call-limit";

pub const SHOPIFY_SIGNATURE_HEADER: &str = "x-shopify-hmac-sha256";
pub const SHOPIFY_WEBHOOK_ID_HEADER: &str = "x-shopify-webhook-id";

#[derive(Debug, Deserialize)]
struct OrdersResponse {
    #[serde(default)]
    orders: Vec<ShopifyOrder>,
}

pub struct ShopifyAdapter {
    http: HttpClient,
    base_url: String,
    business_id: String,
    access_token: String,
    signing_key: String,
    rate_limit: RateLimitTracker,
}

impl ShopifyAdapter {
    /// Fails when neither a shop domain nor an API base URL is configured
    pub fn new(
        http: HttpClient,
        business_id: impl Into<String>,
        credentials: &ProviderCredentials,
    ) -> Result<Self> {
        let base_url = match (&credentials.api_base_url, &credentials.shop_domain) {
            (Some(base), _) => base.trim_end_matches('/').to_string(),
            (None, Some(domain)) if !domain.trim().is_empty() => {
                format!("https://{}", domain.trim().trim_end_matches('/'))
            }
            _ => {
                return Err(LedgerLinkError::Authentication(
                    "Shopify credentials need a shop_domain".to_string(),
                ))
            }
        };

        Ok(Self {
            http,
            base_url,
            business_id: business_id.into(),
            access_token: credentials.access_token.clone(),
            signing_key: credentials.webhook_signing_key.clone(),
            rate_limit: RateLimitTracker::new(),
        })
    }

    fn observe_call_limit(&self, headers: &HeaderMap) {
        if let Some(value) = headers.get(CALL_LIMIT_HEADER).and_then(|v| v.to_str().ok()) {
            if !self.rate_limit.observe_usage_header(value) {
                warn!(value, "unparseable Shopify call limit header");
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for ShopifyAdapter {
    fn provider(&self) -> Provider {
        Provider::Shopify
    }

    async fn fetch_transactions(
        &self,
        cursor: Option<&SyncCursor>,
        window: &FetchWindow,
    ) -> Result<FetchPage> {
        let limit = paging::page_limit(window).to_string();
        // A page_info request may not repeat the original filters
        let query: Vec<(&str, String)> = match paging::resume_token(cursor) {
            Some(token) => vec![("limit", limit), ("page_info", token.to_string())],
            None => {
                let mut query = vec![
                    ("limit", limit),
                    ("status", "any".to_string()),
                    ("order", "created_at asc".to_string()),
                ];
                if let Some(start) = paging::resume_from(cursor, window) {
                    query.push(("created_at_min", paging::format_timestamp(start)));
                }
                if let Some(end) = window.end {
                    query.push(("created_at_max", paging::format_timestamp(end)));
                }
                query
            }
        };

        let request = self
            .http
            .request(
                Method::GET,
                format!("{}/admin/api/{SHOPIFY_API_VERSION}/orders.json", self.base_url),
            )
            .header("X-Shopify-Access-Token", &self.access_token)
            .query(&query);

        let response = match self.http.send_json::<OrdersResponse>(request).await {
            Ok(response) => response,
            Err(err) => {
                if matches!(err, LedgerLinkError::RateLimited { .. }) {
                    self.rate_limit.observe_throttled();
                }
                return Err(err);
            }
        };
        self.observe_call_limit(&response.headers);

        let next_token = next_page_info(&response.headers);
        debug!(
            business_id = %self.business_id,
            orders = response.body.orders.len(),
            has_next = next_token.is_some(),
            "fetched Shopify orders"
        );

        let observed = response
            .body
            .orders
            .iter()
            .map(|order| {
                if order.is_settled() {
                    order.to_transaction(&self.business_id).map(Observed::settled)
                } else {
                    Ok(Observed::skipped(order.created_at))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(paging::assemble_page(observed, cursor, window, next_token))
    }

    fn verify_webhook(&self, raw_payload: &[u8], signature: Option<&str>) -> bool {
        signature.is_some_and(|signature| {
            signatures::verify_base64(self.signing_key.as_bytes(), &[raw_payload], signature)
        })
    }

    fn rate_limit_headroom(&self) -> Option<f64> {
        self.rate_limit.headroom()
    }
}

/// `page_info` of the `rel="next"` entry of a Link header
fn next_page_info(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == r#"rel="next""#) {
            return None;
        }
        let target = target.trim().trim_start_matches('<').trim_end_matches('>');
        let (_, query) = target.split_once('?')?;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix("page_info="))
            .filter(|token| !token.is_empty())
            .map(str::to_string)
    })
}
