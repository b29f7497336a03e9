//! Zettle Purchase API adapter

use async_trait::async_trait;
use ledgerlink_core::ProviderAdapter;
use ledgerlink_domain::{
    FetchPage, FetchWindow, LedgerLinkError, Provider, Result, SyncCursor, ZettlePurchase,
};
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

use super::credentials::ProviderCredentials;
use super::paging::{self, Observed};
use super::rate_limit::RateLimitTracker;
use super::signatures;
use crate::http::HttpClient;

const ZETTLE_API_BASE: &str = "https://purchase.izettle.com";

pub const ZETTLE_SIGNATURE_HEADER: &str = "x-izettle-signature";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurchasesResponse {
    #[serde(default)]
    purchases: Vec<ZettlePurchase>,
    #[serde(default)]
    last_purchase_hash: Option<String>,
}

pub struct ZettleAdapter {
    http: HttpClient,
    base_url: String,
    business_id: String,
    access_token: String,
    signing_key: String,
    rate_limit: RateLimitTracker,
}

impl ZettleAdapter {
    pub fn new(http: HttpClient, business_id: impl Into<String>, credentials: &ProviderCredentials) -> Self {
        Self {
            http,
            base_url: credentials
                .api_base_url
                .clone()
                .unwrap_or_else(|| ZETTLE_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            business_id: business_id.into(),
            access_token: credentials.access_token.clone(),
            signing_key: credentials.webhook_signing_key.clone(),
            rate_limit: RateLimitTracker::new(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for ZettleAdapter {
    fn provider(&self) -> Provider {
        Provider::Zettle
    }

    async fn fetch_transactions(
        &self,
        cursor: Option<&SyncCursor>,
        window: &FetchWindow,
    ) -> Result<FetchPage> {
        let limit = paging::page_limit(window);
        let mut query = vec![("limit", limit.to_string()), ("descending", "false".to_string())];
        if let Some(start) = paging::resume_from(cursor, window) {
            query.push(("startDate", paging::format_timestamp(start)));
        }
        if let Some(end) = window.end {
            query.push(("endDate", paging::format_timestamp(end)));
        }
        if let Some(hash) = paging::resume_token(cursor) {
            query.push(("lastPurchaseHash", hash.to_string()));
        }

        let request = self
            .http
            .request(Method::GET, format!("{}/purchases/v2", self.base_url))
            .bearer_auth(&self.access_token)
            .query(&query);

        let body = match self.http.send_json::<PurchasesResponse>(request).await {
            Ok(response) => {
                self.rate_limit.observe_success();
                response.body
            }
            Err(err) => {
                if matches!(err, LedgerLinkError::RateLimited { .. }) {
                    self.rate_limit.observe_throttled();
                }
                return Err(err);
            }
        };

        // Zettle always returns a hash; a short page means history is exhausted
        let full_page = body.purchases.len() >= limit as usize;
        let next_token = body.last_purchase_hash.filter(|_| full_page);
        debug!(
            business_id = %self.business_id,
            purchases = body.purchases.len(),
            full_page,
            "fetched Zettle purchases"
        );

        let observed = body
            .purchases
            .iter()
            .map(|purchase| purchase.to_transaction(&self.business_id).map(Observed::settled))
            .collect::<Result<Vec<_>>>()?;

        Ok(paging::assemble_page(observed, cursor, window, next_token))
    }

    fn verify_webhook(&self, raw_payload: &[u8], signature: Option<&str>) -> bool {
        signature.is_some_and(|signature| {
            signatures::verify_hex(self.signing_key.as_bytes(), &[raw_payload], signature)
        })
    }

    fn rate_limit_headroom(&self) -> Option<f64> {
        self.rate_limit.headroom()
    }
}
