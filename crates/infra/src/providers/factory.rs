//! Builds one adapter per integration and caches it

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ledgerlink_core::{AdapterFactory, ProviderAdapter};
use ledgerlink_domain::{Integration, Provider, ReconciliationConfig, Result, ServerConfig};
use tracing::info;
use uuid::Uuid;

use super::credentials::resolve_credentials;
use super::shopify::ShopifyAdapter;
use super::square::SquareAdapter;
use super::zettle::ZettleAdapter;
use crate::http::HttpClient;

struct CachedAdapter {
    credential_ref: String,
    adapter: Arc<dyn ProviderAdapter>,
}

/// Live-provider [`AdapterFactory`]
///
/// Adapters keep their rate-limit observations, so they are cached for the
/// lifetime of the integration's configuration. A changed credential
/// reference rebuilds the adapter.
pub struct ProviderAdapterFactory {
    http: HttpClient,
    public_base_url: String,
    adapters: DashMap<Uuid, CachedAdapter>,
}

impl ProviderAdapterFactory {
    pub fn new(http: HttpClient, public_base_url: impl Into<String>) -> Self {
        Self {
            http,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            adapters: DashMap::new(),
        }
    }

    pub fn from_config(server: &ServerConfig, reconciliation: &ReconciliationConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_millis(reconciliation.provider_timeout_ms))
            .build()?;
        Ok(Self::new(http, server.public_base_url.clone()))
    }

    /// URL the provider posts webhooks for `integration` to
    pub fn notification_url(&self, integration: &Integration) -> String {
        format!("{}/webhooks/{}/{}", self.public_base_url, integration.provider, integration.id)
    }

    fn build(&self, integration: &Integration) -> Result<Arc<dyn ProviderAdapter>> {
        let credentials = resolve_credentials(&integration.credential_ref)?;
        let http = self.http.clone();
        let business_id = integration.business_id.clone();

        let adapter: Arc<dyn ProviderAdapter> = match integration.provider {
            Provider::Square => Arc::new(SquareAdapter::new(
                http,
                business_id,
                &credentials,
                self.notification_url(integration),
            )),
            Provider::Shopify => Arc::new(ShopifyAdapter::new(http, business_id, &credentials)?),
            Provider::Zettle => Arc::new(ZettleAdapter::new(http, business_id, &credentials)),
        };
        Ok(adapter)
    }
}

#[async_trait]
impl AdapterFactory for ProviderAdapterFactory {
    async fn adapter_for(&self, integration: &Integration) -> Result<Arc<dyn ProviderAdapter>> {
        if let Some(cached) = self.adapters.get(&integration.id) {
            if cached.credential_ref == integration.credential_ref {
                return Ok(Arc::clone(&cached.adapter));
            }
        }

        let adapter = self.build(integration)?;
        info!(
            integration_id = %integration.id,
            provider = %integration.provider,
            "built provider adapter"
        );
        self.adapters.insert(
            integration.id,
            CachedAdapter {
                credential_ref: integration.credential_ref.clone(),
                adapter: Arc::clone(&adapter),
            },
        );
        Ok(adapter)
    }

    fn invalidate(&self, integration_id: Uuid) {
        self.adapters.remove(&integration_id);
    }

    fn cached_headroom(&self, integration_id: Uuid) -> Option<f64> {
        self.adapters.get(&integration_id).and_then(|cached| cached.adapter.rate_limit_headroom())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::Utc;
    use ledgerlink_domain::LedgerLinkError;
    use tempfile::NamedTempFile;

    use super::*;

    fn credential_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"access_token":"t","webhook_signing_key":"k","shop_domain":"s.myshopify.com"}}"#)
            .expect("written");
        file
    }

    fn factory() -> ProviderAdapterFactory {
        ProviderAdapterFactory::new(HttpClient::new().expect("client"), "https://ledgerlink.test/")
    }

    #[tokio::test]
    async fn caches_until_invalidated() {
        let file = credential_file();
        let factory = factory();
        let integration =
            Integration::new("biz", Provider::Zettle, format!("file:{}", file.path().display()), Utc::now());

        let first = factory.adapter_for(&integration).await.expect("adapter");
        let second = factory.adapter_for(&integration).await.expect("adapter");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.cached_headroom(integration.id), None);

        factory.invalidate(integration.id);
        let third = factory.adapter_for(&integration).await.expect("adapter");
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn changed_credential_ref_rebuilds() {
        let file_a = credential_file();
        let file_b = credential_file();
        let factory = factory();
        let mut integration =
            Integration::new("biz", Provider::Shopify, format!("file:{}", file_a.path().display()), Utc::now());
        let first = factory.adapter_for(&integration).await.expect("adapter");

        integration.credential_ref = format!("file:{}", file_b.path().display());
        let second = factory.adapter_for(&integration).await.expect("adapter");
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.provider(), Provider::Shopify);
    }

    #[tokio::test]
    async fn unresolvable_credentials_fail_authentication() {
        let factory = factory();
        let integration = Integration::new("biz", Provider::Square, "env:LEDGERLINK_TEST_NO_SUCH_SECRET", Utc::now());
        let err = factory.adapter_for(&integration).await.err();
        assert!(matches!(err, Some(LedgerLinkError::Authentication(_))));
        assert_eq!(factory.cached_headroom(integration.id), None);
    }

    #[test]
    fn notification_url_uses_public_base() {
        let factory = factory();
        let integration = Integration::new("biz", Provider::Square, "env:X", Utc::now());
        assert_eq!(
            factory.notification_url(&integration),
            format!("https://ledgerlink.test/webhooks/square/{}", integration.id)
        );
    }
}
