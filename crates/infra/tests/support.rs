//! Shared wiring for infra integration tests: the engine, webhook tracker
//! and health aggregator over SQLite repositories and live-provider adapters
//! pointed at a mock server.

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ledgerlink_common::SystemClock;
use ledgerlink_core::breaker::breaker_config;
use ledgerlink_core::{
    AlertManager, BreakerRegistry, HealthAggregator, HealthPorts, IntegrationRepository,
    OverrideService, ReconciliationEngine, ReconciliationPorts, SharedClock, WebhookTracker,
};
use ledgerlink_domain::{
    BreakerConfig, HealthConfig, Integration, Provider, ReconciliationConfig, RetryPolicy,
    ServerConfig,
};
use ledgerlink_infra::{
    DbManager, HttpClient, PrometheusMetrics, ProviderAdapterFactory, SqliteAlertRepository,
    SqliteBreakerStateRepository, SqliteIntegrationRepository, SqliteLedgerRepository,
    SqliteOverrideLogRepository, SqliteSyncRunRepository, SqliteTransactionRepository,
    SqliteWebhookEventRepository,
};
use tempfile::{NamedTempFile, TempDir};

pub const PUBLIC_BASE_URL: &str = "https://ledgerlink.test";
pub const SIGNING_KEY: &str = "test-signing-key";

/// Temporary database that lives as long as the wrapper
pub struct TestDatabase {
    pub manager: Arc<DbManager>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let db_path = temp_dir.path().join("ledgerlink.db");
        let manager =
            DbManager::new(&db_path, 4, Duration::from_secs(5)).expect("db manager should be created");
        manager.run_migrations().expect("migrations should apply");
        Self { manager: Arc::new(manager), _temp_dir: temp_dir }
    }
}

/// Everything a test needs, wired the way the server wires it
pub struct Stack {
    pub db: TestDatabase,
    pub integrations: Arc<SqliteIntegrationRepository>,
    pub transactions: Arc<SqliteTransactionRepository>,
    pub ledger: Arc<SqliteLedgerRepository>,
    pub sync_runs: Arc<SqliteSyncRunRepository>,
    pub webhooks: Arc<SqliteWebhookEventRepository>,
    pub alerts_repo: Arc<SqliteAlertRepository>,
    pub overrides_repo: Arc<SqliteOverrideLogRepository>,
    pub adapters: Arc<ProviderAdapterFactory>,
    pub metrics: Arc<PrometheusMetrics>,
    pub engine: Arc<ReconciliationEngine>,
    pub tracker: WebhookTracker,
    pub health: HealthAggregator,
    pub overrides: OverrideService,
    pub integration: Integration,
    _credentials: NamedTempFile,
}

impl Stack {
    /// Square integration for `biz-1` whose API lives at `api_base_url`
    pub async fn square(api_base_url: &str) -> Self {
        Self::build(Provider::Square, api_base_url).await
    }

    pub async fn build(provider: Provider, api_base_url: &str) -> Self {
        let clock: SharedClock = Arc::new(SystemClock);
        let db = TestDatabase::new();
        let integrations = Arc::new(SqliteIntegrationRepository::new(Arc::clone(&db.manager)));
        let transactions = Arc::new(SqliteTransactionRepository::new(Arc::clone(&db.manager)));
        let ledger = Arc::new(SqliteLedgerRepository::new(Arc::clone(&db.manager)));
        let sync_runs = Arc::new(SqliteSyncRunRepository::new(Arc::clone(&db.manager)));
        let webhooks = Arc::new(SqliteWebhookEventRepository::new(Arc::clone(&db.manager)));
        let alerts_repo = Arc::new(SqliteAlertRepository::new(Arc::clone(&db.manager)));
        let overrides_repo = Arc::new(SqliteOverrideLogRepository::new(Arc::clone(&db.manager)));
        let breaker_repo = Arc::new(SqliteBreakerStateRepository::new(Arc::clone(&db.manager)));

        let recon = ReconciliationConfig { provider_timeout_ms: 2_000, ..ReconciliationConfig::default() };
        let server = ServerConfig { public_base_url: PUBLIC_BASE_URL.to_string(), ..ServerConfig::default() };
        let adapters = Arc::new(ProviderAdapterFactory::new(
            HttpClient::builder()
                .timeout(Duration::from_millis(recon.provider_timeout_ms))
                .build()
                .expect("http client"),
            server.public_base_url,
        ));
        let metrics = Arc::new(PrometheusMetrics::new().expect("metrics"));

        let credentials = credential_file(api_base_url);
        let mut integration = Integration::new(
            "biz-1",
            provider,
            format!("file:{}", credentials.path().display()),
            Utc::now(),
        );
        integration.retry_policy =
            RetryPolicy { max_attempts: 2, initial_backoff_ms: 1, multiplier: 2.0, max_backoff_ms: 5 };
        integrations.insert(&integration).await.expect("integration inserted");

        let breakers = Arc::new(BreakerRegistry::new(
            breaker_config(&BreakerConfig::default()).expect("breaker config"),
            Arc::clone(&clock),
            breaker_repo,
        ));
        let alerts = Arc::new(AlertManager::new(alerts_repo.clone(), Arc::clone(&clock)));
        let engine = Arc::new(ReconciliationEngine::new(
            ReconciliationPorts {
                integrations: integrations.clone(),
                transactions: transactions.clone(),
                ledger: ledger.clone(),
                sync_runs: sync_runs.clone(),
                adapters: adapters.clone(),
                metrics: metrics.clone(),
            },
            Arc::clone(&breakers),
            Arc::clone(&alerts),
            recon,
            Arc::clone(&clock),
        ));
        let tracker = WebhookTracker::new(
            webhooks.clone(),
            Arc::clone(&engine),
            Arc::clone(&alerts),
            Arc::clone(&clock),
        );
        let health = HealthAggregator::new(
            HealthPorts {
                integrations: integrations.clone(),
                transactions: transactions.clone(),
                webhooks: webhooks.clone(),
                overrides: overrides_repo.clone(),
                sync_runs: sync_runs.clone(),
                adapters: adapters.clone(),
                metrics: metrics.clone(),
            },
            breakers,
            alerts,
            HealthConfig::default(),
            Arc::clone(&clock),
        );
        let overrides = OverrideService::new(
            overrides_repo.clone(),
            integrations.clone(),
            transactions.clone(),
            adapters.clone(),
            clock,
        );

        Self {
            db,
            integrations,
            transactions,
            ledger,
            sync_runs,
            webhooks,
            alerts_repo,
            overrides_repo,
            adapters,
            metrics,
            engine,
            tracker,
            health,
            overrides,
            integration,
            _credentials: credentials,
        }
    }

    /// URL Square signs webhooks for this integration with
    pub fn square_notification_url(&self) -> String {
        format!("{PUBLIC_BASE_URL}/webhooks/square/{}", self.integration.id)
    }
}

fn credential_file(api_base_url: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("credential file");
    let body = serde_json::json!({
        "access_token": "test-access-token",
        "webhook_signing_key": SIGNING_KEY,
        "api_base_url": api_base_url,
        "shop_domain": "demo.myshopify.com",
    });
    write!(file, "{body}").expect("credentials written");
    file
}
