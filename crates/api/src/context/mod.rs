//! Application context - dependency injection container

use std::sync::Arc;

use ledgerlink_common::SystemClock;
use ledgerlink_core::breaker::breaker_config;
use ledgerlink_core::{
    AlertManager, AlertRepository, BreakerRegistry, HealthAggregator, HealthPorts,
    IntegrationRepository, OverrideService, ReconciliationEngine, ReconciliationPorts, SharedClock,
    TransactionRepository, WebhookTracker,
};
use ledgerlink_domain::{Config, LedgerLinkError, Result};
use ledgerlink_infra::config::seed_integrations;
use ledgerlink_infra::{
    DbManager, PrometheusMetrics, ProviderAdapterFactory, SchedulerError, SqliteAlertRepository,
    SqliteBreakerStateRepository, SqliteIntegrationRepository, SqliteLedgerRepository,
    SqliteOverrideLogRepository, SqliteSyncRunRepository, SqliteTransactionRepository,
    SqliteWebhookEventRepository, SyncScheduler, SyncSchedulerConfig,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Application context - holds all services and dependencies
pub struct AppContext {
    pub config: Config,
    pub db: Arc<DbManager>,
    pub clock: SharedClock,

    // Ports the HTTP surface reads directly
    pub integrations: Arc<dyn IntegrationRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub alert_log: Arc<dyn AlertRepository>,

    pub adapters: Arc<ProviderAdapterFactory>,
    pub metrics: Arc<PrometheusMetrics>,

    // Core services
    pub engine: Arc<ReconciliationEngine>,
    pub webhooks: Arc<WebhookTracker>,
    pub health: Arc<HealthAggregator>,
    pub overrides: Arc<OverrideService>,

    scheduler: Mutex<SyncScheduler>,
}

impl AppContext {
    /// Create the context on the system clock
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Create the context with an injected clock
    ///
    /// Opens the database, applies migrations and inserts configured
    /// integration seeds. Background work does not start until
    /// [`AppContext::start_background`].
    pub async fn with_clock(config: Config, clock: SharedClock) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(DbManager::from_config(&config.database)?);
        db.run_migrations()?;
        info!(path = %db.path().display(), "database ready");

        let integrations = Arc::new(SqliteIntegrationRepository::new(Arc::clone(&db)));
        let transactions = Arc::new(SqliteTransactionRepository::new(Arc::clone(&db)));
        let ledger = Arc::new(SqliteLedgerRepository::new(Arc::clone(&db)));
        let sync_runs = Arc::new(SqliteSyncRunRepository::new(Arc::clone(&db)));
        let webhook_events = Arc::new(SqliteWebhookEventRepository::new(Arc::clone(&db)));
        let alert_log = Arc::new(SqliteAlertRepository::new(Arc::clone(&db)));
        let override_log = Arc::new(SqliteOverrideLogRepository::new(Arc::clone(&db)));
        let breaker_states = Arc::new(SqliteBreakerStateRepository::new(Arc::clone(&db)));

        let seeded = seed_integrations(
            integrations.as_ref(),
            &config.integrations,
            &config.reconciliation.default_retry_policy,
            clock.now(),
        )
        .await?;
        if seeded > 0 {
            info!(seeded, "integration seeds inserted");
        }

        let adapters =
            Arc::new(ProviderAdapterFactory::from_config(&config.server, &config.reconciliation)?);
        let metrics = Arc::new(PrometheusMetrics::new()?);

        let breakers = Arc::new(BreakerRegistry::new(
            breaker_config(&config.breaker)?,
            Arc::clone(&clock),
            breaker_states,
        ));
        let alerts = Arc::new(AlertManager::new(alert_log.clone(), Arc::clone(&clock)));

        let engine = Arc::new(ReconciliationEngine::new(
            ReconciliationPorts {
                integrations: integrations.clone(),
                transactions: transactions.clone(),
                ledger,
                sync_runs: sync_runs.clone(),
                adapters: adapters.clone(),
                metrics: metrics.clone(),
            },
            Arc::clone(&breakers),
            Arc::clone(&alerts),
            config.reconciliation.clone(),
            Arc::clone(&clock),
        ));
        let webhooks = Arc::new(WebhookTracker::new(
            webhook_events.clone(),
            Arc::clone(&engine),
            Arc::clone(&alerts),
            Arc::clone(&clock),
        ));
        let health = Arc::new(HealthAggregator::new(
            HealthPorts {
                integrations: integrations.clone(),
                transactions: transactions.clone(),
                webhooks: webhook_events,
                overrides: override_log.clone(),
                sync_runs,
                adapters: adapters.clone(),
                metrics: metrics.clone(),
            },
            breakers,
            alerts,
            config.health.clone(),
            Arc::clone(&clock),
        ));
        let overrides = Arc::new(OverrideService::new(
            override_log,
            integrations.clone(),
            transactions.clone(),
            adapters.clone(),
            Arc::clone(&clock),
        ));

        let scheduler = SyncScheduler::new(
            Arc::clone(&engine),
            Arc::clone(&health),
            Arc::clone(&clock),
            SyncSchedulerConfig::from_config(&config.scheduler, &config.health),
        );

        Ok(Self {
            config,
            db,
            clock,
            integrations,
            transactions,
            alert_log,
            adapters,
            metrics,
            engine,
            webhooks,
            health,
            overrides,
            scheduler: Mutex::new(scheduler),
        })
    }

    /// Start the sync scheduler unless disabled in configuration
    pub async fn start_background(&self) -> Result<()> {
        if !self.config.scheduler.enabled {
            info!("sync scheduler disabled by configuration");
            return Ok(());
        }
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn scheduler_running(&self) -> bool {
        self.scheduler.lock().await.is_running()
    }

    /// Stop background work, cancelling in-flight syncs
    pub async fn shutdown(&self) -> Result<()> {
        info!("shutdown called on AppContext");
        match self.scheduler.lock().await.stop().await {
            Ok(()) | Err(SchedulerError::NotRunning) => Ok(()),
            Err(err) => {
                warn!(error = %err, "sync scheduler did not stop cleanly");
                Err(LedgerLinkError::from(err))
            }
        }
    }
}
