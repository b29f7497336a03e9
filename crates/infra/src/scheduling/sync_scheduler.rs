//! Interval scheduler for per-integration syncs and health evaluation.
//!
//! Every tick the scheduler lists integrations and starts an incremental
//! sync for each one that is allowed to sync and whose interval has elapsed.
//! Syncs run as independent tasks; the engine's per-integration lock keeps a
//! slow sync from overlapping the next one. Health is re-evaluated on its own
//! interval so alerts open and resolve without an API call.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ledgerlink_infra::scheduling::{SyncScheduler, SyncSchedulerConfig};
//!
//! # async fn example(
//! #     engine: Arc<ledgerlink_core::ReconciliationEngine>,
//! #     health: Arc<ledgerlink_core::HealthAggregator>,
//! #     clock: ledgerlink_core::SharedClock,
//! # ) -> Result<(), ledgerlink_infra::SchedulerError> {
//! let mut scheduler = SyncScheduler::new(engine, health, clock, SyncSchedulerConfig::default());
//! scheduler.start().await?;
//! // ... application runs ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ledgerlink_core::{HealthAggregator, ReconciliationEngine, SharedClock};
use ledgerlink_domain::{HealthConfig, SchedulerConfig, SyncRequest};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::scheduling::error::{SchedulerError, SchedulerResult};

/// Type alias for task handle to avoid complexity warnings
type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Configuration for sync scheduler
#[derive(Debug, Clone)]
pub struct SyncSchedulerConfig {
    /// How often due integrations are looked up
    pub tick_interval: Duration,
    /// How often every integration's health is evaluated
    pub health_interval: Duration,
    /// Upper bound on waiting for the loop and its syncs at stop
    pub join_timeout: Duration,
}

impl Default for SyncSchedulerConfig {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default(), &HealthConfig::default())
    }
}

impl SyncSchedulerConfig {
    pub fn from_config(scheduler: &SchedulerConfig, health: &HealthConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(scheduler.tick_interval_secs.max(1)),
            health_interval: Duration::from_secs(health.evaluation_interval_secs.max(1)),
            join_timeout: Duration::from_secs(scheduler.join_timeout_secs),
        }
    }
}

/// Collaborators moved into the background loop
#[derive(Clone)]
struct LoopContext {
    engine: Arc<ReconciliationEngine>,
    health: Arc<HealthAggregator>,
    clock: SharedClock,
}

/// Syncs spawned by the loop and not yet joined
#[derive(Default)]
struct InFlightSyncs {
    tasks: JoinSet<Uuid>,
    integrations: HashSet<Uuid>,
}

/// Periodic sync and health scheduler
pub struct SyncScheduler {
    context: LoopContext,
    config: SyncSchedulerConfig,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl SyncScheduler {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        health: Arc<HealthAggregator>,
        clock: SharedClock,
        config: SyncSchedulerConfig,
    ) -> Self {
        Self {
            context: LoopContext { engine, health, clock },
            config,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the scheduler
    ///
    /// # Errors
    ///
    /// Returns error if scheduler is already running
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            health_secs = self.config.health_interval.as_secs(),
            "Starting sync scheduler"
        );

        // Fresh token so the scheduler can be restarted after stop
        self.cancellation_token = CancellationToken::new();

        let context = self.context.clone();
        let config = self.config.clone();
        let cancel = self.cancellation_token.clone();
        let handle = tokio::spawn(async move {
            Self::run_loop(context, config, cancel).await;
        });

        *self.task_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the scheduler, cancelling in-flight syncs
    ///
    /// # Errors
    ///
    /// Returns error if scheduler is not running or does not wind down
    /// within the join timeout
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        info!("Stopping sync scheduler");
        self.cancellation_token.cancel();

        if let Some(handle) = self.task_handle.lock().await.take() {
            let join_timeout = self.config.join_timeout;
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|_| SchedulerError::Timeout { seconds: join_timeout.as_secs() })??;
        }

        info!("Sync scheduler stopped");
        Ok(())
    }

    /// A scheduler is running while its loop task has not finished
    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    async fn run_loop(context: LoopContext, config: SyncSchedulerConfig, cancel: CancellationToken) {
        let mut sync_tick = tokio::time::interval(config.tick_interval);
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut health_tick = tokio::time::interval(config.health_interval);
        health_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = InFlightSyncs::default();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Sync loop cancelled");
                    break;
                }
                _ = sync_tick.tick() => {
                    Self::dispatch_due(&context, &mut in_flight).await;
                }
                _ = health_tick.tick() => {
                    Self::evaluate_health(&context).await;
                }
                Some(joined) = in_flight.tasks.join_next(), if !in_flight.tasks.is_empty() => {
                    Self::reap(&context, &mut in_flight, joined);
                }
            }
        }

        for integration_id in &in_flight.integrations {
            context.engine.cancel(*integration_id);
        }
        while let Some(joined) = in_flight.tasks.join_next().await {
            Self::reap(&context, &mut in_flight, joined);
        }
    }

    /// Spawn an incremental sync for every integration that is due
    async fn dispatch_due(context: &LoopContext, in_flight: &mut InFlightSyncs) {
        let integrations = match context.engine.ports().integrations.list().await {
            Ok(integrations) => integrations,
            Err(err) => {
                error!(error = %err, "Failed to list integrations for scheduling");
                return;
            }
        };

        let now = context.clock.now();
        for integration in integrations {
            if !integration.can_sync()
                || !integration.sync_due(now)
                || in_flight.integrations.contains(&integration.id)
                || context.engine.is_running(integration.id)
            {
                continue;
            }

            let engine = Arc::clone(&context.engine);
            let integration_id = integration.id;
            in_flight.integrations.insert(integration_id);
            in_flight.tasks.spawn(async move {
                match engine.sync(SyncRequest::scheduled(integration_id)).await {
                    Ok(run) => debug!(
                        %integration_id,
                        outcome = %run.outcome,
                        "scheduled sync finished"
                    ),
                    Err(err) => warn!(%integration_id, error = %err, "scheduled sync could not run"),
                }
                integration_id
            });
        }
    }

    fn reap(
        context: &LoopContext,
        in_flight: &mut InFlightSyncs,
        joined: Result<Uuid, tokio::task::JoinError>,
    ) {
        match joined {
            Ok(integration_id) => {
                in_flight.integrations.remove(&integration_id);
            }
            Err(err) => {
                error!(error = %err, "scheduled sync task failed");
                // The failed task's id is lost with it; keep only live syncs
                let engine = &context.engine;
                in_flight.integrations.retain(|id| engine.is_running(*id));
            }
        }
    }

    async fn evaluate_health(context: &LoopContext) {
        match context.health.evaluate_all().await {
            Ok(snapshots) => debug!(integrations = snapshots.len(), "health evaluated"),
            Err(err) => error!(error = %err, "health evaluation failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use ledgerlink_common::MockClock;
    use ledgerlink_core::breaker::breaker_config;
    use ledgerlink_core::testing::{
        FakeProviderAdapter, InMemoryStore, RecordingMetrics, StaticAdapterFactory,
    };
    use ledgerlink_core::{AlertManager, BreakerRegistry, HealthPorts, ReconciliationPorts};
    use ledgerlink_domain::{
        BreakerConfig, Integration, Provider, ReconciliationConfig, SyncOutcome, SyncTrigger,
    };

    use super::*;

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: MockClock,
        scheduler: SyncScheduler,
    }

    fn fixture(integrations: &[Integration]) -> Fixture {
        let clock = MockClock::at(chrono::Utc::now());
        let shared: SharedClock = Arc::new(clock.clone());
        let store = Arc::new(InMemoryStore::new());
        let adapters = Arc::new(StaticAdapterFactory::new());
        let metrics = Arc::new(RecordingMetrics::new());
        for integration in integrations {
            store.put_integration(integration.clone());
            adapters.register(integration.id, Arc::new(FakeProviderAdapter::new(integration.provider)));
        }

        let breakers = Arc::new(BreakerRegistry::new(
            breaker_config(&BreakerConfig::default()).expect("breaker config"),
            Arc::clone(&shared),
            store.clone(),
        ));
        let alerts = Arc::new(AlertManager::new(store.clone(), Arc::clone(&shared)));
        let engine = Arc::new(ReconciliationEngine::new(
            ReconciliationPorts {
                integrations: store.clone(),
                transactions: store.clone(),
                ledger: store.clone(),
                sync_runs: store.clone(),
                adapters: adapters.clone(),
                metrics: metrics.clone(),
            },
            Arc::clone(&breakers),
            Arc::clone(&alerts),
            ReconciliationConfig::default(),
            Arc::clone(&shared),
        ));
        let health = Arc::new(HealthAggregator::new(
            HealthPorts {
                integrations: store.clone(),
                transactions: store.clone(),
                webhooks: store.clone(),
                overrides: store.clone(),
                sync_runs: store.clone(),
                adapters: adapters.clone(),
                metrics,
            },
            breakers,
            alerts,
            HealthConfig::default(),
            Arc::clone(&shared),
        ));

        let config = SyncSchedulerConfig {
            tick_interval: Duration::from_millis(10),
            health_interval: Duration::from_millis(25),
            join_timeout: Duration::from_secs(2),
        };
        Fixture { store, clock, scheduler: SyncScheduler::new(engine, health, shared, config) }
    }

    async fn wait_for_runs(store: &InMemoryStore, count: usize) {
        for _ in 0..200 {
            if store.sync_runs().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn syncs_due_integrations_once_per_interval() {
        let now = chrono::Utc::now();
        let due = Integration::new("biz-1", Provider::Square, "env:A", now);
        let mut disabled = Integration::new("biz-2", Provider::Zettle, "env:B", now);
        disabled.enabled = false;
        let mut f = fixture(&[due.clone(), disabled.clone()]);

        f.scheduler.start().await.expect("started");
        wait_for_runs(&f.store, 1).await;
        // Several more ticks pass while the clock is frozen
        tokio::time::sleep(Duration::from_millis(80)).await;
        f.scheduler.stop().await.expect("stopped");

        let runs = f.store.sync_runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].integration_id, due.id);
        assert_eq!(runs[0].trigger, SyncTrigger::Scheduled);
        assert_eq!(runs[0].outcome, SyncOutcome::Completed);
        assert!(f.store.integration(disabled.id).expect("stored").last_synced_at.is_none());
    }

    #[tokio::test]
    async fn advancing_past_interval_syncs_again() {
        let mut integration = Integration::new("biz-1", Provider::Shopify, "env:A", chrono::Utc::now());
        integration.sync_interval_secs = 60;
        let mut f = fixture(&[integration]);

        f.scheduler.start().await.expect("started");
        wait_for_runs(&f.store, 1).await;
        f.clock.advance_secs(61);
        wait_for_runs(&f.store, 2).await;
        f.scheduler.stop().await.expect("stopped");

        assert_eq!(f.store.sync_runs().len(), 2);
    }

    #[tokio::test]
    async fn lifecycle_errors() {
        let mut f = fixture(&[]);
        assert!(matches!(f.scheduler.stop().await, Err(SchedulerError::NotRunning)));

        f.scheduler.start().await.expect("started");
        assert!(f.scheduler.is_running());
        assert!(matches!(f.scheduler.start().await, Err(SchedulerError::AlreadyRunning)));

        f.scheduler.stop().await.expect("stopped");
        assert!(!f.scheduler.is_running());

        // Restart after stop
        f.scheduler.start().await.expect("restarted");
        f.scheduler.stop().await.expect("stopped again");
    }
}
