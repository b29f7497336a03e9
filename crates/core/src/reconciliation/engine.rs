//! Reconciliation engine - sync orchestration and transaction classification

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ledgerlink_common::{retry_with_policy, CallPermit, CircuitState, RetryConfig, RetryDecision};
use ledgerlink_domain::{
    AlertKind, ErrorKind, FailureReason, FetchPage, FetchWindow, Integration, IntegrationStatus,
    LedgerLinkError, LedgerOutcome, NewTransactionRecord, ProviderLedgerEntry,
    ProviderTransaction, ReconciliationConfig, RecordUpdate, Result, SyncCounts, SyncCursor,
    SyncMode, SyncOutcome, SyncPriority, SyncRequest, SyncRun, TransactionRecord,
    VerificationState,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::claims::ClaimSet;
use super::matcher::{judge_reference, select_candidate, MatchCriteria, MatchDecision};
use super::ports::{
    IntegrationRepository, LedgerRepository, SyncRunRepository, TransactionRepository,
};
use crate::breaker::{to_domain_state, BreakerRegistry, IntegrationBreaker};
use crate::health::AlertManager;
use crate::metrics_ports::ReconMetricsPort;
use crate::providers::{AdapterFactory, ProviderAdapter};
use crate::SharedClock;

/// Collaborators of the engine
#[derive(Clone)]
pub struct ReconciliationPorts {
    pub integrations: Arc<dyn IntegrationRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub ledger: Arc<dyn LedgerRepository>,
    pub sync_runs: Arc<dyn SyncRunRepository>,
    pub adapters: Arc<dyn AdapterFactory>,
    pub metrics: Arc<dyn ReconMetricsPort>,
}

/// How one provider transaction was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Matched,
    Ambiguous,
    AmountMismatch,
    Unexpected,
    Duplicate,
}

impl Classification {
    const fn label(self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Ambiguous => "ambiguous",
            Self::AmountMismatch => "amount_mismatch",
            Self::Unexpected => "unexpected",
            Self::Duplicate => "duplicate",
        }
    }

    fn tally(self, counts: &mut SyncCounts) {
        let slot = match self {
            Self::Matched => &mut counts.matched,
            Self::Ambiguous => &mut counts.ambiguous,
            Self::AmountMismatch => &mut counts.amount_mismatch,
            Self::Unexpected => &mut counts.unexpected,
            Self::Duplicate => &mut counts.duplicates,
        };
        *slot = slot.saturating_add(1);
    }
}

/// Why a sync stopped before completing
#[derive(Debug)]
enum Interrupt {
    BreakerOpen(chrono::DateTime<chrono::Utc>),
    Cancelled,
    Failed(LedgerLinkError),
}

/// What a page may do to the stored cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorPolicy {
    /// Advance; a regression is an invariant violation
    Strict,
    /// Advance only when moving forward
    Forward,
    /// Never touch the cursor
    Hold,
}

impl CursorPolicy {
    const fn for_mode(mode: &SyncMode) -> Self {
        match mode {
            SyncMode::Incremental => Self::Strict,
            SyncMode::Full => Self::Forward,
            SyncMode::CustomRange { .. } => Self::Hold,
        }
    }
}

/// Per-sync state threaded through page processing
struct SyncContext<'a> {
    integration: &'a Integration,
    adapter: Arc<dyn ProviderAdapter>,
    breaker: Arc<IntegrationBreaker>,
    token: &'a CancellationToken,
    retry: RetryConfig,
}

/// The sync currently holding an integration's lock
struct InFlight {
    operation_id: Uuid,
    token: CancellationToken,
}

/// Keeps expected transactions consistent with provider reality
///
/// At most one sync runs per integration; classification of a record is a
/// compare-and-set on its verification state, so the webhook path can run
/// alongside a sync.
pub struct ReconciliationEngine {
    ports: ReconciliationPorts,
    breakers: Arc<BreakerRegistry>,
    alerts: Arc<AlertManager>,
    config: ReconciliationConfig,
    clock: SharedClock,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    in_flight: DashMap<Uuid, InFlight>,
    claims: ClaimSet,
}

impl ReconciliationEngine {
    pub fn new(
        ports: ReconciliationPorts,
        breakers: Arc<BreakerRegistry>,
        alerts: Arc<AlertManager>,
        config: ReconciliationConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            ports,
            breakers,
            alerts,
            config,
            clock,
            locks: DashMap::new(),
            in_flight: DashMap::new(),
            claims: ClaimSet::new(),
        }
    }

    pub const fn ports(&self) -> &ReconciliationPorts {
        &self.ports
    }

    pub const fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Whether a sync currently holds the integration's lock
    pub fn is_running(&self, integration_id: Uuid) -> bool {
        self.in_flight.contains_key(&integration_id)
    }

    /// Request cooperative cancellation of the in-flight sync
    pub fn cancel(&self, integration_id: Uuid) -> bool {
        self.in_flight.get(&integration_id).is_some_and(|running| {
            running.token.cancel();
            true
        })
    }

    /// Register an expected transaction created by upstream business logic
    #[instrument(skip(self, request), fields(integration_id = %request.integration_id))]
    pub async fn register_expected(&self, request: NewTransactionRecord) -> Result<TransactionRecord> {
        request.validate()?;
        let integration = self.load_integration(request.integration_id).await?;
        let record = request.into_record(integration.business_id, self.clock.now());
        self.ports.transactions.insert(&record).await?;
        info!(record_id = %record.id, amount_minor = record.amount_minor, currency = %record.currency, "expected transaction registered");
        Ok(record)
    }

    /// Run one sync operation
    ///
    /// Failures of the sync itself are reported in the returned run; an `Err`
    /// means the request could not be started or its run not persisted.
    #[instrument(
        skip(self, request),
        fields(
            integration_id = %request.integration_id,
            operation_id = %request.operation_id,
            mode = request.mode.label(),
            priority = %request.priority,
        )
    )]
    pub async fn sync(&self, request: SyncRequest) -> Result<SyncRun> {
        request.mode.validate()?;
        let integration = self.load_integration(request.integration_id).await?;
        let lock = self.lock_for(integration.id);

        let _guard = match request.priority {
            SyncPriority::Normal => {
                if let Ok(guard) = lock.try_lock_owned() {
                    guard
                } else {
                    let now = self.clock.now();
                    let run = SyncRun::begin(&request, integration.cursor.clone(), now);
                    let running = self.in_flight.get(&integration.id).map(|entry| entry.operation_id);
                    return match running {
                        Some(running) => {
                            debug!(in_flight = %running, "sync already in flight; coalescing");
                            self.conclude(&integration, run.coalesce(running, now)).await
                        }
                        // Lock held but not yet registered: the holder is between lock and start
                        None => {
                            debug!("sync starting concurrently; coalescing");
                            self.conclude(&integration, run.finish(SyncOutcome::Coalesced, now)).await
                        }
                    };
                }
            }
            SyncPriority::High => {
                if self.cancel(integration.id) {
                    info!("cancelling in-flight sync for high priority request");
                }
                lock.lock_owned().await
            }
        };

        let token = CancellationToken::new();
        self.in_flight
            .insert(integration.id, InFlight { operation_id: request.operation_id, token: token.clone() });
        let result = self.run_locked(&request, &token).await;
        self.in_flight.remove(&integration.id);
        result
    }

    /// Classify provider transactions delivered outside a sync (webhooks)
    ///
    /// Touches neither the cursor nor the breaker.
    pub async fn reconcile_transactions(
        &self,
        integration: &Integration,
        transactions: &[ProviderTransaction],
    ) -> Result<SyncCounts> {
        let mut counts = SyncCounts {
            fetched: u32::try_from(transactions.len()).unwrap_or(u32::MAX),
            ..SyncCounts::default()
        };
        for txn in transactions {
            self.reconcile_one(integration, txn).await?.tally(&mut counts);
        }
        Ok(counts)
    }

    async fn run_locked(&self, request: &SyncRequest, token: &CancellationToken) -> Result<SyncRun> {
        // Reload under the lock; a previous sync may have moved the cursor.
        let integration = self.load_integration(request.integration_id).await?;
        let started = self.clock.now();
        let mut run = SyncRun::begin(request, integration.cursor.clone(), started);

        if !integration.can_sync() {
            let reason = if integration.enabled {
                format!("integration status is {}", integration.status)
            } else {
                "integration disabled".to_string()
            };
            info!(reason = %reason, "sync skipped");
            run.error = Some(reason);
            let run = run.finish(SyncOutcome::Skipped, started);
            return self.conclude(&integration, run).await;
        }

        let result = self.execute(&integration, request, token, &mut run).await;
        let now = self.clock.now();
        let run = match result {
            Ok(()) => {
                if let Err(err) = self.ports.integrations.mark_synced(integration.id, now).await {
                    warn!(error = %err, "failed to stamp last sync time");
                }
                info!(counts = ?run.counts, "sync completed");
                run.finish(SyncOutcome::Completed, now)
            }
            Err(Interrupt::BreakerOpen(retry_at)) => {
                info!(%retry_at, "sync short-circuited by open breaker");
                run.error = Some(format!("circuit breaker open until {retry_at}"));
                run.finish(SyncOutcome::BreakerOpen, now)
            }
            Err(Interrupt::Cancelled) => {
                info!(cursor = ?run.cursor_after, "sync cancelled");
                run.finish(SyncOutcome::Cancelled, now)
            }
            Err(Interrupt::Failed(err)) => {
                self.handle_failure(&integration, &err).await;
                run.fail(&err, now)
            }
        };
        self.conclude(&integration, run).await
    }

    async fn execute(
        &self,
        integration: &Integration,
        request: &SyncRequest,
        token: &CancellationToken,
        run: &mut SyncRun,
    ) -> std::result::Result<(), Interrupt> {
        let ctx = SyncContext {
            integration,
            adapter: self.ports.adapters.adapter_for(integration).await.map_err(Interrupt::Failed)?,
            breaker: self.breakers.breaker(integration.id).await.map_err(Interrupt::Failed)?,
            token,
            retry: fetch_retry_config(integration).map_err(Interrupt::Failed)?,
        };

        let limit = self.config.batch_limit;
        let (cursor, window) = match &request.mode {
            SyncMode::Incremental => (integration.cursor.clone(), FetchWindow::open(limit)),
            SyncMode::Full => (None, FetchWindow::open(limit)),
            SyncMode::CustomRange { from, to } => (None, FetchWindow::between(*from, *to, limit)),
        };
        self.process_pages(&ctx, cursor, &window, CursorPolicy::for_mode(&request.mode), run)
            .await?;

        if token.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        self.sweep_stale(&ctx, run).await
    }

    async fn process_pages(
        &self,
        ctx: &SyncContext<'_>,
        mut cursor: Option<SyncCursor>,
        window: &FetchWindow,
        policy: CursorPolicy,
        run: &mut SyncRun,
    ) -> std::result::Result<(), Interrupt> {
        loop {
            if ctx.token.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }

            let page = self.fetch_page(ctx, cursor.as_ref(), window).await?;
            run.counts.pages = run.counts.pages.saturating_add(1);
            run.counts.fetched = run
                .counts
                .fetched
                .saturating_add(u32::try_from(page.transactions.len()).unwrap_or(u32::MAX));

            for txn in &page.transactions {
                self.reconcile_one(ctx.integration, txn)
                    .await
                    .map_err(Interrupt::Failed)?
                    .tally(&mut run.counts);
            }

            let Some(next) = page.next_cursor else {
                break;
            };
            self.commit_cursor(ctx.integration, &next, policy, run).await?;
            cursor = Some(next);
            if !page.has_more {
                break;
            }
        }
        Ok(())
    }

    async fn commit_cursor(
        &self,
        integration: &Integration,
        next: &SyncCursor,
        policy: CursorPolicy,
        run: &mut SyncRun,
    ) -> std::result::Result<(), Interrupt> {
        if policy == CursorPolicy::Hold {
            return Ok(());
        }
        if let Some(committed) = &run.cursor_after {
            if next.regresses_from(committed) {
                if policy == CursorPolicy::Strict {
                    return Err(Interrupt::Failed(LedgerLinkError::Fatal(format!(
                        "cursor regression: provider returned {} after committed {}",
                        next.watermark, committed.watermark
                    ))));
                }
                debug!(next = %next.watermark, committed = %committed.watermark, "page behind committed cursor");
                return Ok(());
            }
        }
        self.ports
            .integrations
            .update_cursor(integration.id, next, self.clock.now())
            .await
            .map_err(Interrupt::Failed)?;
        run.cursor_after = Some(next.clone());
        Ok(())
    }

    /// Fetch one page, retrying transient failures per the integration policy
    async fn fetch_page(
        &self,
        ctx: &SyncContext<'_>,
        cursor: Option<&SyncCursor>,
        window: &FetchWindow,
    ) -> std::result::Result<FetchPage, Interrupt> {
        let max_backoff = ctx.integration.retry_policy.max_backoff();
        let policy = move |interrupt: &Interrupt, _attempt: u32| match interrupt {
            Interrupt::Failed(LedgerLinkError::RateLimited { retry_after_secs: Some(secs), .. }) => {
                RetryDecision::RetryAfter(Duration::from_secs(*secs).min(max_backoff))
            }
            Interrupt::Failed(err) if err.is_retryable() => RetryDecision::Retry,
            _ => RetryDecision::Stop,
        };

        retry_with_policy(ctx.retry.clone(), policy, || self.guarded_fetch(ctx, cursor, window))
            .await
            .map_err(|err| {
                err.into_last_error().unwrap_or_else(|| {
                    Interrupt::Failed(LedgerLinkError::Internal(
                        "fetch retry ended without an error".into(),
                    ))
                })
            })
    }

    /// One provider call under breaker, timeout and cancellation
    async fn guarded_fetch(
        &self,
        ctx: &SyncContext<'_>,
        cursor: Option<&SyncCursor>,
        window: &FetchWindow,
    ) -> std::result::Result<FetchPage, Interrupt> {
        let integration = ctx.integration;
        let permit = ctx.breaker.try_acquire();
        if let CallPermit::Rejected { retry_at } = permit {
            return Err(Interrupt::BreakerOpen(retry_at));
        }
        let probe = matches!(permit, CallPermit::Probe);

        let timeout = self.config.provider_timeout();
        let started = Instant::now();
        let result = tokio::select! {
            () = ctx.token.cancelled() => {
                if probe {
                    ctx.breaker.release_probe();
                }
                return Err(Interrupt::Cancelled);
            }
            fetched = tokio::time::timeout(timeout, ctx.adapter.fetch_transactions(cursor, window)) => {
                fetched.unwrap_or_else(|_| {
                    Err(LedgerLinkError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)))
                })
            }
        };
        self.ports.metrics.observe_provider_call(integration.provider, started.elapsed(), result.is_ok());

        let transition = match &result {
            Ok(_) => ctx.breaker.record_success(),
            Err(err) if err.feeds_breaker() => ctx.breaker.record_failure(),
            Err(_) => {
                if probe {
                    ctx.breaker.release_probe();
                }
                None
            }
        };
        if let Some(transition) = transition {
            info!(from = %transition.from, to = %transition.to, "breaker transition");
            if transition.to == CircuitState::Open {
                let detail = format!("provider calls failing; breaker opened at {}", transition.at);
                self.alerts.raise_quietly(integration.id, AlertKind::BreakerOpen, &detail).await;
            }
        }
        self.ports
            .metrics
            .set_breaker_state(integration.id, to_domain_state(ctx.breaker.state()));
        self.breakers.persist_quietly(integration.id).await;

        result.map_err(Interrupt::Failed)
    }

    /// Re-check pending records past the staleness threshold
    ///
    /// One fetch covers every due record; records still unmatched afterwards
    /// burn an attempt. Provider unavailability postpones the sweep without
    /// burning attempts.
    async fn sweep_stale(
        &self,
        ctx: &SyncContext<'_>,
        run: &mut SyncRun,
    ) -> std::result::Result<(), Interrupt> {
        let integration = ctx.integration;
        let now = self.clock.now();
        let due = self
            .ports
            .transactions
            .due_for_retry(
                integration.id,
                now - self.config.staleness_threshold(),
                now,
                self.config.batch_limit,
            )
            .await
            .map_err(Interrupt::Failed)?;

        let earliest = due.iter().map(|record| record.created_at).min();
        let latest = due.iter().map(|record| record.created_at).max();
        let (Some(earliest), Some(latest)) = (earliest, latest) else {
            return Ok(());
        };

        let margin = self.config.match_window();
        let window = FetchWindow::between(earliest - margin, latest + margin, self.config.batch_limit);
        match self.process_pages(ctx, None, &window, CursorPolicy::Hold, run).await {
            Ok(()) => {}
            Err(Interrupt::BreakerOpen(retry_at)) => {
                warn!(%retry_at, due = due.len(), "breaker open; staleness sweep postponed");
                return Ok(());
            }
            Err(Interrupt::Failed(err)) if err.is_retryable() => {
                warn!(error = %err, due = due.len(), "provider unavailable; staleness sweep postponed");
                return Ok(());
            }
            Err(other) => return Err(other),
        }

        for record in &due {
            self.age_record(integration, record.id, run).await.map_err(Interrupt::Failed)?;
        }
        Ok(())
    }

    /// Burn one attempt of a still-pending record
    async fn age_record(&self, integration: &Integration, record_id: Uuid, run: &mut SyncRun) -> Result<()> {
        let Some(record) = self.ports.transactions.get(record_id).await? else {
            return Ok(());
        };
        if !record.is_pending() {
            return Ok(());
        }

        let policy = &integration.retry_policy;
        let attempts = record.attempts.saturating_add(1);
        let now = self.clock.now();

        if attempts >= policy.max_attempts {
            let update = RecordUpdate::MarkFailed { reason: FailureReason::Stale, provider_txn_id: None };
            if self.ports.transactions.compare_and_set(record.id, VerificationState::Pending, &update, now).await? {
                run.counts.stale_failed = run.counts.stale_failed.saturating_add(1);
                self.ports.metrics.record_classification(integration.provider, "stale_failed");
                warn!(%record_id, attempts, "expected transaction failed: no provider match");
                let detail = format!("record {record_id} unmatched after {attempts} attempts");
                self.alerts
                    .raise_quietly(integration.id, AlertKind::ReconciliationFailures, &detail)
                    .await;
            }
        } else {
            let backoff = chrono::Duration::from_std(policy.backoff_after(attempts))
                .unwrap_or_else(|_| self.config.staleness_threshold());
            let next_attempt_at = now.checked_add_signed(backoff).unwrap_or(now);
            let update = RecordUpdate::ScheduleRetry { attempts, next_attempt_at };
            if self.ports.transactions.compare_and_set(record.id, VerificationState::Pending, &update, now).await? {
                run.counts.stale_retried = run.counts.stale_retried.saturating_add(1);
                self.ports.metrics.record_classification(integration.provider, "stale_retry");
                debug!(%record_id, attempts, %next_attempt_at, "stale record scheduled for retry");
            }
        }
        Ok(())
    }

    async fn reconcile_one(
        &self,
        integration: &Integration,
        txn: &ProviderTransaction,
    ) -> Result<Classification> {
        let classification = self.classify(integration, txn).await?;
        self.ports.metrics.record_classification(integration.provider, classification.label());
        Ok(classification)
    }

    async fn classify(
        &self,
        integration: &Integration,
        txn: &ProviderTransaction,
    ) -> Result<Classification> {
        let Some(_claim) = self.claims.claim(integration.id, &txn.provider_txn_id) else {
            debug!(provider_txn_id = %txn.provider_txn_id, "transaction claimed by a concurrent path");
            return Ok(Classification::Duplicate);
        };

        // Unexpected rows are re-evaluated so a late record can still match.
        let previous = self.ports.ledger.find(integration.id, &txn.provider_txn_id).await?;
        if previous.as_ref().is_some_and(|entry| entry.outcome != LedgerOutcome::Unexpected) {
            return Ok(Classification::Duplicate);
        }
        if self
            .ports
            .transactions
            .find_by_provider_txn(integration.id, &txn.provider_txn_id)
            .await?
            .is_some()
        {
            return Ok(Classification::Duplicate);
        }

        let criteria = MatchCriteria::from(&self.config);
        let mut excluded: Vec<Uuid> = Vec::new();
        loop {
            let decision = self.decide(integration, txn, &criteria, &excluded).await?;
            let (record_id, update, outcome, classification, candidates) = match decision {
                MatchDecision::Unexpected => {
                    if previous.is_some() {
                        return Ok(Classification::Duplicate);
                    }
                    warn!(
                        provider_txn_id = %txn.provider_txn_id,
                        amount_minor = txn.amount_minor,
                        currency = %txn.currency,
                        "provider transaction has no expected record"
                    );
                    let entry = ProviderLedgerEntry::new(
                        integration.id,
                        txn,
                        LedgerOutcome::Unexpected,
                        None,
                        Vec::new(),
                        self.clock.now(),
                    );
                    self.ports.ledger.upsert(&entry).await?;
                    return Ok(Classification::Unexpected);
                }
                MatchDecision::Matched { record_id, candidates } => {
                    let (outcome, classification) = if candidates.is_empty() {
                        (LedgerOutcome::Matched, Classification::Matched)
                    } else {
                        (LedgerOutcome::Ambiguous, Classification::Ambiguous)
                    };
                    let update = RecordUpdate::MarkSynced { provider_txn_id: txn.provider_txn_id.clone() };
                    (record_id, update, outcome, classification, candidates)
                }
                MatchDecision::AmountMismatch { record_id } => {
                    let update = RecordUpdate::MarkFailed {
                        reason: FailureReason::AmountMismatch,
                        provider_txn_id: Some(txn.provider_txn_id.clone()),
                    };
                    (record_id, update, LedgerOutcome::AmountMismatch, Classification::AmountMismatch, Vec::new())
                }
            };

            let now = self.clock.now();
            if !self
                .ports
                .transactions
                .compare_and_set(record_id, VerificationState::Pending, &update, now)
                .await?
            {
                debug!(%record_id, "record classified concurrently; rematching");
                excluded.push(record_id);
                continue;
            }

            let entry =
                ProviderLedgerEntry::new(integration.id, txn, outcome, Some(record_id), candidates, now);
            self.ports.ledger.upsert(&entry).await?;

            match classification {
                Classification::Ambiguous => warn!(
                    %record_id,
                    provider_txn_id = %txn.provider_txn_id,
                    candidates = ?entry.candidate_ids,
                    "ambiguous match resolved by closest timestamp"
                ),
                Classification::AmountMismatch => {
                    warn!(
                        %record_id,
                        provider_txn_id = %txn.provider_txn_id,
                        provider_amount_minor = txn.amount_minor,
                        "amount mismatch"
                    );
                    let detail = format!(
                        "record {record_id} disagrees with provider transaction {} on amount",
                        txn.provider_txn_id
                    );
                    self.alerts
                        .raise_quietly(integration.id, AlertKind::ReconciliationFailures, &detail)
                        .await;
                }
                _ => debug!(%record_id, provider_txn_id = %txn.provider_txn_id, "transaction matched"),
            }
            return Ok(classification);
        }
    }

    async fn decide(
        &self,
        integration: &Integration,
        txn: &ProviderTransaction,
        criteria: &MatchCriteria,
        excluded: &[Uuid],
    ) -> Result<MatchDecision> {
        if let Some(reference) = txn.referenced_record().filter(|id| !excluded.contains(id)) {
            if let Some(record) = self.ports.transactions.get(reference).await? {
                if let Some(decision) = judge_reference(txn, &record, criteria) {
                    return Ok(decision);
                }
            }
            debug!(%reference, "platform reference not usable; matching by window");
        }

        let mut candidates = self
            .ports
            .transactions
            .pending_candidates(
                integration.id,
                &txn.currency.to_ascii_uppercase(),
                txn.occurred_at - criteria.window,
                txn.occurred_at + criteria.window,
            )
            .await?;
        candidates.retain(|record| !excluded.contains(&record.id));
        Ok(select_candidate(txn, &candidates, criteria))
    }

    async fn handle_failure(&self, integration: &Integration, err: &LedgerLinkError) {
        let (status, kind) = match err.kind() {
            ErrorKind::Authentication => (IntegrationStatus::NeedsReauth, AlertKind::AuthenticationFailure),
            ErrorKind::Fatal => (IntegrationStatus::Halted, AlertKind::SyncHalted),
            other => {
                warn!(error = %err, kind = %other, "sync failed");
                return;
            }
        };

        error!(error = %err, status = %status, "sync stopped; operator action required");
        if let Err(persist_err) =
            self.ports.integrations.set_status(integration.id, status, self.clock.now()).await
        {
            warn!(error = %persist_err, "failed to persist integration status");
        }
        self.alerts.raise_quietly(integration.id, kind, &err.to_string()).await;
    }

    async fn conclude(&self, integration: &Integration, run: SyncRun) -> Result<SyncRun> {
        self.ports.metrics.record_sync_run(integration.provider, run.outcome);
        self.ports.sync_runs.record(&run).await?;
        Ok(run)
    }

    async fn load_integration(&self, id: Uuid) -> Result<Integration> {
        self.ports
            .integrations
            .get(id)
            .await?
            .ok_or_else(|| LedgerLinkError::not_found(format!("integration {id}")))
    }

    fn lock_for(&self, integration_id: Uuid) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(integration_id).or_default().value())
    }
}

/// Retry configuration for provider fetches of one integration
fn fetch_retry_config(integration: &Integration) -> Result<RetryConfig> {
    let policy = &integration.retry_policy;
    RetryConfig::builder()
        .max_attempts(policy.max_attempts)
        .exponential_backoff(policy.initial_backoff(), policy.multiplier, policy.max_backoff())
        .equal_jitter()
        .unlimited_time()
        .build()
        .map_err(|e| LedgerLinkError::Config(e.to_string()))
}
