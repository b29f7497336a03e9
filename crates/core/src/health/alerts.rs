//! Idempotent alert lifecycle

use std::sync::Arc;

use ledgerlink_domain::{Alert, AlertKind, Result};
use tracing::{info, warn};
use uuid::Uuid;

use super::ports::AlertRepository;
use crate::SharedClock;

/// Kinds opened and resolved by one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertChanges {
    pub opened: Vec<AlertKind>,
    pub resolved: Vec<AlertKind>,
}

/// Opens and closes alerts; never creates a second open alert of a kind
pub struct AlertManager {
    repository: Arc<dyn AlertRepository>,
    clock: SharedClock,
}

impl AlertManager {
    pub fn new(repository: Arc<dyn AlertRepository>, clock: SharedClock) -> Self {
        Self { repository, clock }
    }

    /// Open `kind` for the integration unless it is already open
    ///
    /// Returns whether a new alert was opened.
    pub async fn raise(&self, integration_id: Uuid, kind: AlertKind, detail: &str) -> Result<bool> {
        let alert = Alert::open(integration_id, kind, detail, self.clock.now());
        let opened = self.repository.open_if_absent(&alert).await?;
        if opened {
            warn!(%integration_id, kind = %kind, severity = %alert.severity, detail, "alert opened");
        }
        Ok(opened)
    }

    /// Raise, logging instead of failing the caller
    pub async fn raise_quietly(&self, integration_id: Uuid, kind: AlertKind, detail: &str) {
        if let Err(err) = self.raise(integration_id, kind, detail).await {
            warn!(%integration_id, kind = %kind, error = %err, "failed to raise alert");
        }
    }

    pub async fn resolve(&self, integration_id: Uuid, kind: AlertKind) -> Result<bool> {
        let resolved = self.repository.resolve(integration_id, kind, self.clock.now()).await?;
        if resolved {
            info!(%integration_id, kind = %kind, "alert resolved");
        }
        Ok(resolved)
    }

    /// Align open alerts with the conditions that currently hold
    ///
    /// Every active kind is opened if absent; every open kind missing from
    /// `active` is resolved.
    pub async fn reconcile(
        &self,
        integration_id: Uuid,
        active: &[(AlertKind, String)],
    ) -> Result<AlertChanges> {
        let mut changes = AlertChanges::default();

        for (kind, detail) in active {
            if self.raise(integration_id, *kind, detail).await? {
                changes.opened.push(*kind);
            }
        }

        for open in self.repository.open_for(integration_id).await? {
            if active.iter().any(|(kind, _)| *kind == open.kind) {
                continue;
            }
            if self.resolve(integration_id, open.kind).await? {
                changes.resolved.push(open.kind);
            }
        }

        Ok(changes)
    }

    pub async fn open_for(&self, integration_id: Uuid) -> Result<Vec<Alert>> {
        self.repository.open_for(integration_id).await
    }
}
