//! Port interface for persisting circuit breaker state

use async_trait::async_trait;
use ledgerlink_common::BreakerSnapshot;
use ledgerlink_domain::Result;
use uuid::Uuid;

/// Stores the latest breaker snapshot per integration
#[async_trait]
pub trait BreakerStateRepository: Send + Sync {
    async fn load(&self, integration_id: Uuid) -> Result<Option<BreakerSnapshot>>;

    async fn save(&self, integration_id: Uuid, snapshot: &BreakerSnapshot) -> Result<()>;
}
