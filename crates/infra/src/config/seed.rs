//! Bootstrap integrations declared in configuration
//!
//! Seeds are inserted only when absent, so restarting with the same file is a
//! no-op and changes made through the API are not overwritten. A seed with an
//! `id` is matched by id; one without is matched by business, provider and
//! credential reference.

use chrono::{DateTime, Utc};
use ledgerlink_core::IntegrationRepository;
use ledgerlink_domain::{Integration, IntegrationSeed, Result, RetryPolicy};
use tracing::info;

/// Insert every seed that has no matching integration; returns how many were
/// inserted
pub async fn seed_integrations(
    repository: &dyn IntegrationRepository,
    seeds: &[IntegrationSeed],
    default_retry_policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Result<usize> {
    if seeds.is_empty() {
        return Ok(0);
    }

    let mut existing = repository.list().await?;
    let mut inserted = 0;
    for seed in seeds {
        let present = existing.iter().any(|integration| match seed.id {
            Some(id) => integration.id == id,
            None => {
                integration.business_id == seed.business_id
                    && integration.provider == seed.provider
                    && integration.credential_ref == seed.credential_ref
            }
        });
        if present {
            continue;
        }

        let integration = integration_from_seed(seed, default_retry_policy, now);
        repository.insert(&integration).await?;
        info!(
            integration_id = %integration.id,
            business_id = %integration.business_id,
            provider = %integration.provider,
            "seeded integration"
        );
        existing.push(integration);
        inserted += 1;
    }
    Ok(inserted)
}

fn integration_from_seed(
    seed: &IntegrationSeed,
    default_retry_policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Integration {
    let mut integration =
        Integration::new(seed.business_id.trim(), seed.provider, seed.credential_ref.trim(), now);
    if let Some(id) = seed.id {
        integration.id = id;
    }
    if let Some(interval) = seed.sync_interval_secs {
        integration.sync_interval_secs = interval;
    }
    integration.retry_policy = seed.retry_policy.clone().unwrap_or_else(|| default_retry_policy.clone());
    integration.enabled = seed.enabled;
    integration
}
