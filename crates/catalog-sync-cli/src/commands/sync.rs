use anyhow::{Context, Result};
use catalog_sync::{
    DataSource, ProviderRegistry, SyncEngine, SyncNotifier, SyncSummary, VenueProvider,
};
use catalog_sync_store::CatalogStore;
use tracing::{error, info};

use crate::config::AppConfig;

/// What to sync, as given on the command line.
#[derive(Debug, Clone, Copy)]
pub struct SyncRequest<'a> {
    pub local_class: &'a str,
    pub venue_provider_id: Option<i64>,
    pub limit: Option<u64>,
    pub data_source: DataSource,
}

/// Tells the logs when a venue binding finishes syncing.
pub struct LoggingNotifier;

impl SyncNotifier for LoggingNotifier {
    fn venue_provider_synced(&self, venue_provider: &VenueProvider) {
        info!(
            venue_provider_id = venue_provider.id,
            venue_id = venue_provider.venue_id,
            "venue provider synced"
        );
    }
}

/// Run one sync and print its summary.
///
/// Failures are logged with their cause chain and swallowed: the command
/// exits successfully either way.
pub async fn run(
    store: &CatalogStore,
    registry: &ProviderRegistry,
    config: &AppConfig,
    request: SyncRequest<'_>,
) -> Result<()> {
    println!("Syncing {}...", request.local_class);

    match execute(store, registry, config, request).await {
        Ok(summary) => println!("Done: {summary}."),
        Err(e) => error!(
            provider = request.local_class,
            error = format!("{e:#}"),
            "sync failed"
        ),
    }

    Ok(())
}

pub async fn execute(
    store: &CatalogStore,
    registry: &ProviderRegistry,
    config: &AppConfig,
    request: SyncRequest<'_>,
) -> Result<SyncSummary> {
    let SyncRequest {
        local_class,
        venue_provider_id,
        limit,
        data_source,
    } = request;

    let mut job = registry
        .prepare_job(store, local_class, venue_provider_id, data_source)
        .await
        .with_context(|| format!("could not prepare a {local_class} sync"))?;

    let notifier = LoggingNotifier;
    let engine = SyncEngine::new(store)
        .with_notifier(&notifier)
        .with_chunk_max_size(config.chunk_max_size)
        .with_lookback_days(config.event_lookback_days);

    engine
        .update_objects(&mut job, limit)
        .await
        .with_context(|| format!("{local_class} sync did not complete"))
}
