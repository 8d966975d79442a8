use anyhow::{Context, Result};
use catalog_sync::{EventLog, ProviderDirectory};
use catalog_sync_store::CatalogStore;

use super::format;

/// Print the provider's most recent events, newest first.
pub async fn run(store: &CatalogStore, local_class: &str, limit: usize) -> Result<()> {
    let provider = store
        .provider_by_class(local_class)
        .await?
        .with_context(|| format!("unknown provider: {local_class}"))?;

    let events = store.recent_events(provider.id, limit).await?;
    format::print_event_table(&events);
    Ok(())
}
