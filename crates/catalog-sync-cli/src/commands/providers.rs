use anyhow::{Context, Result};
use catalog_sync::ProviderDirectory;
use catalog_sync_store::CatalogStore;

use super::format;

/// List provider rows with their venue bindings.
pub fn list(store: &CatalogStore) -> Result<()> {
    let providers = store.list_providers()?;
    let venues = providers
        .iter()
        .map(|provider| store.venue_providers_of(provider.id))
        .collect::<Result<Vec<_>, _>>()?;

    format::print_provider_table(&providers, &venues);
    Ok(())
}

/// Create the provider row if needed and flip its active flag.
pub fn set_active(store: &CatalogStore, local_class: &str, is_active: bool) -> Result<()> {
    let provider = store
        .set_provider_active(local_class, is_active)
        .with_context(|| format!("failed to update provider {local_class}"))?;

    let state = if provider.is_active { "active" } else { "inactive" };
    println!("{} (id {}) is now {state}.", provider.local_class, provider.id);
    Ok(())
}

/// Bind an existing provider to a venue.
pub async fn add_venue_provider(
    store: &CatalogStore,
    local_class: &str,
    venue_id: i64,
    id_at_provider: &str,
) -> Result<()> {
    let provider = store
        .provider_by_class(local_class)
        .await?
        .with_context(|| {
            format!(
                "no provider row for {local_class}; run `catalog-sync activate {local_class}` first"
            )
        })?;

    let binding = store
        .add_venue_provider(provider.id, venue_id, id_at_provider)
        .with_context(|| format!("failed to bind {local_class} to venue {venue_id}"))?;

    println!("Added {}.", format::venue_line(&binding));
    Ok(())
}
