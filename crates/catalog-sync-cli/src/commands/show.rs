use anyhow::{Result, bail};
use catalog_sync::{EntityKind, EntityStore};
use catalog_sync_store::CatalogStore;

use super::format;

pub async fn run(store: &CatalogStore, kind: &str, external_id: &str) -> Result<()> {
    let Some(kind) = EntityKind::parse(kind) else {
        bail!("Unknown entity kind: {kind}");
    };

    let Some(entity) = store.find_by_external_id(kind, external_id).await? else {
        bail!("{kind} not found: {external_id}");
    };

    println!("Kind:          {}", entity.kind());
    println!("External ID:   {external_id}");
    if let Some(id) = entity.id {
        println!("ID:            {id}");
    }
    if let Some(provider_id) = entity.last_provider_id {
        println!("Last provider: {provider_id}");
    }
    if let Some(modified) = entity.last_modified_at_provider {
        println!("Modified at:   {}", format::format_date(modified));
    }
    if kind.supports_thumbs() {
        println!("Thumbs:        {}", entity.thumb_count);
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&entity.data)?);

    Ok(())
}
