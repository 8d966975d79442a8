use tracing::debug;

use crate::engine::SyncSummary;
use crate::entity::Entity;
use crate::ports::{StoreError, ThumbStore};
use crate::providable::CompositeKey;
use crate::provider::{LocalProvider, SourceError};

/// Errors raised while synchronizing one entity's thumbnails.
#[derive(Debug, thiserror::Error)]
pub enum ThumbError {
    #[error("thumbnail source error: {0}")]
    Source(#[from] SourceError),

    #[error("thumbnail storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Bring the stored thumbnails of `entity` up to date with the provider's.
///
/// An index is refreshed when its candidate date is strictly newer than the
/// stored one (or nothing is stored yet). Returns the new thumbnail count when
/// more indices are available than `entity.thumb_count` records.
pub async fn sync_thumbs(
    provider: &mut dyn LocalProvider,
    store: &dyn ThumbStore,
    key: &CompositeKey,
    entity: &Entity,
    summary: &mut SyncSummary,
) -> Result<Option<u32>, ThumbError> {
    let dates = provider.thumb_dates(entity);
    let mut available = 0usize;

    for (index, date) in dates.into_iter().enumerate() {
        let Some(date) = date else {
            continue;
        };
        summary.checked_thumbs += 1;

        let stored = store.thumb_date(key, index).await?;
        if stored.is_some_and(|stored| stored >= date) {
            available = available.max(index + 1);
            continue;
        }

        let bytes = provider
            .thumb_bytes(entity, index)
            .await?
            .filter(|bytes| !bytes.is_empty());
        let Some(bytes) = bytes else {
            debug!(%key, index, "no image bytes, skipping thumbnail");
            continue;
        };

        store.replace_thumb(key, index, &bytes, date).await?;
        if stored.is_some() {
            summary.updated_thumbs += 1;
        } else {
            summary.created_thumbs += 1;
        }
        available = available.max(index + 1);
    }

    let available = u32::try_from(available).unwrap_or(u32::MAX);
    Ok((available > entity.thumb_count).then_some(available))
}
