//! Storage-facing interfaces the sync engine is built against.
//!
//! The engine never reaches for a global session: every collaborator is one
//! of these traits, injected at construction.

use crate::entity::{Entity, EntityKind};
use crate::event::{LocalProviderEvent, LocalProviderEventKind};
use crate::providable::CompositeKey;
use crate::provider::{ProviderRecord, VenueProvider};
use crate::Timestamp;

/// Errors raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Lookup and bulk writes over synchronized entities.
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    /// The stored entity of `kind` whose external id is `external_id`.
    async fn find_by_external_id(
        &self,
        kind: EntityKind,
        external_id: &str,
    ) -> Result<Option<Entity>, StoreError>;

    /// Insert a batch of entities of one kind. All or nothing.
    async fn bulk_insert(&self, entities: &[Entity]) -> Result<(), StoreError>;

    /// Update a batch of entities of one kind, matched by kind and external id.
    /// All or nothing.
    async fn bulk_update(&self, entities: &[Entity]) -> Result<(), StoreError>;

    /// Newest provider watermark among stored entities of `kind`, whichever
    /// provider wrote it.
    async fn latest_watermark(&self, kind: EntityKind) -> Result<Option<Timestamp>, StoreError>;
}

/// Append-only provider event log.
#[async_trait::async_trait]
pub trait EventLog: Send + Sync {
    /// Append one event dated now. Committed on its own, independently of
    /// entity writes.
    async fn log_event(
        &self,
        provider_id: i64,
        kind: LocalProviderEventKind,
        payload: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Most recent event of `kind` for the provider within the last `within_days` days.
    async fn latest_event_of_kind(
        &self,
        provider_id: i64,
        kind: LocalProviderEventKind,
        within_days: u32,
    ) -> Result<Option<LocalProviderEvent>, StoreError>;

    /// The provider's most recent events, newest first.
    async fn recent_events(
        &self,
        provider_id: i64,
        limit: usize,
    ) -> Result<Vec<LocalProviderEvent>, StoreError>;
}

/// Registry of provider rows and venue bindings.
#[async_trait::async_trait]
pub trait ProviderDirectory: Send + Sync {
    async fn provider_by_class(
        &self,
        local_class: &str,
    ) -> Result<Option<ProviderRecord>, StoreError>;

    async fn venue_provider(&self, id: i64) -> Result<Option<VenueProvider>, StoreError>;

    async fn save_venue_provider(&self, venue_provider: &VenueProvider) -> Result<(), StoreError>;
}

/// Stored thumbnail images, addressed by entity identity and index.
///
/// Thumbnails are keyed by [`CompositeKey`] rather than storage id so that
/// entities still sitting in the in-flight batch can carry images.
#[async_trait::async_trait]
pub trait ThumbStore: Send + Sync {
    async fn thumb_date(
        &self,
        key: &CompositeKey,
        index: usize,
    ) -> Result<Option<Timestamp>, StoreError>;

    /// Drop whatever image sits at the slot and store `bytes` in its place.
    async fn replace_thumb(
        &self,
        key: &CompositeKey,
        index: usize,
        bytes: &[u8],
        date: Timestamp,
    ) -> Result<(), StoreError>;
}

/// Downstream consumers interested in venue provider state changes.
pub trait SyncNotifier: Send + Sync {
    fn venue_provider_synced(&self, venue_provider: &VenueProvider);
}

/// A notifier that tells no one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl SyncNotifier for NoopNotifier {
    fn venue_provider_synced(&self, _venue_provider: &VenueProvider) {}
}
