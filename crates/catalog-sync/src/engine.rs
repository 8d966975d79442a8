use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::batch::InFlightBatch;
use crate::entity::{Entity, EntityKind, ValidationIssue};
use crate::event::LocalProviderEventKind;
use crate::ports::{
    EntityStore, EventLog, NoopNotifier, ProviderDirectory, StoreError, SyncNotifier, ThumbStore,
};
use crate::providable::{CompositeKey, ProvidableInfo};
use crate::provider::{
    FillContext, FillError, LocalProvider, ProviderRecord, Pull, ResumeToken, SourceError,
    VenueProvider, fill_entity,
};
use crate::thumbs::sync_thumbs;
use crate::Timestamp;

/// Staged entities that trigger a flush to storage.
pub const CHUNK_MAX_SIZE: usize = 1000;

/// How far back a `SyncPartEnd` checkpoint is still honoured.
pub const EVENT_LOOKBACK_DAYS: u32 = 25;

static NOOP_NOTIFIER: NoopNotifier = NoopNotifier;

/// Errors that end a sync run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("upstream source failed: {0}")]
    Source(#[from] SourceError),

    #[error("storage failed: {0}")]
    Storage(#[from] StoreError),

    #[error("no provider registered as {0:?}")]
    UnknownProvider(String),
}

/// Why a single item could not be created or updated.
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("validation failed: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),

    #[error(transparent)]
    Fill(#[from] FillError),

    #[error(transparent)]
    Persistence(#[from] StoreError),
}

impl ItemError {
    /// Class name recorded as the payload of the `SyncError` event.
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Fill(_) => "FillError",
            Self::Persistence(_) => "PersistenceError",
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Counters emitted at the end of every run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub checked: u64,
    pub created: u64,
    pub updated: u64,
    pub errored: u64,
    pub checked_thumbs: u64,
    pub created_thumbs: u64,
    pub updated_thumbs: u64,
    pub errored_thumbs: u64,
}

impl fmt::Display for SyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked {} / created {} / updated {} / errored {} objects, \
             checked {} / created {} / updated {} / errored {} thumbs",
            self.checked,
            self.created,
            self.updated,
            self.errored,
            self.checked_thumbs,
            self.created_thumbs,
            self.updated_thumbs,
            self.errored_thumbs,
        )
    }
}

/// A provider plugin together with the rows that gate and record its runs.
pub struct SyncJob {
    pub provider: ProviderRecord,
    pub venue_provider: Option<VenueProvider>,
    pub plugin: Box<dyn LocalProvider>,
}

impl SyncJob {
    pub fn new(provider: ProviderRecord, plugin: Box<dyn LocalProvider>) -> Self {
        Self {
            provider,
            venue_provider: None,
            plugin,
        }
    }

    pub fn for_venue(mut self, venue_provider: VenueProvider) -> Self {
        self.venue_provider = Some(venue_provider);
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum FlushOp {
    Insert,
    Update,
}

/// Per-invocation state. Never shared across runs.
#[derive(Default)]
struct RunState {
    batch: InFlightBatch,
    summary: SyncSummary,
}

/// The incremental sync control loop.
///
/// Pulls identity records from a provider, resolves them against the
/// in-flight batch and storage, decides create / update / skip from the
/// provider's watermark, and flushes staged entities in bulk.
pub struct SyncEngine<'a> {
    entities: &'a dyn EntityStore,
    events: &'a dyn EventLog,
    directory: &'a dyn ProviderDirectory,
    thumbs: &'a dyn ThumbStore,
    notifier: &'a dyn SyncNotifier,
    chunk_max_size: usize,
    lookback_days: u32,
}

impl<'a> SyncEngine<'a> {
    /// Build an engine over a backend that implements every storage port.
    pub fn new<S>(store: &'a S) -> Self
    where
        S: EntityStore + EventLog + ProviderDirectory + ThumbStore,
    {
        Self {
            entities: store,
            events: store,
            directory: store,
            thumbs: store,
            notifier: &NOOP_NOTIFIER,
            chunk_max_size: CHUNK_MAX_SIZE,
            lookback_days: EVENT_LOOKBACK_DAYS,
        }
    }

    pub fn with_notifier(mut self, notifier: &'a dyn SyncNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_chunk_max_size(mut self, chunk_max_size: usize) -> Self {
        self.chunk_max_size = chunk_max_size.max(1);
        self
    }

    pub fn with_lookback_days(mut self, lookback_days: u32) -> Self {
        self.lookback_days = lookback_days;
        self
    }

    /// Run one sync pass for `job`.
    ///
    /// Inactive providers and inactive venue bindings are a no-op. Per-item
    /// failures are counted and logged, never returned; only upstream source
    /// errors and event-log failures end the run early. `limit` bounds the
    /// number of upstream records checked.
    pub async fn update_objects(
        &self,
        job: &mut SyncJob,
        limit: Option<u64>,
    ) -> Result<SyncSummary, SyncError> {
        if let Some(venue_provider) = &job.venue_provider
            && !venue_provider.is_active
        {
            info!(
                venue_provider = venue_provider.id,
                "venue provider is inactive, skipping sync"
            );
            return Ok(SyncSummary::default());
        }

        if !job.provider.is_active {
            info!(provider = %job.provider.name, "provider is inactive, skipping sync");
            return Ok(SyncSummary::default());
        }

        let provider_id = job.provider.id;
        info!(provider = %job.provider.name, plugin = job.plugin.name(), "sync started");
        self.log(provider_id, LocalProviderEventKind::SyncStart, None)
            .await?;

        let resume = self
            .events
            .latest_event_of_kind(
                provider_id,
                LocalProviderEventKind::SyncPartEnd,
                self.lookback_days,
            )
            .await?
            .and_then(|event| event.payload)
            .map(ResumeToken::new);
        if let Some(token) = &resume {
            debug!(checkpoint = token.as_str(), "resuming from checkpoint");
        }
        if let Some(kind) = job.plugin.watermark_kind() {
            let latest = self.entities.latest_watermark(kind).await?;
            debug!(%kind, latest = ?latest, "handing latest watermark to provider");
            job.plugin.set_latest_watermark(latest);
        }
        job.plugin.start(resume.as_ref()).await?;

        let mut state = RunState::default();

        loop {
            if limit.is_some_and(|limit| state.summary.checked >= limit) {
                debug!(checked = state.summary.checked, "limit reached");
                break;
            }

            match job.plugin.next().await? {
                Pull::Exhausted => break,
                Pull::PartStart(label) => {
                    self.log(
                        provider_id,
                        LocalProviderEventKind::SyncPartStart,
                        Some(&label),
                    )
                    .await?;
                }
                Pull::PartEnd(checkpoint) => {
                    // The checkpoint is only worth recording once its data is stored.
                    self.flush(provider_id, &mut state).await?;
                    self.log(
                        provider_id,
                        LocalProviderEventKind::SyncPartEnd,
                        Some(&checkpoint),
                    )
                    .await?;
                }
                Pull::Batch(infos) => {
                    for info in &infos {
                        self.process_item(job.plugin.as_mut(), provider_id, info, &mut state)
                            .await?;
                        if state.batch.len() >= self.chunk_max_size {
                            self.flush(provider_id, &mut state).await?;
                        }
                    }
                    state.summary.checked += 1;
                }
            }
        }

        self.flush(provider_id, &mut state).await?;

        let deactivated = job.plugin.deactivated_identifiers();
        if !deactivated.is_empty() {
            debug!(
                count = deactivated.len(),
                "provider reported deactivated identifiers; leaving them untouched"
            );
        }

        let summary = state.summary;
        info!(
            provider = %job.provider.name,
            checked = summary.checked,
            created = summary.created,
            updated = summary.updated,
            errored = summary.errored,
            checked_thumbs = summary.checked_thumbs,
            created_thumbs = summary.created_thumbs,
            updated_thumbs = summary.updated_thumbs,
            errored_thumbs = summary.errored_thumbs,
            "sync ended"
        );
        self.log(provider_id, LocalProviderEventKind::SyncEnd, None)
            .await?;

        if let Some(venue_provider) = &mut job.venue_provider {
            venue_provider.last_sync_date = Some(Utc::now());
            venue_provider.sync_worker_id = None;
            self.directory.save_venue_provider(venue_provider).await?;
            self.notifier.venue_provider_synced(venue_provider);
        }

        Ok(summary)
    }

    /// The entity an identity record refers to: staged this run, or stored.
    pub async fn resolve_existing(
        &self,
        info: &ProvidableInfo,
        staged: &InFlightBatch,
    ) -> Result<Option<Entity>, StoreError> {
        if let Some(entity) = staged.resolve(info) {
            return Ok(Some(entity.clone()));
        }

        let found = self
            .entities
            .find_by_external_id(info.kind(), info.external_id())
            .await?;
        Ok(found.filter(|entity| entity.kind() == info.kind()))
    }

    async fn process_item(
        &self,
        plugin: &mut dyn LocalProvider,
        provider_id: i64,
        info: &ProvidableInfo,
        state: &mut RunState,
    ) -> Result<(), SyncError> {
        let key = info.key();

        let existing = match self.resolve_existing(info, &state.batch).await {
            Ok(existing) => existing,
            Err(e) => {
                return self
                    .record_item_error(provider_id, &key, ItemError::Persistence(e), state)
                    .await;
            }
        };

        match existing {
            None => {
                if !plugin.can_create() {
                    debug!(%key, "not creating/updating");
                    return Ok(());
                }
                let Some(modified_at) = info.upstream_modified_at() else {
                    debug!(%key, "no upstream timestamp, not creating");
                    return Ok(());
                };

                let mut entity = Entity::blank(info.kind(), info.external_id());
                let applied =
                    self.apply(&*plugin, &mut entity, info, provider_id, modified_at, state);
                if let Err(e) = applied {
                    return self.record_item_error(provider_id, &key, e, state).await;
                }

                self.handle_thumbs(plugin, provider_id, &key, &mut entity, state)
                    .await?;
                state.batch.stage_insert(key, entity);
                state.summary.created += 1;
            }
            Some(mut entity) => {
                let last_sync = entity.last_sync_timestamp(provider_id);
                let modified_at = info
                    .upstream_modified_at()
                    .filter(|&modified_at| last_sync.is_none_or(|last| last < modified_at));

                match modified_at {
                    Some(modified_at) => {
                        let applied = self.apply(
                            &*plugin,
                            &mut entity,
                            info,
                            provider_id,
                            modified_at,
                            state,
                        );
                        if let Err(e) = applied {
                            return self.record_item_error(provider_id, &key, e, state).await;
                        }

                        self.handle_thumbs(plugin, provider_id, &key, &mut entity, state)
                            .await?;
                        state.batch.stage_update(key, entity);
                        state.summary.updated += 1;
                    }
                    None => {
                        debug!(%key, "up to date");
                        let thumbs_grew = self
                            .handle_thumbs(plugin, provider_id, &key, &mut entity, state)
                            .await?;
                        if thumbs_grew {
                            state.batch.stage_update(key, entity);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Fill, stamp with the provider watermark, then validate.
    fn apply(
        &self,
        plugin: &dyn LocalProvider,
        entity: &mut Entity,
        info: &ProvidableInfo,
        provider_id: i64,
        modified_at: Timestamp,
        state: &RunState,
    ) -> Result<(), ItemError> {
        let ctx = FillContext::new(info, &state.batch);
        fill_entity(plugin, entity, &ctx)?;

        entity.last_provider_id = Some(provider_id);
        entity.last_modified_at_provider = Some(modified_at);

        let issues = entity.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ItemError::Validation(issues))
        }
    }

    /// Returns whether the entity's thumbnail count grew.
    async fn handle_thumbs(
        &self,
        plugin: &mut dyn LocalProvider,
        provider_id: i64,
        key: &CompositeKey,
        entity: &mut Entity,
        state: &mut RunState,
    ) -> Result<bool, SyncError> {
        if !entity.kind().supports_thumbs() {
            return Ok(false);
        }

        match sync_thumbs(plugin, self.thumbs, key, entity, &mut state.summary).await {
            Ok(Some(count)) => {
                entity.thumb_count = count;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                warn!(%key, error = %e, "thumbnail sync failed");
                state.summary.errored_thumbs += 1;
                self.log(provider_id, LocalProviderEventKind::SyncError, Some("ThumbError"))
                    .await?;
                Ok(false)
            }
        }
    }

    async fn record_item_error(
        &self,
        provider_id: i64,
        key: &CompositeKey,
        error: ItemError,
        state: &mut RunState,
    ) -> Result<(), SyncError> {
        warn!(%key, error = %error, "skipping item");
        state.summary.errored += 1;
        self.log(
            provider_id,
            LocalProviderEventKind::SyncError,
            Some(error.class_name()),
        )
        .await
    }

    async fn flush(&self, provider_id: i64, state: &mut RunState) -> Result<(), SyncError> {
        if state.batch.is_empty() {
            return Ok(());
        }

        let (inserts, updates) = state.batch.drain();
        debug!(
            inserts = inserts.len(),
            updates = updates.len(),
            "flushing staged entities"
        );

        for group in group_by_kind(inserts) {
            self.flush_group(provider_id, FlushOp::Insert, group, state)
                .await?;
        }
        for group in group_by_kind(updates) {
            self.flush_group(provider_id, FlushOp::Update, group, state)
                .await?;
        }

        Ok(())
    }

    /// Write one homogeneous group. When the bulk call fails, each entity is
    /// retried alone and only the ones that still fail count as errored.
    async fn flush_group(
        &self,
        provider_id: i64,
        op: FlushOp,
        group: Vec<Entity>,
        state: &mut RunState,
    ) -> Result<(), SyncError> {
        let Err(e) = self.write(op, &group).await else {
            return Ok(());
        };
        warn!(
            error = %e,
            entities = group.len(),
            "bulk write failed, retrying one by one"
        );

        for entity in &group {
            let Err(e) = self.write(op, std::slice::from_ref(entity)).await else {
                continue;
            };

            match op {
                FlushOp::Insert => {
                    state.summary.created = state.summary.created.saturating_sub(1)
                }
                FlushOp::Update => {
                    state.summary.updated = state.summary.updated.saturating_sub(1)
                }
            }

            let key = entity
                .key()
                .unwrap_or_else(|| CompositeKey::new("?", entity.kind()));
            self.record_item_error(provider_id, &key, ItemError::Persistence(e), state)
                .await?;
        }

        Ok(())
    }

    async fn write(&self, op: FlushOp, entities: &[Entity]) -> Result<(), StoreError> {
        match op {
            FlushOp::Insert => self.entities.bulk_insert(entities).await,
            FlushOp::Update => self.entities.bulk_update(entities).await,
        }
    }

    async fn log(
        &self,
        provider_id: i64,
        kind: LocalProviderEventKind,
        payload: Option<&str>,
    ) -> Result<(), SyncError> {
        self.events.log_event(provider_id, kind, payload).await?;
        Ok(())
    }
}

/// Split entities into per-kind groups, parents (products, venues) first.
fn group_by_kind(entities: Vec<Entity>) -> Vec<Vec<Entity>> {
    let mut groups: BTreeMap<EntityKind, Vec<Entity>> = BTreeMap::new();
    for entity in entities {
        groups.entry(entity.kind()).or_default().push(entity);
    }
    groups.into_values().collect()
}
