//! In-memory ports and a scripted provider for exercising the engine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};

use crate::entity::{BankInformation, Entity, EntityData, EntityKind, Offer, Product, Stock, Venue};
use crate::event::{LocalProviderEvent, LocalProviderEventKind};
use crate::ports::{EntityStore, EventLog, ProviderDirectory, StoreError, SyncNotifier, ThumbStore};
use crate::providable::{CompositeKey, ProvidableInfo};
use crate::provider::{
    FillContext, FillError, LocalProvider, ProviderRecord, Pull, ResumeToken, SourceError,
    VenueProvider,
};
use crate::Timestamp;

#[derive(Default)]
struct Inner {
    entities: Vec<Entity>,
    next_entity_id: i64,
    providers: Vec<ProviderRecord>,
    venue_providers: Vec<VenueProvider>,
    events: Vec<LocalProviderEvent>,
    thumbs: HashMap<(CompositeKey, usize), (Timestamp, Vec<u8>)>,
    reads: usize,
    insert_calls: Vec<usize>,
    update_calls: Vec<usize>,
    failing_external_ids: HashSet<String>,
    failing_thumbs: bool,
}

/// A storage backend implementing every port over plain collections.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&self, local_class: &str, is_active: bool) -> ProviderRecord {
        let mut inner = self.inner.lock().unwrap();
        let provider = ProviderRecord {
            id: inner.providers.len() as i64 + 1,
            name: local_class.to_owned(),
            local_class: local_class.to_owned(),
            is_active,
            api_key: None,
        };
        inner.providers.push(provider.clone());
        provider
    }

    pub fn add_venue_provider(
        &self,
        provider_id: i64,
        venue_id: i64,
        venue_id_at_offer_provider: &str,
        is_active: bool,
    ) -> VenueProvider {
        let mut inner = self.inner.lock().unwrap();
        let venue_provider = VenueProvider {
            id: inner.venue_providers.len() as i64 + 1,
            provider_id,
            venue_id,
            venue_id_at_offer_provider: venue_id_at_offer_provider.to_owned(),
            last_sync_date: None,
            is_active,
            sync_worker_id: Some("worker-1".to_owned()),
        };
        inner.venue_providers.push(venue_provider.clone());
        venue_provider
    }

    /// Store an entity as if written earlier, assigning it an id.
    pub fn seed(&self, mut entity: Entity) -> Entity {
        let mut inner = self.inner.lock().unwrap();
        inner.next_entity_id += 1;
        entity.id = Some(inner.next_entity_id);
        inner.entities.push(entity.clone());
        entity
    }

    pub fn seed_event(
        &self,
        provider_id: i64,
        kind: LocalProviderEventKind,
        payload: Option<&str>,
        date: Timestamp,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.events.len() as i64 + 1;
        inner.events.push(LocalProviderEvent {
            id,
            provider_id,
            kind,
            date,
            payload: payload.map(str::to_owned),
        });
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.inner.lock().unwrap().entities.clone()
    }

    pub fn entity(&self, kind: EntityKind, external_id: &str) -> Option<Entity> {
        self.inner
            .lock()
            .unwrap()
            .entities
            .iter()
            .find(|e| e.kind() == kind && e.external_id.as_deref() == Some(external_id))
            .cloned()
    }

    pub fn events(&self) -> Vec<LocalProviderEvent> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn event_kinds(&self) -> Vec<LocalProviderEventKind> {
        self.events().iter().map(|e| e.kind).collect()
    }

    pub fn venue_providers(&self) -> Vec<VenueProvider> {
        self.inner.lock().unwrap().venue_providers.clone()
    }

    pub fn thumb(&self, key: &CompositeKey, index: usize) -> Option<(Timestamp, Vec<u8>)> {
        self.inner
            .lock()
            .unwrap()
            .thumbs
            .get(&(key.clone(), index))
            .cloned()
    }

    /// Number of `find_by_external_id` calls served.
    pub fn reads(&self) -> usize {
        self.inner.lock().unwrap().reads
    }

    /// Sizes of every `bulk_insert` call, in order.
    pub fn insert_calls(&self) -> Vec<usize> {
        self.inner.lock().unwrap().insert_calls.clone()
    }

    /// Sizes of every `bulk_update` call, in order.
    pub fn update_calls(&self) -> Vec<usize> {
        self.inner.lock().unwrap().update_calls.clone()
    }

    /// Make any bulk write containing this external id fail.
    pub fn fail_writes_for(&self, external_id: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing_external_ids
            .insert(external_id.to_owned());
    }

    pub fn fail_thumb_writes(&self) {
        self.inner.lock().unwrap().failing_thumbs = true;
    }

    fn check_failing(inner: &Inner, entities: &[Entity]) -> Result<(), StoreError> {
        let failing = entities.iter().find(|e| {
            e.external_id
                .as_ref()
                .is_some_and(|id| inner.failing_external_ids.contains(id))
        });
        match failing {
            Some(e) => Err(StoreError::Database(format!(
                "constraint violated by {:?}",
                e.external_id
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl EntityStore for InMemoryStore {
    async fn find_by_external_id(
        &self,
        kind: EntityKind,
        external_id: &str,
    ) -> Result<Option<Entity>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.reads += 1;
        Ok(inner
            .entities
            .iter()
            .find(|e| e.kind() == kind && e.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn bulk_insert(&self, entities: &[Entity]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.insert_calls.push(entities.len());
        Self::check_failing(&inner, entities)?;

        for entity in entities {
            let duplicate = inner
                .entities
                .iter()
                .any(|e| e.kind() == entity.kind() && e.external_id == entity.external_id);
            if duplicate {
                return Err(StoreError::Database(format!(
                    "duplicate {} {:?}",
                    entity.kind(),
                    entity.external_id
                )));
            }
        }

        for entity in entities {
            inner.next_entity_id += 1;
            let mut stored = entity.clone();
            stored.id = Some(inner.next_entity_id);
            inner.entities.push(stored);
        }
        Ok(())
    }

    async fn bulk_update(&self, entities: &[Entity]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.update_calls.push(entities.len());
        Self::check_failing(&inner, entities)?;

        for entity in entities {
            let slot = inner
                .entities
                .iter_mut()
                .find(|e| e.kind() == entity.kind() && e.external_id == entity.external_id)
                .ok_or_else(|| StoreError::NotFound(format!("{:?}", entity.external_id)))?;
            let id = slot.id;
            *slot = entity.clone();
            slot.id = id;
        }
        Ok(())
    }

    async fn latest_watermark(&self, kind: EntityKind) -> Result<Option<Timestamp>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .entities
            .iter()
            .filter(|e| e.kind() == kind)
            .filter_map(|e| e.last_modified_at_provider)
            .max())
    }
}

#[async_trait::async_trait]
impl EventLog for InMemoryStore {
    async fn log_event(
        &self,
        provider_id: i64,
        kind: LocalProviderEventKind,
        payload: Option<&str>,
    ) -> Result<(), StoreError> {
        self.seed_event(provider_id, kind, payload, Utc::now());
        Ok(())
    }

    async fn latest_event_of_kind(
        &self,
        provider_id: i64,
        kind: LocalProviderEventKind,
        within_days: u32,
    ) -> Result<Option<LocalProviderEvent>, StoreError> {
        let since = Utc::now() - Duration::days(i64::from(within_days));
        Ok(self
            .inner
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| e.provider_id == provider_id && e.kind == kind && e.date >= since)
            .max_by_key(|e| (e.date, e.id))
            .cloned())
    }

    async fn recent_events(
        &self,
        provider_id: i64,
        limit: usize,
    ) -> Result<Vec<LocalProviderEvent>, StoreError> {
        let mut events: Vec<_> = self
            .events()
            .into_iter()
            .filter(|e| e.provider_id == provider_id)
            .collect();
        events.sort_by_key(|e| std::cmp::Reverse((e.date, e.id)));
        events.truncate(limit);
        Ok(events)
    }
}

#[async_trait::async_trait]
impl ProviderDirectory for InMemoryStore {
    async fn provider_by_class(
        &self,
        local_class: &str,
    ) -> Result<Option<ProviderRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .providers
            .iter()
            .find(|p| p.local_class == local_class)
            .cloned())
    }

    async fn venue_provider(&self, id: i64) -> Result<Option<VenueProvider>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .venue_providers
            .iter()
            .find(|vp| vp.id == id)
            .cloned())
    }

    async fn save_venue_provider(&self, venue_provider: &VenueProvider) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .venue_providers
            .iter_mut()
            .find(|vp| vp.id == venue_provider.id)
            .ok_or_else(|| StoreError::NotFound(format!("venue provider {}", venue_provider.id)))?;
        *slot = venue_provider.clone();
        Ok(())
    }
}

#[async_trait::async_trait]
impl ThumbStore for InMemoryStore {
    async fn thumb_date(
        &self,
        key: &CompositeKey,
        index: usize,
    ) -> Result<Option<Timestamp>, StoreError> {
        Ok(self.thumb(key, index).map(|(date, _)| date))
    }

    async fn replace_thumb(
        &self,
        key: &CompositeKey,
        index: usize,
        bytes: &[u8],
        date: Timestamp,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_thumbs {
            return Err(StoreError::Database("object storage unavailable".into()));
        }
        inner
            .thumbs
            .insert((key.clone(), index), (date, bytes.to_vec()));
        Ok(())
    }
}

/// Remembers every venue provider it was told about.
#[derive(Default)]
pub struct RecordingNotifier {
    synced: Mutex<Vec<VenueProvider>>,
}

impl RecordingNotifier {
    pub fn synced(&self) -> Vec<VenueProvider> {
        self.synced.lock().unwrap().clone()
    }
}

impl SyncNotifier for RecordingNotifier {
    fn venue_provider_synced(&self, venue_provider: &VenueProvider) {
        self.synced.lock().unwrap().push(venue_provider.clone());
    }
}

/// What a [`ScriptedProvider`] saw while the engine drove it.
#[derive(Debug, Default, Clone)]
pub struct Observations {
    pub resumed_with: Option<String>,
    /// Set when the engine handed over a stored watermark.
    pub latest_watermark: Option<Option<Timestamp>>,
    /// `(offer external id, found staged)` for every stock fill.
    pub staged_offer_lookups: Vec<(String, bool)>,
    pub pulls: usize,
}

type ThumbScript = Vec<(Option<Timestamp>, Option<Vec<u8>>)>;

/// A provider replaying a fixed sequence of pulls.
///
/// Fill callbacks copy the fields registered with [`with_record`](Self::with_record)
/// for the entity's kind and external id.
pub struct ScriptedProvider {
    name: String,
    steps: VecDeque<Result<Pull, String>>,
    records: HashMap<(EntityKind, String), EntityData>,
    thumbs: HashMap<String, ThumbScript>,
    can_create: bool,
    deactivated: Vec<String>,
    watermark_kind: Option<EntityKind>,
    observations: Arc<Mutex<Observations>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Pull>) -> Self {
        Self {
            name: "Scripted".to_owned(),
            steps: steps.into_iter().map(Ok).collect(),
            records: HashMap::new(),
            thumbs: HashMap::new(),
            can_create: true,
            deactivated: Vec::new(),
            watermark_kind: None,
            observations: Arc::default(),
        }
    }

    /// One pull per batch, each followed by nothing else.
    pub fn batches(batches: Vec<Vec<ProvidableInfo>>) -> Self {
        Self::new(batches.into_iter().map(Pull::Batch).collect())
    }

    pub fn with_record(mut self, external_id: &str, data: EntityData) -> Self {
        self.records
            .insert((data.kind(), external_id.to_owned()), data);
        self
    }

    pub fn with_thumbs(mut self, external_id: &str, thumbs: ThumbScript) -> Self {
        self.thumbs.insert(external_id.to_owned(), thumbs);
        self
    }

    pub fn without_create(mut self) -> Self {
        self.can_create = false;
        self
    }

    pub fn with_deactivated(mut self, external_ids: Vec<String>) -> Self {
        self.deactivated = external_ids;
        self
    }

    /// Ask the engine for the newest stored watermark of `kind` before starting.
    pub fn with_watermark_kind(mut self, kind: EntityKind) -> Self {
        self.watermark_kind = Some(kind);
        self
    }

    /// Fail with an upstream error after the scripted pulls so far.
    pub fn then_fail(mut self, message: &str) -> Self {
        self.steps.push_back(Err(message.to_owned()));
        self
    }

    pub fn observations(&self) -> Arc<Mutex<Observations>> {
        Arc::clone(&self.observations)
    }

    fn record(&self, kind: EntityKind, ctx: &FillContext<'_>) -> Result<&EntityData, FillError> {
        self.records
            .get(&(kind, ctx.external_id().to_owned()))
            .ok_or_else(|| FillError::MissingField(format!("{kind} {}", ctx.external_id())))
    }
}

#[async_trait::async_trait]
impl LocalProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_create(&self) -> bool {
        self.can_create
    }

    fn watermark_kind(&self) -> Option<EntityKind> {
        self.watermark_kind
    }

    fn set_latest_watermark(&mut self, latest: Option<Timestamp>) {
        self.observations.lock().unwrap().latest_watermark = Some(latest);
    }

    async fn start(&mut self, resume: Option<&ResumeToken>) -> Result<(), SourceError> {
        self.observations.lock().unwrap().resumed_with = resume.map(|t| t.as_str().to_owned());
        Ok(())
    }

    async fn next(&mut self) -> Result<Pull, SourceError> {
        self.observations.lock().unwrap().pulls += 1;
        match self.steps.pop_front() {
            Some(Ok(pull)) => Ok(pull),
            Some(Err(message)) => Err(SourceError::Network(message)),
            None => Ok(Pull::Exhausted),
        }
    }

    fn fill_product(&self, product: &mut Product, ctx: &FillContext<'_>) -> Result<(), FillError> {
        match self.record(EntityKind::Product, ctx)? {
            EntityData::Product(p) => *product = p.clone(),
            _ => return Err(FillError::Unsupported(EntityKind::Product)),
        }
        Ok(())
    }

    fn fill_venue(&self, venue: &mut Venue, ctx: &FillContext<'_>) -> Result<(), FillError> {
        match self.record(EntityKind::Venue, ctx)? {
            EntityData::Venue(v) => *venue = v.clone(),
            _ => return Err(FillError::Unsupported(EntityKind::Venue)),
        }
        Ok(())
    }

    fn fill_offer(&self, offer: &mut Offer, ctx: &FillContext<'_>) -> Result<(), FillError> {
        match self.record(EntityKind::Offer, ctx)? {
            EntityData::Offer(o) => *offer = o.clone(),
            _ => return Err(FillError::Unsupported(EntityKind::Offer)),
        }
        Ok(())
    }

    fn fill_stock(&self, stock: &mut Stock, ctx: &FillContext<'_>) -> Result<(), FillError> {
        let EntityData::Stock(s) = self.record(EntityKind::Stock, ctx)? else {
            return Err(FillError::Unsupported(EntityKind::Stock));
        };
        let found = ctx.staged(EntityKind::Offer, &s.offer_external_id).is_some();
        self.observations
            .lock()
            .unwrap()
            .staged_offer_lookups
            .push((s.offer_external_id.clone(), found));
        *stock = s.clone();
        Ok(())
    }

    fn fill_bank_information(
        &self,
        info: &mut BankInformation,
        ctx: &FillContext<'_>,
    ) -> Result<(), FillError> {
        match self.record(EntityKind::BankInformation, ctx)? {
            EntityData::BankInformation(b) => *info = b.clone(),
            _ => return Err(FillError::Unsupported(EntityKind::BankInformation)),
        }
        Ok(())
    }

    fn thumb_dates(&self, entity: &Entity) -> Vec<Option<Timestamp>> {
        entity
            .external_id
            .as_ref()
            .and_then(|id| self.thumbs.get(id))
            .map(|thumbs| thumbs.iter().map(|(date, _)| *date).collect())
            .unwrap_or_default()
    }

    async fn thumb_bytes(
        &mut self,
        entity: &Entity,
        index: usize,
    ) -> Result<Option<Vec<u8>>, SourceError> {
        Ok(entity
            .external_id
            .as_ref()
            .and_then(|id| self.thumbs.get(id))
            .and_then(|thumbs| thumbs.get(index))
            .and_then(|(_, bytes)| bytes.clone()))
    }

    fn deactivated_identifiers(&self) -> Vec<String> {
        self.deactivated.clone()
    }
}
