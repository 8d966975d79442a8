use crate::batch::InFlightBatch;
use crate::entity::{BankInformation, Entity, EntityData, EntityKind, Offer, Product, Stock, Venue};
use crate::providable::{IdentityError, ProvidableInfo};
use crate::Timestamp;

/// A registered external data source integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRecord {
    pub id: i64,
    pub name: String,
    /// Identifier of the plugin implementation, e.g. `"StockFeed"`.
    pub local_class: String,
    pub is_active: bool,
    pub api_key: Option<String>,
}

/// Binding of one provider to one venue, with venue-scoped sync state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueProvider {
    pub id: i64,
    pub provider_id: i64,
    pub venue_id: i64,
    /// How the upstream source identifies the venue (usually its SIRET).
    pub venue_id_at_offer_provider: String,
    pub last_sync_date: Option<Timestamp>,
    pub is_active: bool,
    /// Set by the job queue while a worker owns this binding.
    pub sync_worker_id: Option<String>,
}

/// Errors raised by a plugin while reading its upstream source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("{0}")]
    Other(String),
}

/// Errors raised while filling an entity from the current upstream record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FillError {
    #[error("provider does not produce {0} entities")]
    Unsupported(EntityKind),

    #[error("upstream record is missing {0}")]
    MissingField(String),

    #[error("invalid upstream value: {0}")]
    Invalid(String),
}

/// Opaque checkpoint handed back to a provider when a run starts.
///
/// The engine never interprets it; it is the payload of the provider's most
/// recent `SyncPartEnd` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeToken(String);

impl ResumeToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One step of a provider's upstream stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull {
    /// Identity records for one upstream record. May be empty.
    Batch(Vec<ProvidableInfo>),
    /// A discrete part (e.g. a file) begins.
    PartStart(String),
    /// A part has been fully yielded; the payload is its resumption checkpoint.
    PartEnd(String),
    /// Terminal state: nothing more to pull in this run.
    Exhausted,
}

/// The contract a provider plugin fulfils for the sync engine.
///
/// The engine pulls from [`next`](LocalProvider::next) until it returns
/// [`Pull::Exhausted`]; the `fill_*` callbacks read whatever upstream record
/// the provider is currently positioned on. Each provider only overrides the
/// fill methods for the kinds it produces.
#[async_trait::async_trait]
pub trait LocalProvider: Send + Sync {
    /// Implementation identifier, matching [`ProviderRecord::local_class`].
    fn name(&self) -> &str;

    /// Whether entities missing from storage may be created.
    fn can_create(&self) -> bool {
        true
    }

    /// Entity kind whose newest stored watermark the provider wants before
    /// starting, for sources queried by "updated since".
    fn watermark_kind(&self) -> Option<EntityKind> {
        None
    }

    /// Receives the newest stored watermark of [`watermark_kind`](Self::watermark_kind).
    /// Called before [`start`](Self::start), and only when that kind is set.
    fn set_latest_watermark(&mut self, _latest: Option<Timestamp>) {}

    /// Called once before the first pull with the last recorded checkpoint.
    async fn start(&mut self, _resume: Option<&ResumeToken>) -> Result<(), SourceError> {
        Ok(())
    }

    /// Advance the stream.
    async fn next(&mut self) -> Result<Pull, SourceError>;

    fn fill_product(
        &self,
        _product: &mut Product,
        _ctx: &FillContext<'_>,
    ) -> Result<(), FillError> {
        Err(FillError::Unsupported(EntityKind::Product))
    }

    fn fill_venue(&self, _venue: &mut Venue, _ctx: &FillContext<'_>) -> Result<(), FillError> {
        Err(FillError::Unsupported(EntityKind::Venue))
    }

    fn fill_offer(&self, _offer: &mut Offer, _ctx: &FillContext<'_>) -> Result<(), FillError> {
        Err(FillError::Unsupported(EntityKind::Offer))
    }

    fn fill_stock(&self, _stock: &mut Stock, _ctx: &FillContext<'_>) -> Result<(), FillError> {
        Err(FillError::Unsupported(EntityKind::Stock))
    }

    fn fill_bank_information(
        &self,
        _info: &mut BankInformation,
        _ctx: &FillContext<'_>,
    ) -> Result<(), FillError> {
        Err(FillError::Unsupported(EntityKind::BankInformation))
    }

    /// Candidate image timestamps, one per thumbnail index. `None` skips the index.
    fn thumb_dates(&self, _entity: &Entity) -> Vec<Option<Timestamp>> {
        Vec::new()
    }

    /// Image bytes for one thumbnail index.
    async fn thumb_bytes(
        &mut self,
        _entity: &Entity,
        _index: usize,
    ) -> Result<Option<Vec<u8>>, SourceError> {
        Ok(None)
    }

    /// External ids the provider considers gone upstream.
    ///
    /// Reported for observability only; the engine does not deactivate anything.
    fn deactivated_identifiers(&self) -> Vec<String> {
        Vec::new()
    }
}

/// What a fill callback can see besides the entity it fills.
pub struct FillContext<'a> {
    info: &'a ProvidableInfo,
    staged: &'a InFlightBatch,
}

impl<'a> FillContext<'a> {
    pub fn new(info: &'a ProvidableInfo, staged: &'a InFlightBatch) -> Self {
        Self { info, staged }
    }

    /// The identity record being filled.
    pub fn info(&self) -> &ProvidableInfo {
        self.info
    }

    pub fn external_id(&self) -> &str {
        self.info.external_id()
    }

    /// An entity staged earlier in this run, before any flush.
    pub fn staged(&self, kind: EntityKind, external_id: &str) -> Option<&Entity> {
        self.staged.get(kind, external_id)
    }
}

/// Route `entity` to the fill callback matching its kind.
pub(crate) fn fill_entity(
    provider: &dyn LocalProvider,
    entity: &mut Entity,
    ctx: &FillContext<'_>,
) -> Result<(), FillError> {
    match &mut entity.data {
        EntityData::Product(product) => provider.fill_product(product, ctx),
        EntityData::Venue(venue) => provider.fill_venue(venue, ctx),
        EntityData::Offer(offer) => provider.fill_offer(offer, ctx),
        EntityData::Stock(stock) => provider.fill_stock(stock, ctx),
        EntityData::BankInformation(info) => provider.fill_bank_information(info, ctx),
    }
}
