pub mod batch;
pub mod engine;
pub mod entity;
pub mod event;
pub mod ports;
pub mod providable;
pub mod provider;
pub mod registry;
pub mod thumbs;

pub use batch::InFlightBatch;
pub use engine::{
    CHUNK_MAX_SIZE, EVENT_LOOKBACK_DAYS, ItemError, SyncEngine, SyncError, SyncJob, SyncSummary,
};
pub use entity::{
    BankInformation, BankInformationStatus, Entity, EntityData, EntityKind, Offer, Product, Stock,
    ValidationIssue, Venue,
};
pub use event::{LocalProviderEvent, LocalProviderEventKind};
pub use ports::{
    EntityStore, EventLog, NoopNotifier, ProviderDirectory, StoreError, SyncNotifier, ThumbStore,
};
pub use providable::{CompositeKey, IdentityError, ProvidableInfo};
pub use provider::{
    FillContext, FillError, LocalProvider, ProviderRecord, Pull, ResumeToken, SourceError,
    VenueProvider,
};
pub use registry::{DataSource, ProviderContext, ProviderFactory, ProviderRegistry};
pub use thumbs::ThumbError;

/// Upstream and storage timestamps are always UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
