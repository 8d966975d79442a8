use std::collections::BTreeMap;

use crate::engine::{SyncError, SyncJob};
use crate::ports::{ProviderDirectory, StoreError};
use crate::provider::{LocalProvider, ProviderRecord, SourceError, VenueProvider};

/// Where a provider reads its upstream data from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataSource {
    #[default]
    Live,
    /// Local fixtures instead of the real upstream.
    Mock,
}

/// Everything a factory needs to build a provider plugin.
pub struct ProviderContext<'a> {
    pub data_source: DataSource,
    pub provider: &'a ProviderRecord,
    pub venue_provider: Option<&'a VenueProvider>,
}

pub type ProviderFactory = Box<
    dyn Fn(&ProviderContext<'_>) -> Result<Box<dyn LocalProvider>, SourceError> + Send + Sync,
>;

/// Maps a provider's local class name to the factory building its plugin.
///
/// Built once at start-up and passed to whatever runs syncs.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, local_class: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ProviderContext<'_>) -> Result<Box<dyn LocalProvider>, SourceError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(local_class.into(), Box::new(factory));
        self
    }

    pub fn contains(&self, local_class: &str) -> bool {
        self.factories.contains_key(local_class)
    }

    /// Registered class names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(&self, ctx: &ProviderContext<'_>) -> Result<Box<dyn LocalProvider>, SyncError> {
        let factory = self
            .factories
            .get(&ctx.provider.local_class)
            .ok_or_else(|| SyncError::UnknownProvider(ctx.provider.local_class.clone()))?;
        Ok(factory(ctx)?)
    }

    /// Resolve the provider row (and optional venue binding) and build a job.
    pub async fn prepare_job(
        &self,
        directory: &dyn ProviderDirectory,
        local_class: &str,
        venue_provider_id: Option<i64>,
        data_source: DataSource,
    ) -> Result<SyncJob, SyncError> {
        if !self.contains(local_class) {
            return Err(SyncError::UnknownProvider(local_class.to_owned()));
        }

        let provider = directory
            .provider_by_class(local_class)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("provider {local_class}")))?;

        let venue_provider = match venue_provider_id {
            Some(id) => Some(
                directory
                    .venue_provider(id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("venue provider {id}")))?,
            ),
            None => None,
        };

        let plugin = self.build(&ProviderContext {
            data_source,
            provider: &provider,
            venue_provider: venue_provider.as_ref(),
        })?;

        Ok(SyncJob {
            provider,
            venue_provider,
            plugin,
        })
    }
}
