use std::path::PathBuf;

use catalog_sync::{DataSource, LocalProvider, ProviderContext, ProviderRegistry, SourceError};

use crate::bank_information::{BANK_INFORMATION_CLASS, BankInformationProvider};
use crate::catalog_dump::{CATALOG_DUMP_CLASS, CatalogDumpProvider};
use crate::dms_client::{DmsClient, FixtureDmsClient, HttpDmsClient};
use crate::stock_client::{FixtureStockFeedClient, HttpStockFeedClient, StockFeedClient};
use crate::stock_feed::{STOCK_FEED_CLASS, StockFeedProvider};

#[derive(Debug, Clone, Default)]
pub struct StockFeedSettings {
    pub base_url: Option<String>,
    /// Used when the provider row carries no API key of its own.
    pub api_key: Option<String>,
    pub mock_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogDumpSettings {
    pub dump_dir: Option<PathBuf>,
    pub thumbs_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct BankInformationSettings {
    pub base_url: Option<String>,
    /// Procedure collecting the bank details applications.
    pub procedure_id: Option<String>,
    /// Used when the provider row carries no API key of its own.
    pub token: Option<String>,
    pub mock_dir: Option<PathBuf>,
}

/// Everything the bundled feeds need to be built.
#[derive(Debug, Clone, Default)]
pub struct FeedsConfig {
    pub stock_feed: StockFeedSettings,
    pub catalog_dump: CatalogDumpSettings,
    pub bank_information: BankInformationSettings,
}

/// Register the bundled provider plugins under their local class names.
pub fn register_feeds(registry: &mut ProviderRegistry, config: FeedsConfig) {
    let FeedsConfig {
        stock_feed,
        catalog_dump,
        bank_information,
    } = config;

    registry.register(STOCK_FEED_CLASS, move |ctx| build_stock_feed(&stock_feed, ctx));
    registry.register(CATALOG_DUMP_CLASS, move |ctx| {
        build_catalog_dump(&catalog_dump, ctx)
    });
    registry.register(BANK_INFORMATION_CLASS, move |ctx| {
        build_bank_information(&bank_information, ctx)
    });
}

fn build_stock_feed(
    settings: &StockFeedSettings,
    ctx: &ProviderContext<'_>,
) -> Result<Box<dyn LocalProvider>, SourceError> {
    let venue_provider = ctx.venue_provider.ok_or_else(|| {
        SourceError::Other(format!(
            "{STOCK_FEED_CLASS} syncs one venue at a time; a venue provider is required"
        ))
    })?;

    let client: Box<dyn StockFeedClient> = match ctx.data_source {
        DataSource::Mock => {
            let dir = settings.mock_dir.clone().ok_or_else(|| {
                SourceError::Other("stock_feed.mock_dir is not configured".into())
            })?;
            Box::new(FixtureStockFeedClient::new(dir))
        }
        DataSource::Live => {
            let base_url = settings.base_url.clone().ok_or_else(|| {
                SourceError::Other("stock_feed.base_url is not configured".into())
            })?;
            let api_key = ctx
                .provider
                .api_key
                .clone()
                .or_else(|| settings.api_key.clone());
            Box::new(HttpStockFeedClient::new(base_url, api_key))
        }
    };

    Ok(Box::new(StockFeedProvider::new(client, venue_provider)))
}

fn build_catalog_dump(
    settings: &CatalogDumpSettings,
    _ctx: &ProviderContext<'_>,
) -> Result<Box<dyn LocalProvider>, SourceError> {
    let dump_dir = settings
        .dump_dir
        .clone()
        .ok_or_else(|| SourceError::Other("catalog_dump.dump_dir is not configured".into()))?;

    Ok(Box::new(CatalogDumpProvider::new(
        dump_dir,
        settings.thumbs_dir.clone(),
    )))
}

fn build_bank_information(
    settings: &BankInformationSettings,
    ctx: &ProviderContext<'_>,
) -> Result<Box<dyn LocalProvider>, SourceError> {
    let client: Box<dyn DmsClient> = match ctx.data_source {
        DataSource::Mock => {
            let dir = settings.mock_dir.clone().ok_or_else(|| {
                SourceError::Other("bank_information.mock_dir is not configured".into())
            })?;
            Box::new(FixtureDmsClient::new(dir))
        }
        DataSource::Live => {
            let base_url = settings.base_url.clone().ok_or_else(|| {
                SourceError::Other("bank_information.base_url is not configured".into())
            })?;
            let procedure_id = settings.procedure_id.clone().ok_or_else(|| {
                SourceError::Other("bank_information.procedure_id is not configured".into())
            })?;
            let token = ctx
                .provider
                .api_key
                .clone()
                .or_else(|| settings.token.clone());
            Box::new(HttpDmsClient::new(base_url, procedure_id, token))
        }
    };

    Ok(Box::new(BankInformationProvider::new(client)))
}
