use std::path::{Path, PathBuf};

use catalog_sync::{CHUNK_MAX_SIZE, EVENT_LOOKBACK_DAYS};
use catalog_sync_feeds::{
    BankInformationSettings, CatalogDumpSettings, FeedsConfig, StockFeedSettings,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Points to an alternative config file.
pub const CONFIG_ENV: &str = "CATALOG_SYNC_CONFIG";

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    /// Defaults to `<cache_dir>/catalog-sync/catalog.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_chunk_max_size")]
    pub chunk_max_size: usize,
    #[serde(default = "default_event_lookback_days")]
    pub event_lookback_days: u32,
    #[serde(default)]
    pub stock_feed: StockFeedSection,
    #[serde(default)]
    pub catalog_dump: CatalogDumpSection,
    #[serde(default)]
    pub bank_information: BankInformationSection,
}

/// `[stock_feed]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StockFeedSection {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub mock_dir: Option<PathBuf>,
}

/// `[catalog_dump]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct CatalogDumpSection {
    pub dump_dir: Option<PathBuf>,
    pub thumbs_dir: Option<PathBuf>,
}

/// `[bank_information]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BankInformationSection {
    pub base_url: Option<String>,
    pub procedure_id: Option<String>,
    pub token: Option<String>,
    pub mock_dir: Option<PathBuf>,
}

fn default_chunk_max_size() -> usize {
    CHUNK_MAX_SIZE
}

fn default_event_lookback_days() -> u32 {
    EVENT_LOOKBACK_DAYS
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            chunk_max_size: default_chunk_max_size(),
            event_lookback_days: default_event_lookback_days(),
            stock_feed: StockFeedSection::default(),
            catalog_dump: CatalogDumpSection::default(),
            bank_information: BankInformationSection::default(),
        }
    }
}

impl AppConfig {
    /// Settings handed to the bundled provider plugins.
    pub fn feeds(&self) -> FeedsConfig {
        FeedsConfig {
            stock_feed: StockFeedSettings {
                base_url: self.stock_feed.base_url.clone(),
                api_key: self.stock_feed.api_key.clone(),
                mock_dir: self.stock_feed.mock_dir.clone(),
            },
            catalog_dump: CatalogDumpSettings {
                dump_dir: self.catalog_dump.dump_dir.clone(),
                thumbs_dir: self.catalog_dump.thumbs_dir.clone(),
            },
            bank_information: BankInformationSettings {
                base_url: self.bank_information.base_url.clone(),
                procedure_id: self.bank_information.procedure_id.clone(),
                token: self.bank_information.token.clone(),
                mock_dir: self.bank_information.mock_dir.clone(),
            },
        }
    }
}

/// Config file path: `$CATALOG_SYNC_CONFIG`, else `~/.config/catalog-sync/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("catalog-sync").join("config.toml"))
}

/// Load config from file, falling back to defaults if missing.
pub fn load_config() -> AppConfig {
    match config_path() {
        Some(path) => load_from(&path),
        None => AppConfig::default(),
    }
}

fn load_from(path: &Path) -> AppConfig {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return AppConfig::default();
    };

    match toml::from_str::<AppConfig>(&contents) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
            AppConfig::default()
        }
    }
}
