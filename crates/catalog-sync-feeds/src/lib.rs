pub mod bank_information;
pub mod catalog_dump;
pub mod dms_client;
pub mod dump_files;
pub mod price;
pub mod registration;
pub mod stock_client;
pub mod stock_feed;

pub use bank_information::{BANK_INFORMATION_CLASS, BankInformationProvider};
pub use catalog_dump::{CATALOG_DUMP_CLASS, CatalogDumpProvider, CatalogRecord};
pub use dms_client::{Application, ApplicationState, DmsClient, FixtureDmsClient, HttpDmsClient};
pub use registration::{
    BankInformationSettings, CatalogDumpSettings, FeedsConfig, StockFeedSettings, register_feeds,
};
pub use stock_client::{
    FixtureStockFeedClient, HttpStockFeedClient, StockFeedClient, StockPage, StockRecord,
};
pub use stock_feed::{STOCK_FEED_CLASS, StockFeedProvider};
