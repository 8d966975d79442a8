use std::path::PathBuf;

use catalog_sync::{SourceError, Timestamp};
use reqwest::Url;
use serde::Deserialize;

/// One line of a venue's stock feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StockRecord {
    /// Product reference, usually the EAN-13.
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    pub available: u32,
    /// Unit price in euros.
    pub price: f64,
    #[serde(default)]
    pub modified_at: Option<Timestamp>,
}

/// A page of stock records and the cursor of the page after it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StockPage {
    pub stocks: Vec<StockRecord>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Transport for a venue's stock feed.
#[async_trait::async_trait]
pub trait StockFeedClient: Send + Sync {
    /// Fetch the page starting at `cursor`, or the first page when `None`.
    async fn fetch_page(
        &self,
        siret: &str,
        cursor: Option<&str>,
    ) -> Result<StockPage, SourceError>;
}

/// Reads stock pages from the bookshop stock API.
pub struct HttpStockFeedClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    page_size: usize,
}

impl HttpStockFeedClient {
    const DEFAULT_PAGE_SIZE: usize = 1000;

    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn page_url(&self, siret: &str, cursor: Option<&str>) -> Result<Url, SourceError> {
        let mut url = Url::parse(&format!("{}/venues/{}/stocks", self.base_url, siret))
            .map_err(|e| SourceError::Other(format!("invalid stock feed url: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &self.page_size.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("after", cursor);
            }
        }
        Ok(url)
    }
}

#[async_trait::async_trait]
impl StockFeedClient for HttpStockFeedClient {
    async fn fetch_page(
        &self,
        siret: &str,
        cursor: Option<&str>,
    ) -> Result<StockPage, SourceError> {
        let url = self.page_url(siret, cursor)?;

        let mut req = self.client.get(url).header("User-Agent", "catalog-sync");
        if let Some(api_key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = req
            .send()
            .await
            .map_err(|e| SourceError::Network(format!("stock feed request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SourceError::Network(format!(
                "stock feed returned HTTP {} for venue {siret}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("failed to parse stock page: {e}")))
    }
}

/// Serves stock pages from JSON files, for running without the live API.
///
/// The first page of a venue lives in `<dir>/<siret>.json`; the page at
/// cursor `c` in `<dir>/<siret>_<c>.json`.
pub struct FixtureStockFeedClient {
    dir: PathBuf,
}

impl FixtureStockFeedClient {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait::async_trait]
impl StockFeedClient for FixtureStockFeedClient {
    async fn fetch_page(
        &self,
        siret: &str,
        cursor: Option<&str>,
    ) -> Result<StockPage, SourceError> {
        let file_name = match cursor {
            Some(cursor) => format!("{siret}_{cursor}.json"),
            None => format!("{siret}.json"),
        };
        let path = self.dir.join(file_name);

        let content = std::fs::read_to_string(&path)
            .map_err(|e| SourceError::Io(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| SourceError::Parse(format!("{}: {e}", path.display())))
    }
}
