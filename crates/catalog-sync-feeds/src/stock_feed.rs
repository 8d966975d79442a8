use std::collections::VecDeque;

use catalog_sync::{
    EntityKind, FillContext, FillError, LocalProvider, Offer, Product, ProvidableInfo, Pull,
    ResumeToken, SourceError, Stock, Timestamp, VenueProvider,
};
use chrono::Utc;
use tracing::{debug, warn};

use crate::price::to_cents;
use crate::stock_client::{StockFeedClient, StockRecord};

pub const STOCK_FEED_CLASS: &str = "StockFeed";

/// Synchronizes one venue's book stocks from its stock feed.
///
/// Every upstream record becomes a `[Product, Offer, Stock]` batch: the
/// product is shared across venues and keyed by reference, the offer and
/// its stock are keyed `<reference>@<siret>`.
pub struct StockFeedProvider {
    client: Box<dyn StockFeedClient>,
    siret: String,
    venue_id: i64,
    cursor: Option<String>,
    fetched_last_page: bool,
    pending: VecDeque<StockRecord>,
    current: Option<StockRecord>,
    started_at: Timestamp,
}

impl StockFeedProvider {
    pub fn new(client: Box<dyn StockFeedClient>, venue_provider: &VenueProvider) -> Self {
        Self {
            client,
            siret: venue_provider.venue_id_at_offer_provider.clone(),
            venue_id: venue_provider.venue_id,
            cursor: None,
            fetched_last_page: false,
            pending: VecDeque::new(),
            current: None,
            started_at: Utc::now(),
        }
    }

    fn offer_external_id(&self, reference: &str) -> String {
        format!("{reference}@{}", self.siret)
    }

    fn identities(&self, record: &StockRecord) -> Result<Vec<ProvidableInfo>, SourceError> {
        // Records without their own modification date are stamped with the run start.
        let modified_at = Some(record.modified_at.unwrap_or(self.started_at));
        let offer_id = self.offer_external_id(&record.reference);

        Ok(vec![
            ProvidableInfo::new(EntityKind::Product, &record.reference, modified_at)?,
            ProvidableInfo::new(EntityKind::Offer, &offer_id, modified_at)?,
            ProvidableInfo::new(EntityKind::Stock, offer_id, modified_at)?,
        ])
    }

    /// The current record, checked against the identity being filled.
    fn record_for(&self, ctx: &FillContext<'_>) -> Result<&StockRecord, FillError> {
        let record = self
            .current
            .as_ref()
            .ok_or_else(|| FillError::MissingField("current stock record".into()))?;

        let expected = match ctx.info().kind() {
            EntityKind::Product => record.reference.clone(),
            _ => self.offer_external_id(&record.reference),
        };
        if ctx.external_id() != expected {
            return Err(FillError::Invalid(format!(
                "positioned on {expected}, asked to fill {}",
                ctx.external_id()
            )));
        }
        Ok(record)
    }

    async fn fetch_next_page(&mut self) -> Result<(), SourceError> {
        let page = self
            .client
            .fetch_page(&self.siret, self.cursor.as_deref())
            .await?;
        debug!(
            siret = %self.siret,
            records = page.stocks.len(),
            "fetched stock page"
        );

        self.pending.extend(page.stocks);
        self.fetched_last_page = page.next_cursor.is_none();
        self.cursor = page.next_cursor;
        Ok(())
    }
}

fn title(record: &StockRecord) -> Result<String, FillError> {
    record
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| FillError::MissingField(format!("title of {}", record.reference)))
}

#[async_trait::async_trait]
impl LocalProvider for StockFeedProvider {
    fn name(&self) -> &str {
        STOCK_FEED_CLASS
    }

    async fn start(&mut self, _resume: Option<&ResumeToken>) -> Result<(), SourceError> {
        self.cursor = None;
        self.fetched_last_page = false;
        self.pending.clear();
        self.current = None;
        self.started_at = Utc::now();
        Ok(())
    }

    async fn next(&mut self) -> Result<Pull, SourceError> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                match self.identities(&record) {
                    Ok(infos) => {
                        self.current = Some(record);
                        return Ok(Pull::Batch(infos));
                    }
                    Err(e) => {
                        warn!(reference = %record.reference, error = %e, "skipping stock record");
                    }
                }
            }

            if self.fetched_last_page {
                self.current = None;
                return Ok(Pull::Exhausted);
            }
            self.fetch_next_page().await?;
        }
    }

    fn fill_product(&self, product: &mut Product, ctx: &FillContext<'_>) -> Result<(), FillError> {
        let record = self.record_for(ctx)?;
        product.name = title(record)?;
        product.ean = Some(record.reference.clone());
        product.author = record.author.clone();
        product.price_cents = Some(to_cents(record.price)?);
        Ok(())
    }

    fn fill_offer(&self, offer: &mut Offer, ctx: &FillContext<'_>) -> Result<(), FillError> {
        let record = self.record_for(ctx)?;
        offer.name = title(record)?;
        offer.product_external_id = Some(record.reference.clone());
        offer.venue_id = Some(self.venue_id);
        offer.is_active = record.available > 0;
        Ok(())
    }

    fn fill_stock(&self, stock: &mut Stock, ctx: &FillContext<'_>) -> Result<(), FillError> {
        let record = self.record_for(ctx)?;
        let offer_id = self.offer_external_id(&record.reference);
        if ctx.staged(EntityKind::Offer, &offer_id).is_none() {
            debug!(offer = %offer_id, "offer not staged in this run, linking by external id");
        }

        stock.offer_external_id = offer_id;
        stock.price_cents = to_cents(record.price)?;
        stock.quantity = Some(record.available);
        Ok(())
    }
}
