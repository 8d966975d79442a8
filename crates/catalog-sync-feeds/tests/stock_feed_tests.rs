use catalog_sync::test_support::InMemoryStore;
use catalog_sync::{
    DataSource, EntityData, EntityKind, LocalProviderEventKind, ProviderRegistry, SourceError,
    SyncEngine, SyncError, SyncJob, VenueProvider,
};
use catalog_sync_feeds::{
    FeedsConfig, HttpStockFeedClient, STOCK_FEED_CLASS, StockFeedClient, StockFeedProvider,
    StockFeedSettings, register_feeds,
};
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SIRET: &str = "77567146400110";
const PAGE_1: &str = include_str!("fixtures/stock_page_1.json");
const PAGE_2: &str = include_str!("fixtures/stock_page_2.json");

async fn mount_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/venues/{SIRET}/stocks")))
        .and(query_param_is_missing("after"))
        .and(header("Authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PAGE_1, "application/json"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/venues/{SIRET}/stocks")))
        .and(query_param("after", "page2"))
        .and(header("Authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PAGE_2, "application/json"))
        .mount(server)
        .await;
}

fn setup(store: &InMemoryStore) -> (catalog_sync::ProviderRecord, VenueProvider) {
    let provider = store.add_provider(STOCK_FEED_CLASS, true);
    let binding = store.add_venue_provider(provider.id, 7, SIRET, true);
    (provider, binding)
}

fn http_job(server: &MockServer, store: &InMemoryStore) -> SyncJob {
    let (provider, binding) = setup(store);
    let client = HttpStockFeedClient::new(server.uri(), Some("secret".to_owned())).with_page_size(2);
    let plugin = StockFeedProvider::new(Box::new(client), &binding);
    SyncJob::new(provider, Box::new(plugin)).for_venue(binding)
}

#[tokio::test]
async fn http_client_follows_next_cursor() {
    let server = MockServer::start().await;
    mount_pages(&server).await;

    let client = HttpStockFeedClient::new(server.uri(), Some("secret".to_owned()));
    let first = client.fetch_page(SIRET, None).await.unwrap();
    assert_eq!(first.stocks.len(), 2);
    assert_eq!(first.next_cursor.as_deref(), Some("page2"));

    let second = client.fetch_page(SIRET, Some("page2")).await.unwrap();
    assert_eq!(second.stocks[0].reference, "9782253006329");
    assert_eq!(second.next_cursor, None);
}

#[tokio::test]
async fn cursor_with_reserved_characters_is_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/venues/{SIRET}/stocks")))
        .and(query_param("limit", "1000"))
        .and(query_param("after", "a+b/c=="))
        .respond_with(ResponseTemplate::new(200).set_body_raw(PAGE_2, "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpStockFeedClient::new(server.uri(), None);
    let page = client.fetch_page(SIRET, Some("a+b/c==")).await.unwrap();
    assert_eq!(page.stocks[0].reference, "9782253006329");
}

#[tokio::test]
async fn sync_creates_products_offers_and_stocks() {
    let server = MockServer::start().await;
    mount_pages(&server).await;
    let store = InMemoryStore::new();
    let mut job = http_job(&server, &store);

    let summary = SyncEngine::new(&store)
        .update_objects(&mut job, None)
        .await
        .unwrap();

    assert_eq!(summary.checked, 4);
    // The untitled record yields no product or offer, only its stock.
    assert_eq!(summary.created, 10);
    assert_eq!(summary.errored, 2);

    let offer = store
        .entity(EntityKind::Offer, "9782070368228@77567146400110")
        .unwrap();
    assert!(matches!(&offer.data, EntityData::Offer(o) if !o.is_active && o.venue_id == Some(7)));

    let stock = store
        .entity(EntityKind::Stock, "9782070360024@77567146400110")
        .unwrap();
    let EntityData::Stock(stock) = &stock.data else {
        panic!("expected a stock");
    };
    assert_eq!(stock.price_cents, 750);
    assert_eq!(stock.quantity, Some(4));
    assert_eq!(stock.offer_external_id, "9782070360024@77567146400110");

    let binding = &store.venue_providers()[0];
    assert!(binding.last_sync_date.is_some());
    assert_eq!(binding.sync_worker_id, None);
}

#[tokio::test]
async fn records_without_date_are_refreshed_every_run() {
    let server = MockServer::start().await;
    mount_pages(&server).await;
    let store = InMemoryStore::new();
    let engine = SyncEngine::new(&store);

    let mut first = http_job(&server, &store);
    engine.update_objects(&mut first, None).await.unwrap();

    let (provider, binding) = (first.provider.clone(), first.venue_provider.clone().unwrap());
    let client = HttpStockFeedClient::new(server.uri(), Some("secret".to_owned()));
    let plugin = StockFeedProvider::new(Box::new(client), &binding);
    let mut second = SyncJob::new(provider, Box::new(plugin)).for_venue(binding);
    let summary = engine.update_objects(&mut second, None).await.unwrap();

    assert_eq!(summary.created, 0);
    // Product, offer and stock of the undated record.
    assert_eq!(summary.updated, 3);
}

#[tokio::test]
async fn upstream_http_error_ends_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let store = InMemoryStore::new();
    let mut job = http_job(&server, &store);

    let result = SyncEngine::new(&store).update_objects(&mut job, None).await;

    assert!(matches!(result, Err(SyncError::Source(SourceError::Network(_)))));
    assert_eq!(store.event_kinds(), vec![LocalProviderEventKind::SyncStart]);
    assert!(store.entities().is_empty());
}

#[tokio::test]
async fn mock_mode_reads_fixture_pages() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(format!("{SIRET}.json")), PAGE_1).unwrap();
    std::fs::write(dir.path().join(format!("{SIRET}_page2.json")), PAGE_2).unwrap();

    let store = InMemoryStore::new();
    let (_, binding) = setup(&store);
    let mut registry = ProviderRegistry::new();
    register_feeds(
        &mut registry,
        FeedsConfig {
            stock_feed: StockFeedSettings {
                mock_dir: Some(dir.path().to_path_buf()),
                ..StockFeedSettings::default()
            },
            ..FeedsConfig::default()
        },
    );

    let mut job = registry
        .prepare_job(&store, STOCK_FEED_CLASS, Some(binding.id), DataSource::Mock)
        .await
        .unwrap();
    let summary = SyncEngine::new(&store)
        .update_objects(&mut job, None)
        .await
        .unwrap();

    assert_eq!(summary.checked, 4);
    assert!(store.entity(EntityKind::Product, "9782253006329").is_some());
}
