use catalog_sync::test_support::{RecordingNotifier, ScriptedProvider};
use catalog_sync::{
    CompositeKey, EntityData, EntityKind, EntityStore, EventLog, LocalProviderEventKind, Offer,
    ProvidableInfo, Product, ProviderDirectory, Pull, Stock, SyncEngine, SyncJob, ThumbStore,
    Timestamp,
};
use catalog_sync_store::CatalogStore;
use chrono::{TimeZone, Utc};

fn t(day: u32) -> Timestamp {
    Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap()
}

fn info(kind: EntityKind, id: &str, day: u32) -> ProvidableInfo {
    ProvidableInfo::new(kind, id, Some(t(day))).unwrap()
}

fn feed(day: u32, price_cents: i64) -> ScriptedProvider {
    ScriptedProvider::batches(vec![vec![
        info(EntityKind::Product, "9782070360024", day),
        info(EntityKind::Offer, "9782070360024@77567146400110", day),
        info(EntityKind::Stock, "9782070360024@77567146400110", day),
    ]])
    .with_record(
        "9782070360024",
        EntityData::Product(Product {
            name: "L'Étranger".to_owned(),
            ean: Some("9782070360024".to_owned()),
            ..Product::default()
        }),
    )
    .with_record(
        "9782070360024@77567146400110",
        EntityData::Offer(Offer {
            name: "L'Étranger".to_owned(),
            product_external_id: Some("9782070360024".to_owned()),
            venue_id: Some(1),
            is_active: true,
        }),
    )
    .with_record(
        "9782070360024@77567146400110",
        EntityData::Stock(Stock {
            offer_external_id: "9782070360024@77567146400110".to_owned(),
            price_cents,
            quantity: Some(3),
            beginning_at: None,
        }),
    )
    .with_thumbs(
        "9782070360024",
        vec![(Some(t(day)), Some(b"\x89PNG".to_vec()))],
    )
}

#[tokio::test]
async fn full_run_persists_entities_events_and_thumbs() {
    let store = CatalogStore::open_in_memory().unwrap();
    let provider = store.set_provider_active("StockFeed", true).unwrap();
    let binding = store
        .add_venue_provider(provider.id, 1, "77567146400110")
        .unwrap();
    let notifier = RecordingNotifier::default();
    let engine = SyncEngine::new(&store).with_notifier(&notifier);

    let mut job = SyncJob::new(provider.clone(), Box::new(feed(1, 1250))).for_venue(binding);
    let summary = engine.update_objects(&mut job, None).await.unwrap();

    assert_eq!(summary.checked, 1);
    assert_eq!(summary.created, 3);
    assert_eq!(summary.created_thumbs, 1);

    let product = store
        .find_by_external_id(EntityKind::Product, "9782070360024")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(product.thumb_count, 1);
    assert_eq!(product.last_provider_id, Some(provider.id));
    let key = CompositeKey::new("9782070360024", EntityKind::Product);
    assert_eq!(store.thumb_date(&key, 0).await.unwrap(), Some(t(1)));

    let events = store.recent_events(provider.id, 10).await.unwrap();
    let kinds: Vec<_> = events.iter().rev().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![LocalProviderEventKind::SyncStart, LocalProviderEventKind::SyncEnd]
    );

    let saved = store.venue_provider(1).await.unwrap().unwrap();
    assert!(saved.last_sync_date.is_some());
    assert_eq!(notifier.synced().len(), 1);
}

#[tokio::test]
async fn second_run_only_applies_newer_records() {
    let store = CatalogStore::open_in_memory().unwrap();
    let provider = store.set_provider_active("StockFeed", true).unwrap();
    let engine = SyncEngine::new(&store);

    let mut first = SyncJob::new(provider.clone(), Box::new(feed(1, 1250)));
    engine.update_objects(&mut first, None).await.unwrap();

    let mut unchanged = SyncJob::new(provider.clone(), Box::new(feed(1, 990)));
    let summary = engine.update_objects(&mut unchanged, None).await.unwrap();
    assert_eq!(summary.created + summary.updated, 0);

    let mut newer = SyncJob::new(provider.clone(), Box::new(feed(2, 990)));
    let summary = engine.update_objects(&mut newer, None).await.unwrap();
    assert_eq!(summary.updated, 3);
    assert_eq!(summary.updated_thumbs, 1);

    let stock = store
        .find_by_external_id(EntityKind::Stock, "9782070360024@77567146400110")
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(stock.data, EntityData::Stock(ref s) if s.price_cents == 990));
    assert_eq!(stock.last_modified_at_provider, Some(t(2)));
}

#[tokio::test]
async fn checkpoint_written_by_one_run_resumes_the_next() {
    let store = CatalogStore::open_in_memory().unwrap();
    let provider = store.set_provider_active("CatalogDump", true).unwrap();
    let engine = SyncEngine::new(&store);

    let mut first = SyncJob::new(
        provider.clone(),
        Box::new(ScriptedProvider::new(vec![
            Pull::PartStart("catalog_20240501.jsonl".to_owned()),
            Pull::PartEnd("20240501".to_owned()),
        ])),
    );
    engine.update_objects(&mut first, None).await.unwrap();

    let second_plugin = ScriptedProvider::new(vec![]);
    let observations = second_plugin.observations();
    let mut second = SyncJob::new(provider, Box::new(second_plugin));
    engine.update_objects(&mut second, None).await.unwrap();

    assert_eq!(
        observations.lock().unwrap().resumed_with.as_deref(),
        Some("20240501")
    );
}
