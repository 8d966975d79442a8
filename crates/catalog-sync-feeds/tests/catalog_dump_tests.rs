use std::io::Write;
use std::path::Path;

use catalog_sync::test_support::InMemoryStore;
use catalog_sync::{
    CompositeKey, EntityData, EntityKind, LocalProviderEventKind as Kind, SyncEngine, SyncJob,
};
use catalog_sync_feeds::{CATALOG_DUMP_CLASS, CatalogDumpProvider};
use chrono::{Duration, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;

fn line(ean: &str, title: &str, price: f64) -> String {
    format!(r#"{{"ean":"{ean}","title":"{title}","author":"Victor Hugo","price":{price}}}"#)
}

fn write_dump(dir: &Path, name: &str, lines: &[String]) {
    std::fs::write(dir.join(name), lines.join("\n")).unwrap();
}

fn write_gz_dump(dir: &Path, name: &str, lines: &[String]) {
    let file = std::fs::File::create(dir.join(name)).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(lines.join("\n").as_bytes()).unwrap();
    encoder.finish().unwrap();
}

fn job(store: &InMemoryStore, dumps: &Path, thumbs: Option<&Path>) -> SyncJob {
    let provider = store.add_provider(CATALOG_DUMP_CLASS, true);
    let plugin = CatalogDumpProvider::new(dumps, thumbs.map(Path::to_path_buf));
    SyncJob::new(provider, Box::new(plugin))
}

#[tokio::test]
async fn imports_files_oldest_first_with_part_events() {
    let dumps = tempfile::tempdir().unwrap();
    write_gz_dump(
        dumps.path(),
        "catalog_20240102.jsonl.gz",
        &[line("9782070409228", "Les Misérables", 11.9)],
    );
    write_dump(
        dumps.path(),
        "catalog_20240101.jsonl",
        &[
            line("9782253096337", "Notre-Dame de Paris", 8.4),
            "{not json".to_owned(),
            String::new(),
            line("9782070409228", "Les Misérables (ancienne édition)", 10.0),
        ],
    );
    write_dump(dumps.path(), "README.txt", &["ignored".to_owned()]);

    let store = InMemoryStore::new();
    let mut job = job(&store, dumps.path(), None);
    let summary = SyncEngine::new(&store)
        .update_objects(&mut job, None)
        .await
        .unwrap();

    assert_eq!(summary.checked, 3);
    assert_eq!(summary.created, 2);
    assert_eq!(summary.updated, 1);
    assert_eq!(
        store.event_kinds(),
        vec![
            Kind::SyncStart,
            Kind::SyncPartStart,
            Kind::SyncPartEnd,
            Kind::SyncPartStart,
            Kind::SyncPartEnd,
            Kind::SyncEnd,
        ]
    );
    let payloads: Vec<Option<String>> = store.events().into_iter().map(|e| e.payload).collect();
    assert_eq!(payloads[1].as_deref(), Some("catalog_20240101.jsonl"));
    assert_eq!(payloads[2].as_deref(), Some("20240101"));
    assert_eq!(payloads[4].as_deref(), Some("20240102"));

    let product = store
        .entity(EntityKind::Product, "9782070409228")
        .unwrap();
    assert!(matches!(
        &product.data,
        EntityData::Product(p) if p.name == "Les Misérables" && p.price_cents == Some(1190)
    ));
}

#[tokio::test]
async fn resumes_after_recorded_checkpoint() {
    let dumps = tempfile::tempdir().unwrap();
    write_dump(
        dumps.path(),
        "catalog_20240101.jsonl",
        &[line("9782253096337", "Notre-Dame de Paris", 8.4)],
    );
    write_dump(
        dumps.path(),
        "catalog_20240102.jsonl",
        &[line("9782070409228", "Les Misérables", 11.9)],
    );

    let store = InMemoryStore::new();
    let mut job = job(&store, dumps.path(), None);
    store.seed_event(
        job.provider.id,
        Kind::SyncPartEnd,
        Some("20240101"),
        Utc::now() - Duration::days(1),
    );

    let summary = SyncEngine::new(&store)
        .update_objects(&mut job, None)
        .await
        .unwrap();

    assert_eq!(summary.created, 1);
    assert!(store.entity(EntityKind::Product, "9782253096337").is_none());
    assert!(store.entity(EntityKind::Product, "9782070409228").is_some());
}

#[tokio::test]
async fn attaches_cover_images_from_thumbs_directory() {
    let dumps = tempfile::tempdir().unwrap();
    let thumbs = tempfile::tempdir().unwrap();
    write_dump(
        dumps.path(),
        "catalog_20240101.jsonl",
        &[
            line("9782253096337", "Notre-Dame de Paris", 8.4),
            line("9782070409228", "Les Misérables", 11.9),
        ],
    );
    std::fs::write(thumbs.path().join("9782253096337.jpg"), b"front").unwrap();
    std::fs::write(thumbs.path().join("9782253096337_1.jpg"), b"back").unwrap();

    let store = InMemoryStore::new();
    let mut job = job(&store, dumps.path(), Some(thumbs.path()));
    let summary = SyncEngine::new(&store)
        .update_objects(&mut job, None)
        .await
        .unwrap();

    assert_eq!(summary.checked_thumbs, 2);
    assert_eq!(summary.created_thumbs, 2);
    let key = CompositeKey::new("9782253096337", EntityKind::Product);
    assert_eq!(store.thumb(&key, 1).unwrap().1, b"back".to_vec());
    let with_covers = store.entity(EntityKind::Product, "9782253096337").unwrap();
    assert_eq!(with_covers.thumb_count, 2);
    let without = store.entity(EntityKind::Product, "9782070409228").unwrap();
    assert_eq!(without.thumb_count, 0);
}

#[tokio::test]
async fn missing_dump_directory_is_a_source_error() {
    let root = tempfile::tempdir().unwrap();
    let store = InMemoryStore::new();
    let mut job = job(&store, &root.path().join("absent"), None);

    let result = SyncEngine::new(&store).update_objects(&mut job, None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn two_dumps_of_one_date_stop_the_run_before_importing() {
    let dumps = tempfile::tempdir().unwrap();
    let records = [line("9782253096337", "Notre-Dame de Paris", 8.4)];
    write_dump(dumps.path(), "catalog_20240105.jsonl", &records);
    write_gz_dump(dumps.path(), "catalog_20240105.jsonl.gz", &records);

    let store = InMemoryStore::new();
    let mut job = job(&store, dumps.path(), None);
    let result = SyncEngine::new(&store).update_objects(&mut job, None).await;

    assert!(result.is_err());
    assert!(store.entities().is_empty());
    assert!(!store.event_kinds().contains(&Kind::SyncPartEnd));
}
