use rusqlite_migration::{M, Migrations};

pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "CREATE TABLE providers (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT NOT NULL,
                local_class     TEXT NOT NULL UNIQUE,
                is_active       INTEGER NOT NULL DEFAULT 1,
                api_key         TEXT
            );

            CREATE TABLE venue_providers (
                id                          INTEGER PRIMARY KEY AUTOINCREMENT,
                provider_id                 INTEGER NOT NULL,
                venue_id                    INTEGER NOT NULL,
                venue_id_at_offer_provider  TEXT NOT NULL,
                last_sync_date              TEXT,
                is_active                   INTEGER NOT NULL DEFAULT 1,
                sync_worker_id              TEXT,
                UNIQUE (provider_id, venue_id),
                FOREIGN KEY (provider_id) REFERENCES providers(id)
            );

            CREATE TABLE entities (
                id                          INTEGER PRIMARY KEY AUTOINCREMENT,
                kind                        TEXT NOT NULL,
                external_id                 TEXT,
                last_provider_id            INTEGER,
                last_modified_at_provider   TEXT,
                thumb_count                 INTEGER NOT NULL DEFAULT 0,
                data_json                   TEXT NOT NULL,
                UNIQUE (kind, external_id),
                FOREIGN KEY (last_provider_id) REFERENCES providers(id)
            );

            CREATE TABLE local_provider_events (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                provider_id     INTEGER NOT NULL,
                kind            TEXT NOT NULL,
                date            TEXT NOT NULL,
                payload         TEXT,
                FOREIGN KEY (provider_id) REFERENCES providers(id)
            );

            CREATE INDEX idx_events_provider_kind_date
                ON local_provider_events(provider_id, kind, date);",
        ),
        M::up(
            "CREATE TABLE thumbs (
                entity_key      TEXT NOT NULL,
                idx             INTEGER NOT NULL,
                date            TEXT NOT NULL,
                bytes           BLOB NOT NULL,
                PRIMARY KEY (entity_key, idx)
            );",
        ),
    ])
}
