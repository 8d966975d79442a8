use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use catalog_sync::{
    CompositeKey, Entity, EntityData, EntityKind, EntityStore, EventLog, LocalProviderEvent,
    LocalProviderEventKind, ProviderDirectory, ProviderRecord, StoreError, ThumbStore, Timestamp,
    VenueProvider,
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::schema;

const ENTITY_COLUMNS: &str = "id, kind, external_id, last_provider_id, \
     last_modified_at_provider, thumb_count, data_json";

const PROVIDER_COLUMNS: &str = "id, name, local_class, is_active, api_key";

const VENUE_PROVIDER_COLUMNS: &str = "id, provider_id, venue_id, venue_id_at_offer_provider, \
     last_sync_date, is_active, sync_worker_id";

const EVENT_COLUMNS: &str = "id, provider_id, kind, date, payload";

/// A SQLite-backed catalog implementing every storage port of the sync engine.
pub struct CatalogStore {
    conn: Mutex<Connection>,
}

impl CatalogStore {
    /// Open a store backed by a file on disk, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Database(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let mut store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&mut self) -> Result<(), StoreError> {
        let conn = self.conn.get_mut().map_err(|_| poisoned())?;
        schema::migrations()
            .to_latest(conn)
            .map_err(|e| StoreError::Migration(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| poisoned())
    }

    /// Create the provider row for `local_class` if missing, then set its
    /// active flag.
    pub fn set_provider_active(
        &self,
        local_class: &str,
        is_active: bool,
    ) -> Result<ProviderRecord, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO providers (name, local_class, is_active) VALUES (?1, ?1, ?2)
             ON CONFLICT (local_class) DO UPDATE SET is_active = excluded.is_active",
            rusqlite::params![local_class, is_active],
        )
        .map_err(db_err)?;

        find_provider(&conn, local_class)?
            .ok_or_else(|| StoreError::NotFound(format!("provider {local_class}")))
    }

    /// Every provider row, ordered by local class.
    pub fn list_providers(&self) -> Result<Vec<ProviderRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PROVIDER_COLUMNS} FROM providers ORDER BY local_class"
            ))
            .map_err(db_err)?;

        let rows = stmt.query_map([], row_to_provider).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Bind a provider to a venue. The binding starts active and never synced.
    pub fn add_venue_provider(
        &self,
        provider_id: i64,
        venue_id: i64,
        venue_id_at_offer_provider: &str,
    ) -> Result<VenueProvider, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO venue_providers (provider_id, venue_id, venue_id_at_offer_provider)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![provider_id, venue_id, venue_id_at_offer_provider],
        )
        .map_err(db_err)?;

        let id = conn.last_insert_rowid();
        find_venue_provider(&conn, id)?
            .ok_or_else(|| StoreError::NotFound(format!("venue provider {id}")))
    }

    pub fn venue_providers_of(&self, provider_id: i64) -> Result<Vec<VenueProvider>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {VENUE_PROVIDER_COLUMNS} FROM venue_providers
                 WHERE provider_id = ?1 ORDER BY venue_id"
            ))
            .map_err(db_err)?;

        let rows = stmt
            .query_map([provider_id], row_to_venue_provider)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    /// Number of stored entities of `kind`.
    pub fn count_entities(&self, kind: EntityKind) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entities WHERE kind = ?1",
                [kind.name()],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl EntityStore for CatalogStore {
    async fn find_by_external_id(
        &self,
        kind: EntityKind,
        external_id: &str,
    ) -> Result<Option<Entity>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE kind = ?1 AND external_id = ?2"),
            rusqlite::params![kind.name(), external_id],
            row_to_entity,
        )
        .optional()
        .map_err(db_err)
    }

    async fn bulk_insert(&self, entities: &[Entity]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO entities (kind, external_id, last_provider_id,
                        last_modified_at_provider, thumb_count, data_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(db_err)?;

            for entity in entities {
                stmt.execute(rusqlite::params![
                    entity.kind().name(),
                    entity.external_id,
                    entity.last_provider_id,
                    entity.last_modified_at_provider.map(format_timestamp),
                    entity.thumb_count,
                    data_json(&entity.data)?,
                ])
                .map_err(db_err)?;
            }
        }
        tx.commit().map_err(db_err)?;

        debug!(count = entities.len(), "inserted entities");
        Ok(())
    }

    async fn bulk_update(&self, entities: &[Entity]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "UPDATE entities
                     SET last_provider_id = ?1, last_modified_at_provider = ?2,
                         thumb_count = ?3, data_json = ?4
                     WHERE kind = ?5 AND external_id = ?6",
                )
                .map_err(db_err)?;

            for entity in entities {
                let changed = stmt
                    .execute(rusqlite::params![
                        entity.last_provider_id,
                        entity.last_modified_at_provider.map(format_timestamp),
                        entity.thumb_count,
                        data_json(&entity.data)?,
                        entity.kind().name(),
                        entity.external_id,
                    ])
                    .map_err(db_err)?;
                if changed == 0 {
                    return Err(StoreError::NotFound(format!(
                        "{} {}",
                        entity.kind(),
                        entity.external_id.as_deref().unwrap_or("<none>")
                    )));
                }
            }
        }
        tx.commit().map_err(db_err)?;

        debug!(count = entities.len(), "updated entities");
        Ok(())
    }

    async fn latest_watermark(&self, kind: EntityKind) -> Result<Option<Timestamp>, StoreError> {
        let conn = self.conn()?;
        // Fixed-width UTC text, so the lexical maximum is the latest instant.
        let latest: Option<String> = conn
            .query_row(
                "SELECT MAX(last_modified_at_provider) FROM entities WHERE kind = ?1",
                [kind.name()],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        latest
            .map(|text| timestamp_column(0, &text))
            .transpose()
            .map_err(db_err)
    }
}

#[async_trait::async_trait]
impl EventLog for CatalogStore {
    async fn log_event(
        &self,
        provider_id: i64,
        kind: LocalProviderEventKind,
        payload: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO local_provider_events (provider_id, kind, date, payload)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                provider_id,
                kind.as_str(),
                format_timestamp(Utc::now()),
                payload
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn latest_event_of_kind(
        &self,
        provider_id: i64,
        kind: LocalProviderEventKind,
        within_days: u32,
    ) -> Result<Option<LocalProviderEvent>, StoreError> {
        let since = Utc::now() - Duration::days(i64::from(within_days));
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM local_provider_events
                 WHERE provider_id = ?1 AND kind = ?2 AND date >= ?3
                 ORDER BY date DESC, id DESC
                 LIMIT 1"
            ),
            rusqlite::params![provider_id, kind.as_str(), format_timestamp(since)],
            row_to_event,
        )
        .optional()
        .map_err(db_err)
    }

    async fn recent_events(
        &self,
        provider_id: i64,
        limit: usize,
    ) -> Result<Vec<LocalProviderEvent>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM local_provider_events
                 WHERE provider_id = ?1
                 ORDER BY date DESC, id DESC
                 LIMIT ?2"
            ))
            .map_err(db_err)?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(rusqlite::params![provider_id, limit], row_to_event)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}

#[async_trait::async_trait]
impl ProviderDirectory for CatalogStore {
    async fn provider_by_class(
        &self,
        local_class: &str,
    ) -> Result<Option<ProviderRecord>, StoreError> {
        let conn = self.conn()?;
        find_provider(&conn, local_class)
    }

    async fn venue_provider(&self, id: i64) -> Result<Option<VenueProvider>, StoreError> {
        let conn = self.conn()?;
        find_venue_provider(&conn, id)
    }

    async fn save_venue_provider(&self, venue_provider: &VenueProvider) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE venue_providers
                 SET venue_id_at_offer_provider = ?1, last_sync_date = ?2,
                     is_active = ?3, sync_worker_id = ?4
                 WHERE id = ?5",
                rusqlite::params![
                    venue_provider.venue_id_at_offer_provider,
                    venue_provider.last_sync_date.map(format_timestamp),
                    venue_provider.is_active,
                    venue_provider.sync_worker_id,
                    venue_provider.id,
                ],
            )
            .map_err(db_err)?;

        if changed == 0 {
            return Err(StoreError::NotFound(format!(
                "venue provider {}",
                venue_provider.id
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ThumbStore for CatalogStore {
    async fn thumb_date(
        &self,
        key: &CompositeKey,
        index: usize,
    ) -> Result<Option<Timestamp>, StoreError> {
        let conn = self.conn()?;
        let date: Option<String> = conn
            .query_row(
                "SELECT date FROM thumbs WHERE entity_key = ?1 AND idx = ?2",
                rusqlite::params![key.as_str(), thumb_index(index)?],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        date.map(|date| {
            parse_timestamp(&date).map_err(|e| StoreError::Serialization(e.to_string()))
        })
        .transpose()
    }

    async fn replace_thumb(
        &self,
        key: &CompositeKey,
        index: usize,
        bytes: &[u8],
        date: Timestamp,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO thumbs (entity_key, idx, date, bytes) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                key.as_str(),
                thumb_index(index)?,
                format_timestamp(date),
                bytes
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

fn find_provider(
    conn: &Connection,
    local_class: &str,
) -> Result<Option<ProviderRecord>, StoreError> {
    conn.query_row(
        &format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE local_class = ?1"),
        [local_class],
        row_to_provider,
    )
    .optional()
    .map_err(db_err)
}

fn find_venue_provider(conn: &Connection, id: i64) -> Result<Option<VenueProvider>, StoreError> {
    conn.query_row(
        &format!("SELECT {VENUE_PROVIDER_COLUMNS} FROM venue_providers WHERE id = ?1"),
        [id],
        row_to_venue_provider,
    )
    .optional()
    .map_err(db_err)
}

fn row_to_provider(row: &rusqlite::Row) -> rusqlite::Result<ProviderRecord> {
    Ok(ProviderRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        local_class: row.get(2)?,
        is_active: row.get(3)?,
        api_key: row.get(4)?,
    })
}

fn row_to_venue_provider(row: &rusqlite::Row) -> rusqlite::Result<VenueProvider> {
    let last_sync_date: Option<String> = row.get(4)?;
    Ok(VenueProvider {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        venue_id: row.get(2)?,
        venue_id_at_offer_provider: row.get(3)?,
        last_sync_date: last_sync_date
            .map(|date| timestamp_column(4, &date))
            .transpose()?,
        is_active: row.get(5)?,
        sync_worker_id: row.get(6)?,
    })
}

fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<Entity> {
    let kind: String = row.get(1)?;
    let modified_at: Option<String> = row.get(4)?;
    let data_json: String = row.get(6)?;

    let data: EntityData = serde_json::from_str(&data_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    if data.kind().name() != kind {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("payload kind {} stored under {kind}", data.kind()).into(),
        ));
    }

    Ok(Entity {
        id: row.get(0)?,
        external_id: row.get(2)?,
        last_provider_id: row.get(3)?,
        last_modified_at_provider: modified_at
            .map(|date| timestamp_column(4, &date))
            .transpose()?,
        thumb_count: row.get(5)?,
        data,
    })
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<LocalProviderEvent> {
    let kind: String = row.get(2)?;
    let date: String = row.get(3)?;

    let kind = LocalProviderEventKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown event kind {kind:?}").into(),
        )
    })?;

    Ok(LocalProviderEvent {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        kind,
        date: timestamp_column(3, &date)?,
        payload: row.get(4)?,
    })
}

fn data_json(data: &EntityData) -> Result<String, StoreError> {
    serde_json::to_string(data).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn thumb_index(index: usize) -> Result<i64, StoreError> {
    i64::try_from(index).map_err(|e| StoreError::Database(e.to_string()))
}

/// Fixed-width RFC 3339 so that text comparison in SQL orders by time.
fn format_timestamp(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<Timestamp, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text).map(|ts| ts.with_timezone(&Utc))
}

fn timestamp_column(index: usize, text: &str) -> rusqlite::Result<Timestamp> {
    parse_timestamp(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn poisoned() -> StoreError {
    StoreError::Database("connection lock poisoned".to_owned())
}
