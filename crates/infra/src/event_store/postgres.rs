//! Postgres-backed keyed store.
//!
//! One table holds every partition. The primary key `(id, version)` is the conditional
//! write: a second insert of the same pair violates it and is reported as
//! `BackendError::ConditionalCheckFailed`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | BackendError | Scenario |
//! |------------|----------------------|--------------|----------|
//! | Database (unique violation) | `23505` | `ConditionalCheckFailed` | `(id, version)` already stored |
//! | anything else | any | `Database` | passed through unmodified |
//!
//! ## Thread Safety
//!
//! `PostgresKeyedStore` is `Send + Sync` and can be shared across tasks.
//! All operations use the SQLx connection pool which handles thread-safe connection management.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::{Span, field, instrument};

use super::r#trait::{BackendError, Item, KeyQuery, KeyedStore, NoteFilter, Page, SortOrder};
use crate::config::EventStoreConfig;

/// Postgres-backed append-only keyed store.
///
/// Rows are never updated or deleted. Queries are keyset-paginated on `version` with
/// `page_size` rows per round trip.
#[derive(Debug, Clone)]
pub struct PostgresKeyedStore {
    pool: Arc<PgPool>,
    table: String,
    page_size: usize,
}

impl PostgresKeyedStore {
    /// Create a store over an existing pool.
    ///
    /// `table` must be a plain SQL identifier; `EventStoreConfig` validates it.
    pub fn new(pool: PgPool, table: impl Into<String>, page_size: usize) -> Self {
        Self {
            pool: Arc::new(pool),
            table: table.into(),
            page_size: page_size.max(1),
        }
    }

    /// Connect using `config.database_url` and make sure the table exists.
    pub async fn connect(config: &EventStoreConfig) -> Result<Self, BackendError> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            BackendError::Database(sqlx::Error::Configuration(
                "DATABASE_URL is required for the postgres backend".into(),
            ))
        })?;

        let pool = PgPoolOptions::new().connect(url).await?;
        let store = Self::new(pool, config.table.clone(), config.page_size);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the backing table if it does not exist yet.
    #[instrument(skip(self), fields(table = %self.table), err)]
    pub async fn ensure_schema(&self) -> Result<(), BackendError> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT NOT NULL,
                version BIGINT NOT NULL,
                event_name TEXT NOT NULL,
                event BYTEA NOT NULL,
                note TEXT NOT NULL DEFAULT '',
                latest_version BIGINT,
                recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (id, version)
            )
            "#,
            table = self.table
        );
        sqlx::query(&ddl).execute(&*self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyedStore for PostgresKeyedStore {
    #[instrument(
        skip(self, item),
        fields(partition = %item.id, version = item.version),
        err
    )]
    async fn put_if_absent(&self, item: Item) -> Result<(), BackendError> {
        let sql = format!(
            r#"
            INSERT INTO {} (id, version, event_name, event, note, latest_version)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
            self.table
        );

        sqlx::query(&sql)
            .bind(&item.id)
            .bind(item.version)
            .bind(&item.event_name)
            .bind(&item.event)
            .bind(&item.note)
            .bind(item.latest_version)
            .execute(&*self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    BackendError::ConditionalCheckFailed
                } else {
                    BackendError::Database(e)
                }
            })?;

        Ok(())
    }

    #[instrument(
        skip(self, query),
        fields(partition = %query.partition, item_count = field::Empty),
        err
    )]
    async fn query_page(&self, query: &KeyQuery) -> Result<Page, BackendError> {
        let (order, resume) = match query.order {
            SortOrder::Ascending => ("ASC", ">"),
            SortOrder::Descending => ("DESC", "<"),
        };
        let (note_clause, note_value) = match &query.note {
            NoteFilter::Any => ("TRUE", None),
            NoteFilter::Equals(v) => ("note = $4", Some(v.as_str())),
            NoteFilter::NotEquals(v) => ("note <> $4", Some(v.as_str())),
        };
        let fetch = query.limit.unwrap_or(self.page_size).min(self.page_size);

        // One extra row tells us whether another page follows.
        let sql = format!(
            r#"
            SELECT id, version, event_name, event, note, latest_version
            FROM {table}
            WHERE id = $1
                AND ($2::BIGINT IS NULL OR version >= $2)
                AND ($3::BIGINT IS NULL OR version {resume} $3)
                AND ($4::TEXT IS NULL OR {note_clause})
            ORDER BY version {order}
            LIMIT $5
            "#,
            table = self.table,
        );

        let rows = sqlx::query(&sql)
            .bind(&query.partition)
            .bind(query.min_version)
            .bind(query.exclusive_start)
            .bind(note_value)
            .bind((fetch + 1) as i64)
            .fetch_all(&*self.pool)
            .await?;

        let has_more = rows.len() > fetch;
        let mut items: Vec<Item> = Vec::with_capacity(fetch);
        for row in rows.iter().take(fetch) {
            items.push(ItemRow::from_row(row)?.into());
        }

        Span::current().record("item_count", items.len());
        let last_evaluated = if has_more {
            items.last().map(|i| i.version)
        } else {
            None
        };
        Ok(Page {
            items,
            last_evaluated,
        })
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct ItemRow {
    id: String,
    version: i64,
    event_name: String,
    event: Vec<u8>,
    note: String,
    latest_version: Option<i64>,
}

impl<'r> FromRow<'r, PgRow> for ItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ItemRow {
            id: row.try_get("id")?,
            version: row.try_get("version")?,
            event_name: row.try_get("event_name")?,
            event: row.try_get("event")?,
            note: row.try_get("note")?,
            latest_version: row.try_get("latest_version")?,
        })
    }
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Item {
            id: row.id,
            version: row.version,
            event_name: row.event_name,
            event: row.event,
            note: row.note,
            latest_version: row.latest_version,
        }
    }
}
