//! Record-store capability.
//!
//! The portal does not own its relational records; it consumes an external
//! record service through the [`RecordStore`] trait. The default adapter
//! ([`PgRecordStore`]) maps that capability onto a single Postgres table of
//! JSONB field bags:
//!
//! ```sql
//! CREATE TABLE records (
//!     collection TEXT NOT NULL,
//!     id         TEXT NOT NULL,
//!     fields     JSONB NOT NULL DEFAULT '{}'::jsonb,
//!     PRIMARY KEY (collection, id)
//! );
//! ```
//!
//! Every lookup binds its values as SQL parameters; user input (notably the
//! email used for login lookups) never reaches the query text itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use std::fmt;
use std::time::Duration;

/// One record in a collection: an opaque id plus a JSON bag of fields.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Record {
    pub id: String,
    pub fields: Value,
}

impl Record {
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Linked-record ids stored under `name`. Link fields are arrays of id
    /// strings; anything else reads as no links.
    pub fn links(&self, name: &str) -> Vec<String> {
        match self.fields.get(name).and_then(Value::as_array) {
            Some(ids) => ids
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn first_link(&self, name: &str) -> Option<String> {
        self.links(name).into_iter().next()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Exact,
    /// Case-insensitive, whitespace-trimmed comparison. Used for email keys.
    FoldCase,
}

/// Parameterized field filter. Built as a value object so the adapter can
/// bind `field` and `value` instead of splicing them into query text.
#[derive(Debug, Clone)]
pub struct Filter {
    field: String,
    value: String,
    mode: MatchMode,
}

impl Filter {
    pub fn eq<F: Into<String>, V: Into<String>>(field: F, value: V) -> Filter {
        Filter {
            field: field.into(),
            value: value.into(),
            mode: MatchMode::Exact,
        }
    }

    pub fn eq_ci<F: Into<String>, V: Into<String>>(field: F, value: V) -> Filter {
        Filter {
            field: field.into(),
            value: value.into(),
            mode: MatchMode::FoldCase,
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Whether `record` satisfies this filter, using the same semantics the
    /// SQL adapter applies server-side.
    pub fn matches(&self, record: &Record) -> bool {
        match record.field_str(&self.field) {
            Some(actual) => match self.mode {
                MatchMode::Exact => actual == self.value,
                MatchMode::FoldCase => {
                    actual.trim().to_ascii_lowercase() == self.value.trim().to_ascii_lowercase()
                }
            },
            None => false,
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    Backend(String),
    Timeout,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(message) => write!(f, "record store error: {}", message),
            StoreError::Timeout => write!(f, "record store call timed out"),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Read/update access to the external record collections.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Find records in `collection`, optionally filtered, optionally bounded
    /// to the first `limit` records.
    async fn find(
        &self,
        collection: &str,
        filter: Option<Filter>,
        limit: Option<u32>,
    ) -> Result<Vec<Record>, StoreError>;

    async fn find_by_id(&self, collection: &str, id: &str)
        -> Result<Option<Record>, StoreError>;

    /// Merge `fields` into the record's field bag. Returns the updated
    /// record, or `None` when the id is unknown.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<Option<Record>, StoreError>;
}

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Postgres adapter over the `records` table. Each call runs under a bounded
/// timeout so a stalled backend fails the request instead of hanging it.
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, sqlx::Error>> + Send,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(CALL_TIMEOUT, fut).await {
            Ok(res) => res.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

fn filter_clause(mode: MatchMode) -> &'static str {
    match mode {
        MatchMode::Exact => "AND fields->>$2 = $3",
        MatchMode::FoldCase => "AND lower(btrim(fields->>$2)) = lower(btrim($3))",
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find(
        &self,
        collection: &str,
        filter: Option<Filter>,
        limit: Option<u32>,
    ) -> Result<Vec<Record>, StoreError> {
        let rows = match (filter, limit) {
            (Some(f), Some(n)) => {
                let sql = format!(
                    "SELECT id, fields FROM records WHERE collection = $1 {} ORDER BY id LIMIT $4",
                    filter_clause(f.mode())
                );
                self.bounded(
                    sqlx::query_as::<_, Record>(&sql)
                        .bind(collection)
                        .bind(f.field().to_string())
                        .bind(f.value().to_string())
                        .bind(n as i64)
                        .fetch_all(&self.pool),
                )
                .await?
            }
            (Some(f), None) => {
                let sql = format!(
                    "SELECT id, fields FROM records WHERE collection = $1 {} ORDER BY id",
                    filter_clause(f.mode())
                );
                self.bounded(
                    sqlx::query_as::<_, Record>(&sql)
                        .bind(collection)
                        .bind(f.field().to_string())
                        .bind(f.value().to_string())
                        .fetch_all(&self.pool),
                )
                .await?
            }
            (None, Some(n)) => {
                self.bounded(
                    sqlx::query_as::<_, Record>(
                        "SELECT id, fields FROM records WHERE collection = $1 ORDER BY id LIMIT $2",
                    )
                    .bind(collection)
                    .bind(n as i64)
                    .fetch_all(&self.pool),
                )
                .await?
            }
            (None, None) => {
                self.bounded(
                    sqlx::query_as::<_, Record>(
                        "SELECT id, fields FROM records WHERE collection = $1 ORDER BY id",
                    )
                    .bind(collection)
                    .fetch_all(&self.pool),
                )
                .await?
            }
        };
        Ok(rows)
    }

    async fn find_by_id(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Record>, StoreError> {
        self.bounded(
            sqlx::query_as::<_, Record>(
                "SELECT id, fields FROM records WHERE collection = $1 AND id = $2 LIMIT 1",
            )
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool),
        )
        .await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<Option<Record>, StoreError> {
        self.bounded(
            sqlx::query_as::<_, Record>(
                "UPDATE records SET fields = fields || $3 \
                 WHERE collection = $1 AND id = $2 RETURNING id, fields",
            )
            .bind(collection)
            .bind(id)
            .bind(fields)
            .fetch_optional(&self.pool),
        )
        .await
    }
}
