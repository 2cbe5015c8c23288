use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tally_core::{AggregateId, DomainError, Envelope, SNAPSHOT_NOTE, Snapshot};

use std::sync::Arc;

/// A record as the backing store holds it.
///
/// Shape: `{Id, Version, EventName, Event, Note, LatestVersion}`. `latest_version` is only
/// present on snapshot records. `id` is the partition key and `version` the sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Item {
    pub id: String,
    pub version: i64,
    pub event_name: String,
    pub event: Vec<u8>,
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<i64>,
}

impl From<Envelope> for Item {
    fn from(e: Envelope) -> Self {
        Self {
            id: e.id.into_string(),
            version: e.version,
            event_name: e.event_name,
            event: e.event,
            note: e.note,
            latest_version: None,
        }
    }
}

impl From<Item> for Envelope {
    fn from(item: Item) -> Self {
        Envelope {
            id: AggregateId::from(item.id),
            version: item.version,
            event_name: item.event_name,
            event: item.event,
            note: item.note,
        }
    }
}

impl From<Snapshot> for Item {
    fn from(s: Snapshot) -> Self {
        Self {
            id: s.id.snapshot_partition(),
            version: s.version,
            event_name: s.event_name,
            event: s.event,
            note: SNAPSHOT_NOTE.to_string(),
            latest_version: Some(s.latest_version),
        }
    }
}

impl TryFrom<Item> for Snapshot {
    type Error = DomainError;

    fn try_from(item: Item) -> Result<Self, Self::Error> {
        let id = tally_core::aggregate_id_from_snapshot_partition(&item.id)
            .ok_or_else(|| {
                DomainError::invariant(format!("'{}' is not a snapshot partition", item.id))
            })?
            .to_string();
        let latest_version = item.latest_version.ok_or_else(|| {
            DomainError::invariant(format!(
                "snapshot record {}@{} has no LatestVersion",
                item.id, item.version
            ))
        })?;

        Ok(Snapshot {
            id: AggregateId::from(id),
            version: item.version,
            latest_version,
            event_name: item.event_name,
            event: item.event,
        })
    }
}

/// Predicate on the `Note` attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NoteFilter {
    #[default]
    Any,
    Equals(String),
    NotEquals(String),
}

impl NoteFilter {
    pub fn matches(&self, note: &str) -> bool {
        match self {
            NoteFilter::Any => true,
            NoteFilter::Equals(v) => v == note,
            NoteFilter::NotEquals(v) => v != note,
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// One page request against a single partition.
///
/// Items come back ordered by `version` in `order`. `limit` caps the matching items a
/// single page may hold; callers stop draining once they have collected that many.
/// `exclusive_start` resumes after the `last_evaluated` key of a previous page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyQuery {
    pub partition: String,
    pub min_version: Option<i64>,
    pub note: NoteFilter,
    pub order: SortOrder,
    pub limit: Option<usize>,
    pub exclusive_start: Option<i64>,
}

impl KeyQuery {
    pub fn partition(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            ..Self::default()
        }
    }

    pub fn min_version(mut self, version: i64) -> Self {
        self.min_version = Some(version);
        self
    }

    pub fn note(mut self, note: NoteFilter) -> Self {
        self.note = note;
        self
    }

    /// Highest version first, one item.
    pub fn latest(mut self) -> Self {
        self.order = SortOrder::Descending;
        self.limit = Some(1);
        self
    }

    pub fn exclusive_start(mut self, version: Option<i64>) -> Self {
        self.exclusive_start = version;
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<Item>,
    /// Sort key to resume from, or `None` when the query is exhausted.
    pub last_evaluated: Option<i64>,
}

/// Backing store failure.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Conditional insert rejected: the sort key already exists in the partition.
    #[error("conditional check failed: record already exists")]
    ConditionalCheckFailed,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("backend lock poisoned")]
    Poisoned,

    /// A stored record could not be mapped back to an item.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Key-sorted, conditionally writable record store.
///
/// Records are addressed by a string partition key (`Item::id`) and an integer sort key
/// (`Item::version`).
///
/// ## Requirements
///
/// Implementations must:
/// - make `put_if_absent` a compare-and-insert: of any number of concurrent writers to the
///   same `(id, version)`, exactly one succeeds and the rest get
///   `BackendError::ConditionalCheckFailed`
/// - never update or delete a stored record
/// - return query results ordered by `version` in the requested order, split into pages
///   that the caller drains through `exclusive_start`
#[async_trait]
pub trait KeyedStore: Send + Sync {
    async fn put_if_absent(&self, item: Item) -> Result<(), BackendError>;

    async fn query_page(&self, query: &KeyQuery) -> Result<Page, BackendError>;
}

#[async_trait]
impl<S> KeyedStore for Arc<S>
where
    S: KeyedStore + ?Sized,
{
    async fn put_if_absent(&self, item: Item) -> Result<(), BackendError> {
        (**self).put_if_absent(item).await
    }

    async fn query_page(&self, query: &KeyQuery) -> Result<Page, BackendError> {
        (**self).query_page(query).await
    }
}
