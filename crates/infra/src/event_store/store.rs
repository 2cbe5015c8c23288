//! The event store engine: conditional appends, history queries and projection.

use thiserror::Error;
use tracing::{Span, debug, field, instrument};

use tally_core::{AggregateId, DomainError, Envelope, SNAPSHOT_NOTE, Snapshot};
use tally_events::{AggregateError, AggregatorRegistry, CodecError, aggregate_envelopes};

use super::r#trait::{BackendError, Item, KeyQuery, KeyedStore, NoteFilter};
use crate::context::{Interrupted, OperationContext};

/// Event store operation error.
///
/// ## Error Categories
///
/// - **EventAlreadyExists**: conditional-write conflict; pick another version and retry
/// - **NoEventFound**: the query matched nothing (not a backend failure)
/// - **AggregatorNotFound**: no aggregator registered for an `event_name`
/// - **Aggregate**: the fold rejected its input or a payload failed to decode
/// - **Codec**: a caller-side payload could not be encoded
/// - **InvalidRecord**: the record violates a data-model invariant and was not written
/// - **Backend**: anything else the backing store reported, unmodified
/// - **Cancelled / DeadlineExceeded**: the operation context ended first
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("event already exists for ID {id} and Version {version}")]
    EventAlreadyExists { id: AggregateId, version: i64 },

    #[error("no event found")]
    NoEventFound,

    #[error("no aggregator registered for event name '{name}'")]
    AggregatorNotFound { name: String },

    #[error(transparent)]
    Aggregate(AggregateError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("invalid record: {0}")]
    InvalidRecord(#[from] DomainError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

impl From<AggregateError> for EventStoreError {
    fn from(err: AggregateError) -> Self {
        match err {
            AggregateError::AggregatorNotFound { name } => Self::AggregatorNotFound { name },
            other => Self::Aggregate(other),
        }
    }
}

impl From<Interrupted> for EventStoreError {
    fn from(err: Interrupted) -> Self {
        match err {
            Interrupted::Cancelled => Self::Cancelled,
            Interrupted::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// Per-aggregate event store over a conditional-write keyed backend.
///
/// ## Concurrency
///
/// The engine takes no locks. Appends to the same `(id, version)` race on the backend's
/// conditional insert: one wins, the others get `EventAlreadyExists`. Nothing is retried
/// here; callers that need a fresh slot re-read `query_latest_version` and try again.
///
/// ## Snapshots
///
/// Snapshots are stored in a partition derived from the aggregate id
/// (`<id>#SNAPSHOT`), never in the raw event partition. `project` starts from the newest
/// snapshot and folds only the raw events recorded after it.
#[derive(Debug, Clone)]
pub struct EventStore<S> {
    backend: S,
    registry: AggregatorRegistry,
}

impl<S> EventStore<S>
where
    S: KeyedStore,
{
    pub fn new(backend: S, registry: AggregatorRegistry) -> Self {
        Self { backend, registry }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn registry(&self) -> &AggregatorRegistry {
        &self.registry
    }

    /// Append one envelope under `(id, version)`.
    ///
    /// Fails with `EventAlreadyExists` if that slot is taken; the stored record is left
    /// untouched. The reserved snapshot note cannot be used on raw events.
    #[instrument(
        skip(self, ctx, envelope),
        fields(
            operation = "append",
            aggregate_id = %envelope.id,
            version = envelope.version,
            event_name = %envelope.event_name
        ),
        err
    )]
    pub async fn append(&self, ctx: &OperationContext, envelope: Envelope) -> EventStoreResult<()> {
        envelope.validate()?;
        if envelope.is_snapshot() {
            return Err(DomainError::invariant(format!(
                "note '{SNAPSHOT_NOTE}' is reserved for snapshot records"
            ))
            .into());
        }

        let id = envelope.id.clone();
        self.put(ctx, Item::from(envelope), id).await
    }

    /// Persist a snapshot in the aggregate's snapshot partition.
    ///
    /// Same conditional-write semantics as `append`; earlier snapshots are kept.
    #[instrument(
        skip(self, ctx, snapshot),
        fields(
            operation = "snapshot",
            aggregate_id = %snapshot.id,
            version = snapshot.version,
            latest_version = snapshot.latest_version
        ),
        err
    )]
    pub async fn snapshot(&self, ctx: &OperationContext, snapshot: Snapshot) -> EventStoreResult<()> {
        snapshot.validate()?;
        let id = snapshot.id.clone();
        self.put(ctx, Item::from(snapshot), id).await
    }

    /// All raw events of an aggregate, oldest first.
    #[instrument(skip(self, ctx), fields(operation = "query_all", aggregate_id = %id), err)]
    pub async fn query_all(
        &self,
        ctx: &OperationContext,
        id: &AggregateId,
    ) -> EventStoreResult<Vec<Envelope>> {
        let query = KeyQuery::partition(id.as_str()).note(raw_events_only());
        self.query_envelopes(ctx, query).await
    }

    /// Raw events with `version >= version`, oldest first.
    #[instrument(
        skip(self, ctx),
        fields(operation = "query_since_version", aggregate_id = %id),
        err
    )]
    pub async fn query_since_version(
        &self,
        ctx: &OperationContext,
        id: &AggregateId,
        version: i64,
    ) -> EventStoreResult<Vec<Envelope>> {
        let query = KeyQuery::partition(id.as_str())
            .min_version(version)
            .note(raw_events_only());
        self.query_envelopes(ctx, query).await
    }

    /// Highest version stored for the aggregate.
    ///
    /// Callers compute the next free slot as `latest + 1`.
    #[instrument(
        skip(self, ctx),
        fields(operation = "query_latest_version", aggregate_id = %id),
        err
    )]
    pub async fn query_latest_version(
        &self,
        ctx: &OperationContext,
        id: &AggregateId,
    ) -> EventStoreResult<i64> {
        let items = self.query(ctx, KeyQuery::partition(id.as_str()).latest()).await?;
        items
            .first()
            .map(|item| item.version)
            .ok_or(EventStoreError::NoEventFound)
    }

    /// Newest snapshot of the aggregate, or `NoEventFound`.
    #[instrument(
        skip(self, ctx),
        fields(operation = "latest_snapshot", aggregate_id = %id),
        err
    )]
    pub async fn latest_snapshot(
        &self,
        ctx: &OperationContext,
        id: &AggregateId,
    ) -> EventStoreResult<Snapshot> {
        let query = KeyQuery::partition(id.snapshot_partition())
            .note(NoteFilter::Equals(SNAPSHOT_NOTE.to_string()))
            .latest();
        let item = self
            .query(ctx, query)
            .await?
            .into_iter()
            .next()
            .ok_or(EventStoreError::NoEventFound)?;
        Ok(Snapshot::try_from(item)?)
    }

    /// Current state of the aggregate as one synthesized envelope.
    ///
    /// Starts from the newest snapshot when there is one (its payload re-wrapped just
    /// before the first unfolded event) and folds the raw events recorded since; without
    /// a snapshot the full history is folded. The result's version is the next free slot.
    #[instrument(
        skip(self, ctx),
        fields(
            operation = "project",
            aggregate_id = %id,
            from_snapshot = field::Empty,
            event_count = field::Empty
        ),
        err
    )]
    pub async fn project(&self, ctx: &OperationContext, id: &AggregateId) -> EventStoreResult<Envelope> {
        let span = Span::current();

        let snapshot = match self.latest_snapshot(ctx, id).await {
            Ok(snapshot) => Some(snapshot),
            Err(EventStoreError::NoEventFound) => None,
            Err(e) => return Err(e),
        };

        let envelopes = match snapshot {
            None => {
                span.record("from_snapshot", false);
                self.query_all(ctx, id).await?
            }
            Some(snapshot) => {
                span.record("from_snapshot", true);
                let mut envelopes = vec![snapshot.to_envelope()];
                match self.query_since_version(ctx, id, snapshot.latest_version).await {
                    Ok(since) => envelopes.extend(since),
                    Err(EventStoreError::NoEventFound) => {
                        debug!(
                            latest_version = snapshot.latest_version,
                            "no events since snapshot"
                        );
                    }
                    Err(e) => return Err(e),
                }
                envelopes
            }
        };

        span.record("event_count", envelopes.len());
        Ok(aggregate_envelopes(&self.registry, &envelopes)?)
    }

    /// Fold the full raw history, ignoring snapshots.
    #[instrument(
        skip(self, ctx),
        fields(operation = "project_from_beginning", aggregate_id = %id),
        err
    )]
    pub async fn project_from_beginning(
        &self,
        ctx: &OperationContext,
        id: &AggregateId,
    ) -> EventStoreResult<Envelope> {
        let envelopes = self.query_all(ctx, id).await?;
        Ok(aggregate_envelopes(&self.registry, &envelopes)?)
    }

    /// Project the aggregate and persist the result as its newest snapshot.
    pub async fn snapshot_current(
        &self,
        ctx: &OperationContext,
        id: &AggregateId,
    ) -> EventStoreResult<Snapshot> {
        let projected = self.project(ctx, id).await?;
        let snapshot = Snapshot::from_projection(projected);
        self.snapshot(ctx, snapshot.clone()).await?;
        Ok(snapshot)
    }

    async fn put(&self, ctx: &OperationContext, item: Item, id: AggregateId) -> EventStoreResult<()> {
        let version = item.version;
        match ctx.run(self.backend.put_if_absent(item)).await? {
            Ok(()) => Ok(()),
            Err(BackendError::ConditionalCheckFailed) => {
                Err(EventStoreError::EventAlreadyExists { id, version })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn query_envelopes(
        &self,
        ctx: &OperationContext,
        query: KeyQuery,
    ) -> EventStoreResult<Vec<Envelope>> {
        let items = self.query(ctx, query).await?;
        Ok(items.into_iter().map(Envelope::from).collect())
    }

    /// Run `query` to exhaustion, following every page.
    ///
    /// Returns `NoEventFound` instead of an empty vector.
    async fn query(&self, ctx: &OperationContext, query: KeyQuery) -> EventStoreResult<Vec<Item>> {
        let wanted = query.limit.unwrap_or(usize::MAX);
        let mut items = Vec::new();
        let mut start = None;
        let mut pages = 0usize;

        loop {
            let page_query = query.clone().exclusive_start(start);
            let page = ctx.run(self.backend.query_page(&page_query)).await??;
            pages += 1;
            items.extend(page.items);

            if items.len() >= wanted {
                items.truncate(wanted);
                break;
            }
            match page.last_evaluated {
                Some(key) => start = Some(key),
                None => break,
            }
        }

        debug!(
            partition = %query.partition,
            pages,
            item_count = items.len(),
            "query drained"
        );

        if items.is_empty() {
            return Err(EventStoreError::NoEventFound);
        }
        Ok(items)
    }
}

fn raw_events_only() -> NoteFilter {
    NoteFilter::NotEquals(SNAPSHOT_NOTE.to_string())
}
