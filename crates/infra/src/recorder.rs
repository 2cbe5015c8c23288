//! Caller-side append helper.
//!
//! The engine never picks versions and never retries. `Recorder` does what a write
//! front-end has to: read the latest version, append at `latest + 1`, and retry a bounded
//! number of times when another writer takes that slot first.

use serde::Serialize;
use tracing::{instrument, warn};

use tally_core::{AggregateId, Envelope};
use tally_events::{HIT_POINTS_EVENT, HitPoints, LEVELS_EVENT, Level, PayloadCodec};

use crate::config::DEFAULT_MAX_APPEND_ATTEMPTS;
use crate::context::OperationContext;
use crate::event_store::{EventStore, EventStoreError, EventStoreResult, KeyedStore};

#[derive(Debug, Clone)]
pub struct Recorder<S, C> {
    store: EventStore<S>,
    codec: C,
    max_attempts: u32,
}

impl<S, C> Recorder<S, C>
where
    S: KeyedStore,
    C: PayloadCodec,
{
    pub fn new(store: EventStore<S>, codec: C) -> Self {
        Self {
            store,
            codec,
            max_attempts: DEFAULT_MAX_APPEND_ATTEMPTS,
        }
    }

    /// Attempts per record before `EventAlreadyExists` is returned (at least one).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn store(&self) -> &EventStore<S> {
        &self.store
    }

    /// Version the next event of `id` should take: `latest + 1`, or `0` for a new aggregate.
    pub async fn next_version(
        &self,
        ctx: &OperationContext,
        id: &AggregateId,
    ) -> EventStoreResult<i64> {
        match self.store.query_latest_version(ctx, id).await {
            Ok(latest) => Ok(latest + 1),
            Err(EventStoreError::NoEventFound) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Append already-encoded payload bytes at the next free version.
    #[instrument(skip(self, ctx, event), fields(aggregate_id = %id, event_name = %event_name), err)]
    pub async fn record(
        &self,
        ctx: &OperationContext,
        id: &AggregateId,
        event_name: &str,
        event: Vec<u8>,
        note: &str,
    ) -> EventStoreResult<Envelope> {
        id.validate()?;
        let mut attempt = 1;
        loop {
            let version = self.next_version(ctx, id).await?;
            let envelope = Envelope::new(id.clone(), version, event_name, event.clone())
                .with_note(note);

            match self.store.append(ctx, envelope.clone()).await {
                Ok(()) => return Ok(envelope),
                Err(EventStoreError::EventAlreadyExists { .. }) if attempt < self.max_attempts => {
                    warn!(attempt, version, "version already taken, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Encode `payload` with the recorder's codec and append it.
    pub async fn record_payload<T: Serialize>(
        &self,
        ctx: &OperationContext,
        id: &AggregateId,
        event_name: &str,
        payload: &T,
    ) -> EventStoreResult<Envelope> {
        let bytes = self.codec.encode(payload)?;
        self.record(ctx, id, event_name, bytes, "").await
    }

    /// Record a hit point change for the aggregate named by `hp.id` (a new one if empty).
    pub async fn record_hit_points(
        &self,
        ctx: &OperationContext,
        hp: &HitPoints,
    ) -> EventStoreResult<Envelope> {
        let id = aggregate_id_or_new(&hp.id)?;
        let bytes = self.codec.encode(hp)?;
        self.record(ctx, &id, HIT_POINTS_EVENT, bytes, &hp.note).await
    }

    /// Record level progress for the aggregate named by `level.id` (a new one if empty).
    pub async fn record_level(
        &self,
        ctx: &OperationContext,
        level: &Level,
    ) -> EventStoreResult<Envelope> {
        let id = aggregate_id_or_new(&level.id)?;
        self.record_payload(ctx, &id, LEVELS_EVENT, level).await
    }
}

fn aggregate_id_or_new(id: &str) -> EventStoreResult<AggregateId> {
    if id.is_empty() {
        Ok(AggregateId::new())
    } else {
        Ok(id.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tally_events::{AggregatorRegistry, JsonCodec};

    use crate::event_store::{BackendError, InMemoryKeyedStore, Item, KeyQuery, Page};

    fn hp(id: &str, delta: i64) -> HitPoints {
        HitPoints {
            id: id.to_string(),
            character_name: "X".to_string(),
            character_hit_points: delta,
            note: format!("delta {delta}"),
        }
    }

    #[tokio::test]
    async fn assigns_consecutive_versions_from_zero() {
        let store = EventStore::new(InMemoryKeyedStore::new(), AggregatorRegistry::standard(JsonCodec));
        let recorder = Recorder::new(store, JsonCodec);
        let ctx = OperationContext::background();

        let first = recorder.record_hit_points(&ctx, &hp("X", 8)).await.unwrap();
        let second = recorder.record_hit_points(&ctx, &hp("X", -2)).await.unwrap();

        assert_eq!(first.version, 0);
        assert_eq!(second.version, 1);
        assert_eq!(second.note, "delta -2");

        let projected = recorder.store().project(&ctx, &"X".into()).await.unwrap();
        let total: HitPoints = JsonCodec.decode(&projected.event).unwrap();
        assert_eq!(total.character_hit_points, 6);
    }

    #[tokio::test]
    async fn empty_payload_id_starts_a_new_aggregate() {
        let store = EventStore::new(InMemoryKeyedStore::new(), AggregatorRegistry::standard(JsonCodec));
        let recorder = Recorder::new(store, JsonCodec);
        let ctx = OperationContext::background();

        let a = recorder.record_hit_points(&ctx, &hp("", 1)).await.unwrap();
        let b = recorder.record_hit_points(&ctx, &hp("", 1)).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(a.version, 0);
        assert_eq!(b.version, 0);
    }

    #[tokio::test]
    async fn payload_ids_in_the_snapshot_partition_are_rejected() {
        let store = EventStore::new(InMemoryKeyedStore::new(), AggregatorRegistry::standard(JsonCodec));
        let recorder = Recorder::new(store, JsonCodec);
        let ctx = OperationContext::background();
        recorder.record_hit_points(&ctx, &hp("X", 8)).await.unwrap();
        recorder.store().snapshot_current(&ctx, &"X".into()).await.unwrap();

        let err = recorder
            .record_hit_points(&ctx, &hp("X#SNAPSHOT", 100))
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidRecord(_)));

        let err = recorder
            .record(&ctx, &"X#SNAPSHOT".into(), HIT_POINTS_EVENT, b"{}".to_vec(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidRecord(_)));
        assert_eq!(recorder.store().backend().len(), 2);
    }

    /// Backend whose first `conflicts` inserts lose the race to an invisible writer.
    struct Contended {
        inner: InMemoryKeyedStore,
        conflicts: AtomicUsize,
    }

    #[async_trait]
    impl KeyedStore for Contended {
        async fn put_if_absent(&self, item: Item) -> Result<(), BackendError> {
            if self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                // The competing writer lands first.
                self.inner.put_if_absent(item.clone()).await?;
                return Err(BackendError::ConditionalCheckFailed);
            }
            self.inner.put_if_absent(item).await
        }

        async fn query_page(&self, query: &KeyQuery) -> Result<Page, BackendError> {
            self.inner.query_page(query).await
        }
    }

    fn contended(conflicts: usize) -> Arc<Contended> {
        Arc::new(Contended {
            inner: InMemoryKeyedStore::new(),
            conflicts: AtomicUsize::new(conflicts),
        })
    }

    #[tokio::test]
    async fn retries_on_conflict_with_fresh_version() {
        let backend = contended(2);
        let store = EventStore::new(backend.clone(), AggregatorRegistry::standard(JsonCodec));
        let recorder = Recorder::new(store, JsonCodec).with_max_attempts(3);
        let ctx = OperationContext::background();

        let envelope = recorder.record_hit_points(&ctx, &hp("X", 5)).await.unwrap();

        assert_eq!(envelope.version, 2);
        assert_eq!(backend.inner.len(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let backend = contended(5);
        let store = EventStore::new(backend.clone(), AggregatorRegistry::standard(JsonCodec));
        let recorder = Recorder::new(store, JsonCodec).with_max_attempts(2);
        let ctx = OperationContext::background();

        let err = recorder.record_hit_points(&ctx, &hp("X", 5)).await.unwrap_err();

        assert!(matches!(
            err,
            EventStoreError::EventAlreadyExists { version: 1, .. }
        ));
        assert_eq!(backend.inner.len(), 2);
    }

    #[tokio::test]
    async fn records_levels() {
        let store = EventStore::new(InMemoryKeyedStore::new(), AggregatorRegistry::standard(JsonCodec));
        let recorder = Recorder::new(store, JsonCodec);
        let ctx = OperationContext::background();

        let level = Level {
            id: "L".to_string(),
            character_name: "X".to_string(),
            level_type: tally_events::LevelType::Milestone,
            experience: None,
            levels: Some(1),
        };
        recorder.record_level(&ctx, &level).await.unwrap();
        recorder.record_level(&ctx, &level).await.unwrap();

        let projected = recorder.store().project(&ctx, &"L".into()).await.unwrap();
        let total: Level = JsonCodec.decode(&projected.event).unwrap();
        assert_eq!(total.levels, Some(2));
        assert_eq!(projected.event_name, LEVELS_EVENT);
    }
}
