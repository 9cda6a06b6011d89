use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

use super::event_store::{EventStore, PublishOptions};
use crate::event_sourcing::core::{Aggregate, EventStoreError, NewEvent, Revision, StreamId};
use crate::metrics::Metrics;

/// Wraps any store and records prometheus metrics for every call
pub struct InstrumentedEventStore<S> {
    inner: S,
    backend: &'static str,
    metrics: Arc<Metrics>,
}

impl<S: EventStore> InstrumentedEventStore<S> {
    pub fn new(inner: S, backend: &'static str, metrics: Arc<Metrics>) -> Self {
        Self {
            inner,
            backend,
            metrics,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn observe<T>(&self, operation: &str, started: Instant, result: &Result<T, EventStoreError>) {
        self.metrics.record_store_operation(
            self.backend,
            operation,
            started.elapsed().as_secs_f64(),
            result.is_ok(),
        );
    }
}

#[async_trait]
impl<S: EventStore> EventStore for InstrumentedEventStore<S> {
    async fn load(&self, id: &StreamId) -> Result<Aggregate, EventStoreError> {
        let started = Instant::now();
        let result = self.inner.load(id).await;
        self.observe("load", started, &result);
        result
    }

    async fn publish(
        &self,
        id: &StreamId,
        options: &PublishOptions,
        events: Vec<NewEvent>,
    ) -> Result<Revision, EventStoreError> {
        let started = Instant::now();
        let count = events.len();
        let result = self.inner.publish(id, options, events).await;
        self.observe("publish", started, &result);

        match &result {
            Ok(_) => self.metrics.record_events_published(self.backend, count),
            Err(EventStoreError::RevisionConflict) => {
                tracing::warn!(
                    stream = %id,
                    backend = self.backend,
                    expectation = options.expectation().label(),
                    "Revision conflict"
                );
                self.metrics
                    .record_revision_conflict(self.backend, options.expectation().label());
            }
            Err(_) => {}
        }

        result
    }

    async fn remove(&self, id: &StreamId) -> Result<u64, EventStoreError> {
        let started = Instant::now();
        let result = self.inner.remove(id).await;
        self.observe("remove", started, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::store::MemoryEventStore;
    use crate::event_sourcing::testing;

    #[tokio::test]
    async fn test_records_publishes_and_conflicts() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let store = InstrumentedEventStore::new(MemoryEventStore::new(), "memory", metrics.clone());
        let id = testing::unique_stream_id("instrumented");
        let initial = PublishOptions::new().with_expected_revision(Revision::initial());

        store.publish(&id, &initial, testing::sample_events(3)).await.unwrap();
        let conflict = store.publish(&id, &initial, testing::sample_events(1)).await;
        assert!(matches!(conflict, Err(EventStoreError::RevisionConflict)));

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"event_store_events_published_total{backend="memory"} 3"#));
        assert!(text.contains(r#"event_store_revision_conflicts_total{backend="memory",expectation="empty"} 1"#));
    }

    #[tokio::test]
    async fn test_instrumented_store_passes_validation_suite() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let store = InstrumentedEventStore::new(MemoryEventStore::new(), "memory", metrics);
        testing::validate_event_store(&store).await.unwrap();
    }
}
