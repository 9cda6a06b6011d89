use anyhow::{ensure, Context, Result};
use futures_util::future::join_all;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::{Layer, Registry};

use crate::event_sourcing::core::{
    CorrelationId, DomainEvent, EventStoreError, Named, NewEvent, RecordedEvent, Revision, StreamId,
};
use crate::event_sourcing::store::{EventStore, PublishOptions};

// ============================================================================
// Event Store Validation Suite
// ============================================================================
//
// Behaviour every backend must share. Backend tests call
// `validate_event_store` against a live store; each check works on its own
// freshly named stream so the suite can run against shared databases.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreValidationEvent {
    pub test_string_value: String,
    pub test_int_value: i64,
}

impl Named for StoreValidationEvent {
    fn type_name() -> String {
        "store-validation:event".to_string()
    }
}

impl DomainEvent for StoreValidationEvent {}

impl StoreValidationEvent {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let text: String = (&mut rng).sample_iter(&Alphanumeric).take(24).map(char::from).collect();
        Self {
            test_string_value: text,
            test_int_value: rng.gen(),
        }
    }
}

/// Stream id nobody else is using
pub fn unique_stream_id(stream_type: &str) -> StreamId {
    StreamId::new(stream_type, ulid::Ulid::new().to_string())
}

pub fn sample_payloads(count: usize) -> Vec<StoreValidationEvent> {
    (0..count).map(|_| StoreValidationEvent::random()).collect()
}

pub fn sample_events(count: usize) -> Vec<NewEvent> {
    sample_payloads(count)
        .iter()
        .filter_map(|event| NewEvent::from_domain(event).ok())
        .collect()
}

/// Run every check; the first failure is returned with the check's name
pub async fn validate_event_store<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    loads_an_initial_revision(store).await.context("loads an initial revision")?;
    loads_a_revision_with_events(store).await.context("loads a revision with events")?;
    publishes_multiple_events_in_one_change_set(store)
        .await
        .context("publishes multiple events in a single change set")?;
    preserves_event_content(store).await.context("preserves the event content when recording")?;
    rejects_an_empty_batch(store).await.context("rejects an empty batch")?;
    rejects_an_ambiguous_stream_id(store)
        .await
        .context("rejects a stream type holding the delimiter")?;
    publishes_with_an_expected_initial_revision(store)
        .await
        .context("publishes with an expected initial revision")?;
    publishes_with_an_expected_revision(store).await.context("publishes with an expected revision")?;
    conflicts_on_initial_revision(store)
        .await
        .context("returns a revision conflict with an initial revision")?;
    conflicts_on_stale_revision(store).await.context("returns a revision conflict on a stale revision")?;
    conflicts_on_inner_revision(store)
        .await
        .context("returns a revision conflict on a revision inside the last change set")?;
    supports_causation(store).await.context("supports causation id")?;
    orders_concurrent_unconditional_publishes(store)
        .await
        .context("orders concurrent unconditional publishes")?;
    admits_one_initial_writer(store).await.context("admits exactly one initial writer")?;
    removes_a_stream(store).await.context("removes a stream")?;
    Ok(())
}

async fn last_event<S: EventStore + ?Sized>(store: &S, id: &StreamId) -> Result<RecordedEvent> {
    let aggregate = store.load(id).await?;
    aggregate.events.last().cloned().context("no events found")
}

fn ensure_conflict(result: Result<Revision, EventStoreError>) -> Result<()> {
    match result {
        Err(EventStoreError::RevisionConflict) => Ok(()),
        Err(other) => anyhow::bail!("expected revision conflict, got {other}"),
        Ok(revision) => anyhow::bail!("expected revision conflict, publish succeeded at {revision}"),
    }
}

async fn loads_an_initial_revision<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let id = unique_stream_id("validation");
    let aggregate = store.load(&id).await?;

    ensure!(aggregate.events.is_empty(), "expected no events");
    ensure!(aggregate.revision.is_initial(), "expected initial revision, got {}", aggregate.revision);
    ensure!(aggregate.id == id, "aggregate id mismatch");
    Ok(())
}

async fn loads_a_revision_with_events<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let id = unique_stream_id("validation");
    let revision = store.publish(&id, &PublishOptions::new(), sample_events(1)).await?;
    let aggregate = store.load(&id).await?;

    ensure!(aggregate.events.len() == 1, "expected 1 event, got {}", aggregate.events.len());
    ensure!(aggregate.revision == revision, "load revision {} != publish revision {}", aggregate.revision, revision);
    ensure!(!revision.is_initial() && revision > Revision::initial(), "revision must sort after initial");
    ensure!(aggregate.id == id, "aggregate id mismatch");
    Ok(())
}

async fn publishes_multiple_events_in_one_change_set<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let id = unique_stream_id("validation");
    let revision = store.publish(&id, &PublishOptions::new(), sample_events(17)).await?;
    let aggregate = store.load(&id).await?;

    ensure!(aggregate.events.len() == 17, "expected 17 events, got {}", aggregate.events.len());
    ensure!(aggregate.revision == revision, "aggregate revision should be the batch's terminal revision");

    let first = &aggregate.events[0];
    for pair in aggregate.events.windows(2) {
        ensure!(pair[0].revision < pair[1].revision, "revisions must strictly increase");
    }
    for event in &aggregate.events {
        ensure!(event.timestamp == first.timestamp, "events in one change set share a timestamp");
        ensure!(event.id.as_str() == event.revision.as_str(), "event id must equal its revision");
    }
    Ok(())
}

async fn preserves_event_content<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let id = unique_stream_id("validation");
    let payloads = sample_payloads(17);
    let events = payloads.iter().map(NewEvent::from_domain).collect::<Result<Vec<_>, _>>()?;

    store.publish(&id, &PublishOptions::new(), events).await?;
    let aggregate = store.load(&id).await?;

    ensure!(aggregate.events.len() == payloads.len(), "event count mismatch");
    for (expected, recorded) in payloads.iter().zip(&aggregate.events) {
        ensure!(recorded.event_type == StoreValidationEvent::event_type(), "event type mismatch");
        ensure!(recorded.stream_id == id, "stream id mismatch");
        let decoded: StoreValidationEvent = recorded.decode()?;
        ensure!(&decoded == expected, "payload mismatch: {decoded:?} != {expected:?}");
    }
    Ok(())
}

async fn rejects_an_empty_batch<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let id = unique_stream_id("validation");
    let result = store.publish(&id, &PublishOptions::new(), Vec::new()).await;
    ensure!(matches!(result, Err(EventStoreError::EmptyBatch)), "expected empty batch error");
    Ok(())
}

async fn rejects_an_ambiguous_stream_id<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let key = ulid::Ulid::new().to_string();
    let dotted = StreamId::new("validation.dotted", key.clone());

    let published = store.publish(&dotted, &PublishOptions::new(), sample_events(1)).await;
    ensure!(
        matches!(published, Err(EventStoreError::InvalidStreamId(_))),
        "expected invalid stream id on publish"
    );
    ensure!(
        matches!(store.load(&dotted).await, Err(EventStoreError::InvalidStreamId(_))),
        "expected invalid stream id on load"
    );

    // Same encoded key, split the other way round, is a legitimate stream
    let split = StreamId::new("validation", format!("dotted.{key}"));
    ensure!(store.load(&split).await?.events.is_empty(), "nothing may have been written");
    Ok(())
}

async fn publishes_with_an_expected_initial_revision<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let id = unique_stream_id("validation");
    let options = PublishOptions::new().with_expected_revision(Revision::initial());
    store.publish(&id, &options, sample_events(1)).await?;

    let aggregate = store.load(&id).await?;
    ensure!(aggregate.events.len() == 1, "expected 1 event");
    Ok(())
}

async fn publishes_with_an_expected_revision<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let id = unique_stream_id("validation");
    store.publish(&id, &PublishOptions::new(), sample_events(1)).await?;
    let first = store.load(&id).await?;

    let options = PublishOptions::new().with_expected_revision(first.revision.clone());
    let revision = store.publish(&id, &options, sample_events(1)).await?;

    let aggregate = store.load(&id).await?;
    ensure!(aggregate.events.len() == 2, "expected 2 events");
    ensure!(revision > first.revision, "new revision must sort after the expected one");
    Ok(())
}

async fn conflicts_on_initial_revision<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let id = unique_stream_id("validation");
    let options = PublishOptions::new().with_expected_revision(Revision::initial());

    store.publish(&id, &options, sample_events(1)).await?;
    ensure_conflict(store.publish(&id, &options, sample_events(1)).await)?;

    let aggregate = store.load(&id).await?;
    ensure!(aggregate.events.len() == 1, "conflicting publish must not be applied");
    Ok(())
}

async fn conflicts_on_stale_revision<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let id = unique_stream_id("validation");
    store.publish(&id, &PublishOptions::new(), sample_events(1)).await?;
    let first = store.load(&id).await?;
    store.publish(&id, &PublishOptions::new(), sample_events(1)).await?;

    let stale = PublishOptions::new().with_expected_revision(first.revision);
    ensure_conflict(store.publish(&id, &stale, sample_events(3)).await)?;

    let aggregate = store.load(&id).await?;
    ensure!(aggregate.events.len() == 2, "conflicting publish must not be applied");
    Ok(())
}

async fn conflicts_on_inner_revision<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let id = unique_stream_id("validation");
    store.publish(&id, &PublishOptions::new(), sample_events(3)).await?;
    let aggregate = store.load(&id).await?;

    for event in &aggregate.events[..2] {
        let inner = PublishOptions::new().with_expected_revision(event.revision.clone());
        ensure_conflict(store.publish(&id, &inner, sample_events(1)).await)?;
    }

    let latest = PublishOptions::new().with_expected_revision(aggregate.revision);
    store.publish(&id, &latest, sample_events(1)).await?;
    ensure!(store.load(&id).await?.events.len() == 4, "only the exact latest revision may publish");
    Ok(())
}

async fn supports_causation<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let id = unique_stream_id("validation");
    store.publish(&id, &PublishOptions::new(), sample_events(1)).await?;
    let first = last_event(store, &id).await?;

    let correlation_id = CorrelationId::new(format!("event/{}", first.id));
    let options = PublishOptions::new().with_causation_id(correlation_id.clone(), first.id.clone());
    store.publish(&id, &options, sample_events(1)).await?;

    let second = last_event(store, &id).await?;
    ensure!(second.metadata.correlation_id == Some(correlation_id), "correlation id mismatch");
    ensure!(second.metadata.causation_id == Some(first.id), "causation id mismatch");
    Ok(())
}

async fn orders_concurrent_unconditional_publishes<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let id = unique_stream_id("validation");
    let options = PublishOptions::new();

    let results = join_all((0..6).map(|_| store.publish(&id, &options, sample_events(2)))).await;
    for result in results {
        result?;
    }

    let aggregate = store.load(&id).await?;
    ensure!(aggregate.events.len() == 12, "expected 12 events, got {}", aggregate.events.len());
    for pair in aggregate.events.windows(2) {
        ensure!(pair[0].revision < pair[1].revision, "revisions must strictly increase");
    }
    Ok(())
}

async fn admits_one_initial_writer<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let id = unique_stream_id("validation");
    let options = PublishOptions::new().with_expected_revision(Revision::initial());

    let results = join_all((0..4).map(|_| store.publish(&id, &options, sample_events(1)))).await;
    let winners = results.iter().filter(|result| result.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|result| matches!(result, Err(EventStoreError::RevisionConflict)))
        .count();

    ensure!(winners == 1, "expected exactly one winner, got {winners}");
    ensure!(conflicts == 3, "expected three conflicts, got {conflicts}");
    Ok(())
}

async fn removes_a_stream<S: EventStore + ?Sized>(store: &S) -> Result<()> {
    let id = unique_stream_id("validation");
    store.publish(&id, &PublishOptions::new(), sample_events(3)).await?;

    let removed = store.remove(&id).await?;
    ensure!(removed > 0, "expected records to be removed");

    let aggregate = store.load(&id).await?;
    ensure!(aggregate.events.is_empty(), "stream should be empty after remove");
    ensure!(aggregate.revision.is_initial(), "revision should reset after remove");
    ensure!(store.remove(&id).await? == 0, "removing an empty stream deletes nothing");
    Ok(())
}

// ============================================================================
// Log Capture
// ============================================================================

/// Records `(level, message)` for every event emitted on the current thread
/// while its guard is alive
#[derive(Clone, Default)]
pub struct LogRecorder {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for LogRecorder {
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        if let Ok(mut events) = self.events.lock() {
            events.push((*event.metadata().level(), visitor.0));
        }
    }
}

impl LogRecorder {
    pub fn install() -> (Self, DefaultGuard) {
        let recorder = Self::default();
        let guard = tracing::subscriber::set_default(Registry::default().with(recorder.clone()));
        (recorder, guard)
    }

    /// Level of the most recent event carrying `message`
    pub fn level_of(&self, message: &str) -> Option<Level> {
        let events = self.events.lock().ok()?;
        events
            .iter()
            .rev()
            .find(|(_, recorded)| recorded == message)
            .map(|(level, _)| *level)
    }
}
