use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

use crate::event_sourcing::core::{
    Aggregate, CorrelationId, EventId, EventStoreError, EventType, Metadata, NewEvent, RecordedEvent, Revision,
    StreamId, Timestamp,
};
use crate::utils::{retry_on_transient, RetryConfig};

// ============================================================================
// Event Store Contract
// ============================================================================
//
// Every backend implements the same three operations:
// 1. `load`    - all events of a stream in commit order; an unknown stream
//                is an empty aggregate, never an error
// 2. `publish` - append one change set atomically under the optimistic
//                concurrency rules below
// 3. `remove`  - administrative wipe of a stream, returns records deleted
//
// Optimistic concurrency:
// - no expected revision:   commit unless the stream already holds a revision
//                           >= the one being assigned; on conflict regenerate
//                           and retry (bounded)
// - expected == initial:    commit only if the stream is empty
// - expected == revision r: commit only if the stream's latest is exactly r,
//                           conflicts are returned immediately
//
// ============================================================================

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn load(&self, id: &StreamId) -> Result<Aggregate, EventStoreError>;

    async fn publish(
        &self,
        id: &StreamId,
        options: &PublishOptions,
        events: Vec<NewEvent>,
    ) -> Result<Revision, EventStoreError>;

    async fn remove(&self, id: &StreamId) -> Result<u64, EventStoreError>;
}

#[async_trait]
impl<S: EventStore + ?Sized> EventStore for Arc<S> {
    async fn load(&self, id: &StreamId) -> Result<Aggregate, EventStoreError> {
        (**self).load(id).await
    }

    async fn publish(
        &self,
        id: &StreamId,
        options: &PublishOptions,
        events: Vec<NewEvent>,
    ) -> Result<Revision, EventStoreError> {
        (**self).publish(id, options, events).await
    }

    async fn remove(&self, id: &StreamId) -> Result<u64, EventStoreError> {
        (**self).remove(id).await
    }
}

// ============================================================================
// Publish Options
// ============================================================================

/// Concurrency precondition and causal metadata for one publish call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_revision: Option<Revision>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// What a publish expects the stream's latest revision to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation<'a> {
    /// Any revision lower than the one being written
    Any,
    /// No revision at all
    Empty,
    /// Exactly this revision
    Exactly(&'a Revision),
}

impl Expectation<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            Expectation::Any => "any",
            Expectation::Empty => "empty",
            Expectation::Exactly(_) => "exact",
        }
    }
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expected_revision(mut self, revision: Revision) -> Self {
        self.expected_revision = Some(revision);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.metadata.correlation_id = Some(correlation_id);
        self
    }

    /// Mark events as caused by `event_id`, within `correlation_id`
    pub fn with_causation_id(mut self, correlation_id: CorrelationId, event_id: EventId) -> Self {
        self.metadata.causation_id = Some(event_id);
        self.metadata.correlation_id = Some(correlation_id);
        self
    }

    pub fn expectation(&self) -> Expectation<'_> {
        match &self.expected_revision {
            None => Expectation::Any,
            Some(revision) if revision.is_initial() => Expectation::Empty,
            Some(revision) => Expectation::Exactly(revision),
        }
    }
}

// ============================================================================
// Change Sets
// ============================================================================

/// One atomic batch of events sharing a commit, a timestamp and a terminal
/// revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub revision: Revision,
    pub timestamp: Timestamp,
    pub events: Vec<RecordedEvent>,
}

impl ChangeSet {
    /// Stamp `events` with revisions, ids, the batch timestamp and the
    /// publish metadata. `revision_for` is called once per event, in order.
    pub fn assemble<F>(
        id: &StreamId,
        options: &PublishOptions,
        events: &[NewEvent],
        time: DateTime<Utc>,
        mut revision_for: F,
    ) -> Result<Self, EventStoreError>
    where
        F: FnMut(usize) -> Revision,
    {
        if events.is_empty() {
            return Err(EventStoreError::EmptyBatch);
        }

        let timestamp = Timestamp::from(time);
        let recorded: Vec<RecordedEvent> = events
            .iter()
            .enumerate()
            .map(|(index, event)| {
                let revision = revision_for(index);
                RecordedEvent {
                    stream_id: id.clone(),
                    id: EventId::from(&revision),
                    revision,
                    event_type: event.event_type.clone(),
                    timestamp: timestamp.clone(),
                    metadata: options.metadata.clone(),
                    data: event.data.clone(),
                }
            })
            .collect();

        let revision = recorded
            .last()
            .map(|event| event.revision.clone())
            .ok_or(EventStoreError::EmptyBatch)?;

        Ok(Self {
            revision,
            timestamp,
            events: recorded,
        })
    }

    pub fn event_types(&self) -> Vec<&EventType> {
        self.events.iter().map(|event| &event.event_type).collect()
    }
}

/// Run one publish attempt, retrying revision conflicts only when the caller
/// did not assert an expected revision.
pub async fn publish_with_retry<F, Fut>(
    options: &PublishOptions,
    retry: &RetryConfig,
    mut attempt: F,
) -> Result<Revision, EventStoreError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Revision, EventStoreError>>,
{
    match options.expectation() {
        Expectation::Any => retry_on_transient(retry.clone(), attempt).await.into_result(),
        Expectation::Empty | Expectation::Exactly(_) => attempt(1).await,
    }
}
