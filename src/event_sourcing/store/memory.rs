use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::event_store::{publish_with_retry, ChangeSet, EventStore, Expectation, PublishOptions};
use crate::event_sourcing::core::{Aggregate, EventStoreError, NewEvent, Revision, RevisionGenerator, StreamId};
use crate::utils::RetryConfig;

// ============================================================================
// In-Memory Event Store
// ============================================================================
//
// Change sets per stream behind one async lock. The write lock is held for
// the precondition check and the append, which makes every publish atomic.
// Used for local runs and tests; nothing survives the process.
//
// ============================================================================

pub struct MemoryEventStore {
    streams: RwLock<HashMap<StreamId, Vec<ChangeSet>>>,
    revisions: RevisionGenerator,
    retry: RetryConfig,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            revisions: RevisionGenerator::new(),
            retry: RetryConfig::revision_conflict(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn try_publish(
        &self,
        id: &StreamId,
        options: &PublishOptions,
        events: &[NewEvent],
    ) -> Result<Revision, EventStoreError> {
        let now = Utc::now();
        let change_set = ChangeSet::assemble(id, options, events, now, |_| self.revisions.new_revision(now))?;

        let mut streams = self.streams.write().await;
        let stream = streams.entry(id.clone()).or_default();
        let latest = stream.last().map(|committed| &committed.revision);

        let accepted = match (options.expectation(), latest) {
            (Expectation::Any, None) => true,
            (Expectation::Any, Some(latest)) => *latest < change_set.revision,
            (Expectation::Empty, latest) => latest.is_none(),
            (Expectation::Exactly(expected), latest) => latest == Some(expected),
        };

        if !accepted {
            return Err(EventStoreError::RevisionConflict);
        }

        let revision = change_set.revision.clone();
        stream.push(change_set);
        Ok(revision)
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn load(&self, id: &StreamId) -> Result<Aggregate, EventStoreError> {
        id.validate()?;
        let streams = self.streams.read().await;
        let events = streams
            .get(id)
            .map(|stream| stream.iter().flat_map(|cs| cs.events.iter().cloned()).collect())
            .unwrap_or_default();

        Ok(Aggregate::new(id.clone(), events))
    }

    async fn publish(
        &self,
        id: &StreamId,
        options: &PublishOptions,
        events: Vec<NewEvent>,
    ) -> Result<Revision, EventStoreError> {
        id.validate()?;
        if events.is_empty() {
            return Err(EventStoreError::EmptyBatch);
        }

        let revision = publish_with_retry(options, &self.retry, |_| self.try_publish(id, options, &events)).await?;

        tracing::info!(
            stream = %id,
            revision = %revision,
            event_count = events.len(),
            "Appended change set"
        );

        Ok(revision)
    }

    async fn remove(&self, id: &StreamId) -> Result<u64, EventStoreError> {
        id.validate()?;
        let removed = self.streams.write().await.remove(id);
        Ok(removed.map(|stream| stream.len() as u64).unwrap_or(0))
    }
}
