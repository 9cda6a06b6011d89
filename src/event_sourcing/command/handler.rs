use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::command::Command;
use crate::event_sourcing::core::{DomainEvent, Entity, EventStoreError, NewEvent, Revision, StreamId};
use crate::event_sourcing::store::{EventStore, PublishOptions};

// ============================================================================
// Command Handlers
// ============================================================================
//
// A handler sees the current entity and a `Publisher` bound to that entity's
// stream. It may publish zero or more change sets; each publish is a full
// store publish and may fail with a revision conflict, which the handler
// should propagate.
//
// ============================================================================

#[async_trait]
pub trait CommandHandler<T>: Send + Sync {
    type Command: Command;

    async fn handle(&self, entity: &Entity<T>, command: Self::Command, publisher: &Publisher) -> anyhow::Result<()>;
}

/// Publishes to one stream and remembers whether anything was written
pub struct Publisher {
    store: Arc<dyn EventStore>,
    id: StreamId,
    published: AtomicBool,
}

impl Publisher {
    pub fn new(store: Arc<dyn EventStore>, id: StreamId) -> Self {
        Self {
            store,
            id,
            published: AtomicBool::new(false),
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.id
    }

    pub async fn publish(&self, options: &PublishOptions, events: Vec<NewEvent>) -> Result<Revision, EventStoreError> {
        let revision = self.store.publish(&self.id, options, events).await?;
        self.published.store(true, Ordering::Release);
        Ok(revision)
    }

    /// Encode typed events and publish them as one change set
    pub async fn publish_events<E: DomainEvent>(
        &self,
        options: &PublishOptions,
        events: &[E],
    ) -> Result<Revision, EventStoreError> {
        let encoded = events
            .iter()
            .map(NewEvent::from_domain)
            .collect::<Result<Vec<_>, _>>()?;
        self.publish(options, encoded).await
    }

    /// True once any publish through this publisher has committed
    pub fn published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }
}
