use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;

use super::commands::{Decrement, Increment, Randomize};
use super::events::{Decremented, Incremented, Randomized};
use super::state::{renderer, Counter};
use crate::event_sourcing::command::{CommandHandler, Dispatcher, EntityService, Publisher};
use crate::event_sourcing::core::Entity;
use crate::event_sourcing::store::{EventStore, PublishOptions};

// ============================================================================
// Counter Command Handlers
// ============================================================================
//
// Orchestrates: Command → Events → Publisher
//
// Handlers publish unconditionally; the store serializes concurrent writers
// to the same counter.
//
// ============================================================================

/// Source of values for `Randomize`
pub type Randomizer = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Uniform values in `0..1000`
pub fn pseudo_randomizer() -> Randomizer {
    Arc::new(|| rand::thread_rng().gen_range(0..1000_i64))
}

/// Counter as last rendered; an unopened counter starts from zero
fn current(entity: &Entity<Counter>) -> Counter {
    entity.state.clone().unwrap_or_default()
}

pub struct IncrementHandler;

#[async_trait]
impl CommandHandler<Counter> for IncrementHandler {
    type Command = Increment;

    async fn handle(&self, entity: &Entity<Counter>, command: Increment, publisher: &Publisher) -> anyhow::Result<()> {
        current(entity).plus(command.amount)?;
        publisher
            .publish_events(&PublishOptions::new(), &[Incremented { amount: command.amount }])
            .await?;
        Ok(())
    }
}

pub struct DecrementHandler;

#[async_trait]
impl CommandHandler<Counter> for DecrementHandler {
    type Command = Decrement;

    async fn handle(&self, entity: &Entity<Counter>, command: Decrement, publisher: &Publisher) -> anyhow::Result<()> {
        current(entity).minus(command.amount)?;
        publisher
            .publish_events(&PublishOptions::new(), &[Decremented { amount: command.amount }])
            .await?;
        Ok(())
    }
}

pub struct RandomizeHandler {
    randomizer: Randomizer,
}

impl RandomizeHandler {
    pub fn new(randomizer: Randomizer) -> Self {
        Self { randomizer }
    }
}

#[async_trait]
impl CommandHandler<Counter> for RandomizeHandler {
    type Command = Randomize;

    async fn handle(
        &self,
        _entity: &Entity<Counter>,
        _command: Randomize,
        publisher: &Publisher,
    ) -> anyhow::Result<()> {
        let value = (self.randomizer)();
        publisher
            .publish_events(&PublishOptions::new(), &[Randomized { value }])
            .await?;
        Ok(())
    }
}

pub fn dispatcher(randomizer: Randomizer) -> Dispatcher<Counter> {
    Dispatcher::new()
        .with_handler(IncrementHandler)
        .with_handler(DecrementHandler)
        .with_handler(RandomizeHandler::new(randomizer))
}

/// Counter service over any store
pub fn counter_service(store: Arc<dyn EventStore>, randomizer: Randomizer) -> EntityService<Counter> {
    EntityService::new(store, Arc::new(renderer()), Arc::new(dispatcher(randomizer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::command::{DispatchError, RemoteCommand};
    use crate::event_sourcing::core::{Revision, StreamId};
    use crate::event_sourcing::store::MemoryEventStore;
    use crate::event_sourcing::testing;

    fn service() -> EntityService<Counter> {
        counter_service(Arc::new(MemoryEventStore::new()), Arc::new(|| 42_i64))
    }

    #[tokio::test]
    async fn test_untouched_counter_is_not_initialized() {
        let entity = service().load(&StreamId::new("counter", "test-1")).await.unwrap();

        assert_eq!(entity.revision, Revision::initial());
        assert!(!entity.initialized());
        assert!(entity.state.is_none());
    }

    #[tokio::test]
    async fn test_increments_counter() {
        let service = service();
        let entity = service
            .execute(&testing::unique_stream_id("counter"), Increment { amount: 7 })
            .await
            .unwrap();

        assert_ne!(entity.revision, Revision::initial());
        assert!(entity.initialized());
        assert_eq!(entity.state.map(|c| c.value()), Some(7));
    }

    #[tokio::test]
    async fn test_decrements_counter() {
        let service = service();
        let id = testing::unique_stream_id("counter");

        let incremented = service.execute(&id, Increment { amount: 7 }).await.unwrap();
        let decremented = service.execute(&id, Decrement { amount: 5 }).await.unwrap();

        assert!(decremented.revision > incremented.revision);
        assert_eq!(decremented.state.map(|c| c.value()), Some(2));
    }

    #[tokio::test]
    async fn test_randomize_uses_injected_randomizer() {
        let service = service();
        let id = testing::unique_stream_id("counter");

        service.execute(&id, Increment { amount: 1 }).await.unwrap();
        let entity = service
            .execute_remote(&id, RemoteCommand::from_command(&Randomize::default()).unwrap())
            .await
            .unwrap();

        assert_eq!(entity.state.map(|c| c.value()), Some(42));
    }

    #[tokio::test]
    async fn test_overflowing_increment_is_rejected_before_publish() {
        let service = service();
        let id = testing::unique_stream_id("counter");

        let at_max = service.execute(&id, Increment { amount: i64::MAX }).await.unwrap();
        let err = service.execute(&id, Increment { amount: 1 }).await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler { .. }));

        let err = service
            .execute(&testing::unique_stream_id("counter"), Decrement { amount: i64::MIN })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Handler { .. }));

        assert_eq!(service.load(&id).await.unwrap(), at_max);
    }

    #[test]
    fn test_pseudo_randomizer_range() {
        let randomizer = pseudo_randomizer();
        assert!((0..100).map(|_| randomizer()).all(|v| (0..1000).contains(&v)));
    }
}
