use std::sync::Arc;

use super::command::{Command, CommandName, RemoteCommand};
use super::dispatcher::{DispatchError, Dispatcher};
use crate::event_sourcing::core::{Entity, Named, StreamId};
use crate::event_sourcing::render::{EntityLoader, LoadError, Renderer};
use crate::event_sourcing::store::EventStore;
use crate::metrics::Metrics;

// ============================================================================
// Entity Service - Load, Execute, Reload
// ============================================================================
//
// Execute flow:
// 1. Load and render the current entity
// 2. Dispatch the command with a publisher bound to the entity's stream
// 3. Nothing published: return the entity already in hand
// 4. Something published: load and render again, so callers always see
//    the durable post-write view
//
// Conflicts raised by handlers are returned as-is; retrying a command is
// the caller's decision.
//
// ============================================================================

/// Metrics label for remote commands with no registered handler, so client
/// supplied names never become label values
const UNKNOWN_COMMAND: &str = "unknown";

pub struct EntityService<T> {
    loader: EntityLoader<T>,
    dispatcher: Arc<Dispatcher<T>>,
    metrics: Option<Arc<Metrics>>,
}

impl<T: Named + Send + Sync + 'static> EntityService<T> {
    pub fn new(store: Arc<dyn EventStore>, renderer: Arc<Renderer<T>>, dispatcher: Arc<Dispatcher<T>>) -> Self {
        Self {
            loader: EntityLoader::new(store, renderer),
            dispatcher,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn load(&self, id: &StreamId) -> Result<Entity<T>, LoadError> {
        self.loader.load(id).await
    }

    pub async fn execute<C: Command>(&self, id: &StreamId, command: C) -> Result<Entity<T>, DispatchError> {
        let name = C::command_name();
        let result: Result<Entity<T>, DispatchError> = async {
            let entity = self.loader.load(id).await?;
            let published = self
                .dispatcher
                .dispatch(self.loader.store().clone(), &entity, command)
                .await?;
            self.settle(entity, published).await
        }
        .await;

        self.observe(&name, id, &result);
        result
    }

    /// Execute a command received by name with an encoded payload
    pub async fn execute_remote(&self, id: &StreamId, command: RemoteCommand) -> Result<Entity<T>, DispatchError> {
        let name = command.command.clone();
        let result: Result<Entity<T>, DispatchError> = async {
            let entity = self.loader.load(id).await?;
            let published = self
                .dispatcher
                .dispatch_remote(self.loader.store().clone(), &entity, command)
                .await?;
            self.settle(entity, published).await
        }
        .await;

        self.observe(&name, id, &result);
        result
    }

    async fn settle(&self, entity: Entity<T>, published: bool) -> Result<Entity<T>, DispatchError> {
        if !published {
            return Ok(entity);
        }
        Ok(self.loader.load(&entity.id).await?)
    }

    fn observe(&self, name: &CommandName, id: &StreamId, result: &Result<Entity<T>, DispatchError>) {
        let outcome = match result {
            Ok(entity) => {
                tracing::info!(
                    command = %name,
                    stream = %id,
                    revision = %entity.revision,
                    "✅ Command executed"
                );
                "ok"
            }
            Err(err) if err.is_revision_conflict() => {
                tracing::warn!(command = %name, stream = %id, error = %err, "Command lost a revision race");
                "conflict"
            }
            Err(err) => {
                tracing::error!(command = %name, stream = %id, error = %err, "❌ Command failed");
                "error"
            }
        };

        if let Some(metrics) = &self.metrics {
            let label = match result {
                Err(DispatchError::CommandNotFound(_)) => UNKNOWN_COMMAND,
                _ => name.as_str(),
            };
            metrics.record_command(label, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::command::{CommandHandler, Publisher};
    use crate::event_sourcing::core::{DomainEvent, EventStoreError, NewEvent, Revision};
    use crate::event_sourcing::store::{MemoryEventStore, PublishOptions};
    use crate::event_sourcing::testing;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Bin {
        marbles: u32,
    }

    impl Named for Bin {
        fn type_name() -> String {
            "tests:bin".to_string()
        }
    }

    #[derive(Serialize, Deserialize)]
    struct MarblesAdded {
        count: u32,
    }
    impl Named for MarblesAdded {}
    impl DomainEvent for MarblesAdded {}

    #[derive(Serialize, Deserialize)]
    struct AddMarbles {
        count: u32,
    }
    impl Named for AddMarbles {}
    impl Command for AddMarbles {}

    #[derive(Serialize, Deserialize)]
    struct Peek;
    impl Named for Peek {}
    impl Command for Peek {}

    struct AddMarblesHandler;

    #[async_trait]
    impl CommandHandler<Bin> for AddMarblesHandler {
        type Command = AddMarbles;

        async fn handle(&self, entity: &Entity<Bin>, command: AddMarbles, publisher: &Publisher) -> anyhow::Result<()> {
            let options = PublishOptions::new().with_expected_revision(entity.revision.clone());
            publisher
                .publish_events(&options, &[MarblesAdded { count: command.count }])
                .await?;
            Ok(())
        }
    }

    struct PeekHandler;

    #[async_trait]
    impl CommandHandler<Bin> for PeekHandler {
        type Command = Peek;

        async fn handle(&self, _entity: &Entity<Bin>, _command: Peek, _publisher: &Publisher) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Counts loads so tests can see whether a reload happened
    struct CountingStore {
        inner: MemoryEventStore,
        loads: AtomicUsize,
    }

    #[async_trait]
    impl EventStore for CountingStore {
        async fn load(&self, id: &StreamId) -> Result<crate::event_sourcing::core::Aggregate, EventStoreError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load(id).await
        }

        async fn publish(
            &self,
            id: &StreamId,
            options: &PublishOptions,
            events: Vec<NewEvent>,
        ) -> Result<Revision, EventStoreError> {
            self.inner.publish(id, options, events).await
        }

        async fn remove(&self, id: &StreamId) -> Result<u64, EventStoreError> {
            self.inner.remove(id).await
        }
    }

    fn service(store: Arc<dyn EventStore>) -> EntityService<Bin> {
        let renderer = Renderer::new()
            .with_initializer(|event: MarblesAdded| Ok(Bin { marbles: event.count }))
            .with_reducer(|state: &mut Bin, event: MarblesAdded| {
                state.marbles += event.count;
                Ok(())
            });
        let dispatcher = Dispatcher::new()
            .with_handler(AddMarblesHandler)
            .with_handler(PeekHandler);
        EntityService::new(store, Arc::new(renderer), Arc::new(dispatcher))
    }

    #[tokio::test]
    async fn test_execute_returns_post_write_entity() {
        let service = service(Arc::new(MemoryEventStore::new()));
        let id = testing::unique_stream_id("bin");

        let first = service.execute(&id, AddMarbles { count: 3 }).await.unwrap();
        let second = service.execute(&id, AddMarbles { count: 4 }).await.unwrap();

        assert_eq!(first.state, Some(Bin { marbles: 3 }));
        assert_eq!(second.state, Some(Bin { marbles: 7 }));
        assert!(second.revision > first.revision);
        assert_eq!(service.load(&id).await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_reload_only_when_published() {
        let store = Arc::new(CountingStore {
            inner: MemoryEventStore::new(),
            loads: AtomicUsize::new(0),
        });
        let service = service(store.clone());
        let id = testing::unique_stream_id("bin");

        let peeked = service.execute(&id, Peek).await.unwrap();
        assert!(peeked.state.is_none());
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);

        service.execute(&id, AddMarbles { count: 1 }).await.unwrap();
        assert_eq!(store.loads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_remote_and_metrics() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let service = service(Arc::new(MemoryEventStore::new())).with_metrics(metrics.clone());
        let id = testing::unique_stream_id("bin");

        let remote = RemoteCommand::from_command(&AddMarbles { count: 5 }).unwrap();
        let entity = service.execute_remote(&id, remote).await.unwrap();
        assert_eq!(entity.state, Some(Bin { marbles: 5 }));

        for name in ["tests:shake", "tests:tip-over"] {
            let missing = RemoteCommand::new(name, crate::event_sourcing::core::Data::json(&()).unwrap());
            let err = service.execute_remote(&id, missing).await.unwrap_err();
            assert!(matches!(err, DispatchError::CommandNotFound(_)));
        }

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"commands_executed_total{command="tests:add-marbles",outcome="ok"} 1"#));
        assert!(text.contains(r#"commands_executed_total{command="unknown",outcome="error"} 2"#));
        assert!(!text.contains("tests:shake"));
        assert!(!text.contains("tests:tip-over"));
    }

    #[tokio::test]
    async fn test_conflict_from_handler_is_returned() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let service = service(store.clone());
        let id = testing::unique_stream_id("bin");

        // A writer that sneaks in between the service's load and publish
        struct Racing {
            inner: Arc<dyn EventStore>,
        }

        #[async_trait]
        impl EventStore for Racing {
            async fn load(&self, id: &StreamId) -> Result<crate::event_sourcing::core::Aggregate, EventStoreError> {
                let aggregate = self.inner.load(id).await?;
                self.inner
                    .publish(id, &PublishOptions::new(), testing::sample_events(1))
                    .await?;
                Ok(aggregate)
            }

            async fn publish(
                &self,
                id: &StreamId,
                options: &PublishOptions,
                events: Vec<NewEvent>,
            ) -> Result<Revision, EventStoreError> {
                self.inner.publish(id, options, events).await
            }

            async fn remove(&self, id: &StreamId) -> Result<u64, EventStoreError> {
                self.inner.remove(id).await
            }
        }

        let racing = EntityService {
            loader: EntityLoader::new(Arc::new(Racing { inner: store }), service.loader.renderer()),
            dispatcher: service.dispatcher.clone(),
            metrics: None,
        };

        let err = racing.execute(&id, AddMarbles { count: 1 }).await.unwrap_err();
        assert!(err.is_revision_conflict());
    }
}
