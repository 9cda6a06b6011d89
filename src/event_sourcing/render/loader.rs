use std::sync::Arc;

use super::renderer::{RenderError, Renderer};
use crate::event_sourcing::core::{Entity, EventStoreError, Named, StreamId};
use crate::event_sourcing::store::EventStore;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Read side of an entity: load the stream, render it
pub struct EntityLoader<T> {
    store: Arc<dyn EventStore>,
    renderer: Arc<Renderer<T>>,
}

impl<T> Clone for EntityLoader<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            renderer: self.renderer.clone(),
        }
    }
}

impl<T: Named + Send + Sync + 'static> EntityLoader<T> {
    pub fn new(store: Arc<dyn EventStore>, renderer: Arc<Renderer<T>>) -> Self {
        Self { store, renderer }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn renderer(&self) -> Arc<Renderer<T>> {
        self.renderer.clone()
    }

    pub async fn load(&self, id: &StreamId) -> Result<Entity<T>, LoadError> {
        let aggregate = self.store.load(id).await?;
        let entity = self.renderer.render(&aggregate)?;

        tracing::debug!(
            stream = %id,
            entity_type = %entity.entity_type,
            revision = %entity.revision,
            found = entity.state.is_some(),
            "Rendered entity"
        );

        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::{DomainEvent, NewEvent, Revision};
    use crate::event_sourcing::store::{MemoryEventStore, PublishOptions};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq)]
    struct Shelf {
        items: u32,
    }

    impl Named for Shelf {
        fn type_name() -> String {
            "test:shelf".to_string()
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Stocked {
        items: u32,
    }

    impl Named for Stocked {
        fn type_name() -> String {
            "test:stocked".to_string()
        }
    }
    impl DomainEvent for Stocked {}

    fn loader(store: Arc<dyn EventStore>) -> EntityLoader<Shelf> {
        let renderer = Renderer::new()
            .with_initializer(|event: Stocked| Ok(Shelf { items: event.items }))
            .with_reducer(|state: &mut Shelf, event: Stocked| {
                state.items += event.items;
                Ok(())
            });
        EntityLoader::new(store, Arc::new(renderer))
    }

    #[tokio::test]
    async fn test_load_unknown_stream_is_not_found() {
        let loader = loader(Arc::new(MemoryEventStore::new()));
        let entity = loader.load(&StreamId::new("shelf", "missing")).await.unwrap();

        assert!(entity.state.is_none());
        assert!(!entity.initialized());
        assert_eq!(entity.revision, Revision::initial());
    }

    #[tokio::test]
    async fn test_load_renders_published_events() {
        let store: Arc<dyn EventStore> = Arc::new(MemoryEventStore::new());
        let id = StreamId::new("shelf", "a");
        let events = vec![
            NewEvent::from_domain(&Stocked { items: 2 }).unwrap(),
            NewEvent::from_domain(&Stocked { items: 3 }).unwrap(),
        ];
        let revision = store.publish(&id, &PublishOptions::new(), events).await.unwrap();

        let entity = loader(store).load(&id).await.unwrap();
        assert_eq!(entity.state, Some(Shelf { items: 5 }));
        assert_eq!(entity.revision, revision);
    }
}
