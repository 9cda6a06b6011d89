use std::collections::HashMap;

use crate::event_sourcing::core::{Aggregate, CodecError, DomainEvent, Entity, EventType, Named, RecordedEvent};

// ============================================================================
// Renderer - Projection Engine
// ============================================================================
//
// Folds an aggregate's events into typed state:
//
// 1. Until state exists, look for an initializer for each event. Events
//    without one are skipped, so foreign or legacy events may precede the
//    one that bootstraps this projection.
// 2. Once state exists, look for a reducer for each event. Events without
//    one are skipped, so newer event types never break older projections.
// 3. Any decode or apply failure stops rendering and names the event type.
//
// Registration is per concrete event type: each entry decodes its own
// payload, so a bad payload fails where it is registered.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unexpected event {event_type}: {source}")]
    UnexpectedEvent {
        event_type: EventType,
        #[source]
        source: CodecError,
    },

    #[error("failed to initialize state with {event_type}: {source}")]
    Initialize {
        event_type: EventType,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to process update with {event_type}: {source}")]
    Reduce {
        event_type: EventType,
        #[source]
        source: anyhow::Error,
    },
}

impl RenderError {
    pub fn event_type(&self) -> &EventType {
        match self {
            RenderError::UnexpectedEvent { event_type, .. }
            | RenderError::Initialize { event_type, .. }
            | RenderError::Reduce { event_type, .. } => event_type,
        }
    }
}

type InitializerFn<T> = Box<dyn Fn(&RecordedEvent) -> Result<T, RenderError> + Send + Sync>;
type ReducerFn<T> = Box<dyn Fn(&mut T, &RecordedEvent) -> Result<(), RenderError> + Send + Sync>;

fn decode<E: DomainEvent>(event: &RecordedEvent) -> Result<E, RenderError> {
    event.decode().map_err(|source| RenderError::UnexpectedEvent {
        event_type: event.event_type.clone(),
        source,
    })
}

pub struct Renderer<T> {
    entity_type: String,
    initializers: HashMap<EventType, InitializerFn<T>>,
    reducers: HashMap<EventType, ReducerFn<T>>,
}

impl<T: Named + Send + Sync + 'static> Renderer<T> {
    pub fn new() -> Self {
        Self {
            entity_type: T::type_name(),
            initializers: HashMap::new(),
            reducers: HashMap::new(),
        }
    }

    /// Build initial state from an event of type `E`
    pub fn with_initializer<E, F>(mut self, initialize: F) -> Self
    where
        E: DomainEvent,
        F: Fn(E) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let initializer: InitializerFn<T> = Box::new(move |event| {
            let payload = decode::<E>(event)?;
            initialize(payload).map_err(|source| RenderError::Initialize {
                event_type: event.event_type.clone(),
                source,
            })
        });
        self.initializers.insert(E::event_type(), initializer);
        self
    }

    /// Apply an event of type `E` to existing state
    pub fn with_reducer<E, F>(mut self, reduce: F) -> Self
    where
        E: DomainEvent,
        F: Fn(&mut T, E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let reducer: ReducerFn<T> = Box::new(move |state, event| {
            let payload = decode::<E>(event)?;
            reduce(state, payload).map_err(|source| RenderError::Reduce {
                event_type: event.event_type.clone(),
                source,
            })
        });
        self.reducers.insert(E::event_type(), reducer);
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn render(&self, aggregate: &Aggregate) -> Result<Entity<T>, RenderError> {
        let mut state: Option<T> = None;

        for event in &aggregate.events {
            match state.as_mut() {
                None => {
                    if let Some(initialize) = self.initializers.get(&event.event_type) {
                        state = Some(initialize(event)?);
                    }
                }
                Some(current) => {
                    if let Some(reduce) = self.reducers.get(&event.event_type) {
                        reduce(current, event)?;
                    }
                }
            }
        }

        Ok(Entity {
            id: aggregate.id.clone(),
            revision: aggregate.revision.clone(),
            entity_type: self.entity_type.clone(),
            state,
        })
    }
}

impl<T: Named + Send + Sync + 'static> Default for Renderer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::{Data, EventId, Metadata, Revision, RevisionGenerator, StreamId, Timestamp};
    use chrono::Utc;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq)]
    struct Tally {
        total: i64,
        notes: Vec<String>,
    }

    impl Named for Tally {
        fn type_name() -> String {
            "test:tally".to_string()
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Opened {
        start: i64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Added {
        amount: i64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Noted {
        note: String,
    }

    impl Named for Opened {
        fn type_name() -> String {
            "test:opened".to_string()
        }
    }
    impl DomainEvent for Opened {}

    impl Named for Added {
        fn type_name() -> String {
            "test:added".to_string()
        }
    }
    impl DomainEvent for Added {}

    impl Named for Noted {
        fn type_name() -> String {
            "test:noted".to_string()
        }
    }
    impl DomainEvent for Noted {}

    fn renderer() -> Renderer<Tally> {
        Renderer::new()
            .with_initializer(|event: Opened| {
                Ok(Tally {
                    total: event.start,
                    notes: Vec::new(),
                })
            })
            .with_reducer(|state: &mut Tally, event: Added| {
                anyhow::ensure!(event.amount != 0, "zero is not an amount");
                state.total += event.amount;
                Ok(())
            })
            .with_reducer(|state: &mut Tally, event: Noted| {
                state.notes.push(event.note);
                Ok(())
            })
    }

    fn aggregate(events: Vec<(&str, serde_json::Value)>) -> Aggregate {
        let id = StreamId::new("test", "tally");
        let generator = RevisionGenerator::new();
        let recorded = events
            .into_iter()
            .map(|(event_type, payload)| {
                let revision = generator.new_revision(Utc::now());
                RecordedEvent {
                    stream_id: id.clone(),
                    id: EventId::from(&revision),
                    revision,
                    event_type: EventType::new(event_type),
                    timestamp: Timestamp::now(),
                    metadata: Metadata::default(),
                    data: Data::json(&payload).unwrap(),
                }
            })
            .collect();
        Aggregate::new(id, recorded)
    }

    #[test]
    fn test_empty_stream_renders_no_state() {
        let entity = renderer().render(&Aggregate::empty(StreamId::new("test", "none"))).unwrap();
        assert!(entity.state.is_none());
        assert_eq!(entity.revision, Revision::initial());
        assert_eq!(entity.entity_type, "test:tally");
    }

    #[test]
    fn test_folds_events_in_order() {
        let aggregate = aggregate(vec![
            ("test:opened", serde_json::json!({"start": 10})),
            ("test:added", serde_json::json!({"amount": 5})),
            ("test:noted", serde_json::json!({"note": "hello"})),
            ("test:added", serde_json::json!({"amount": -3})),
        ]);

        let entity = renderer().render(&aggregate).unwrap();
        assert_eq!(
            entity.state,
            Some(Tally {
                total: 12,
                notes: vec!["hello".to_string()],
            })
        );
    }

    #[test]
    fn test_events_before_initializer_are_skipped() {
        let aggregate = aggregate(vec![
            ("legacy:created", serde_json::json!({"whatever": true})),
            ("test:added", serde_json::json!({"amount": 100})),
            ("test:opened", serde_json::json!({"start": 1})),
            ("test:added", serde_json::json!({"amount": 1})),
        ]);

        let entity = renderer().render(&aggregate).unwrap();
        assert_eq!(entity.state.unwrap().total, 2);
    }

    #[test]
    fn test_unknown_events_after_initialization_are_skipped() {
        let aggregate = aggregate(vec![
            ("test:opened", serde_json::json!({"start": 1})),
            ("test:renamed-in-a-future-version", serde_json::json!({"name": "x"})),
            ("test:added", serde_json::json!({"amount": 2})),
        ]);

        let entity = renderer().render(&aggregate).unwrap();
        assert_eq!(entity.state.unwrap().total, 3);
    }

    #[test]
    fn test_revision_is_stream_revision_not_last_consumed() {
        let aggregate = aggregate(vec![
            ("test:opened", serde_json::json!({"start": 1})),
            ("test:ignored", serde_json::json!({})),
        ]);

        let entity = renderer().render(&aggregate).unwrap();
        assert_eq!(entity.revision, aggregate.events[1].revision);
    }

    #[test]
    fn test_decode_failure_names_event_type() {
        let aggregate = aggregate(vec![
            ("test:opened", serde_json::json!({"start": 1})),
            ("test:added", serde_json::json!({"amount": "lots"})),
        ]);

        let err = renderer().render(&aggregate).unwrap_err();
        assert!(matches!(err, RenderError::UnexpectedEvent { .. }));
        assert_eq!(err.event_type().as_str(), "test:added");
    }

    #[test]
    fn test_reducer_failure_names_event_type() {
        let aggregate = aggregate(vec![
            ("test:opened", serde_json::json!({"start": 1})),
            ("test:added", serde_json::json!({"amount": 0})),
        ]);

        let err = renderer().render(&aggregate).unwrap_err();
        assert!(matches!(err, RenderError::Reduce { .. }));
        assert!(err.to_string().contains("test:added"));
    }

    #[test]
    fn test_render_is_pure() {
        let aggregate = aggregate(vec![
            ("test:opened", serde_json::json!({"start": 4})),
            ("test:added", serde_json::json!({"amount": 4})),
        ]);
        let renderer = renderer();

        assert_eq!(renderer.render(&aggregate).unwrap(), renderer.render(&aggregate).unwrap());
    }
}
