use serde::{Deserialize, Serialize};

use super::event::RecordedEvent;
use super::revision::Revision;
use super::stream_id::StreamId;

// ============================================================================
// Aggregate - Point-in-time Read of a Stream
// ============================================================================
//
// Key Principles:
// 1. Events are in commit order
// 2. `revision` is the last event's revision, or the initial sentinel when
//    the stream is empty
// 3. Aggregates are recomputed on every load, never cached
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub id: StreamId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<RecordedEvent>,
    pub revision: Revision,
}

impl Aggregate {
    /// Build from events already in commit order
    pub fn new(id: StreamId, events: Vec<RecordedEvent>) -> Self {
        let revision = events
            .last()
            .map(|event| event.revision.clone())
            .unwrap_or_else(Revision::initial);

        Self { id, events, revision }
    }

    pub fn empty(id: StreamId) -> Self {
        Self::new(id, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::{Data, EventId, EventType, Metadata, Timestamp};

    fn recorded(id: &StreamId, revision: &str) -> RecordedEvent {
        let revision: Revision = revision.parse().unwrap();
        RecordedEvent {
            stream_id: id.clone(),
            id: EventId::from(&revision),
            revision,
            event_type: EventType::new("test:noted"),
            timestamp: Timestamp::now(),
            metadata: Metadata::default(),
            data: Data::json(&serde_json::json!({})).unwrap(),
        }
    }

    #[test]
    fn test_empty_aggregate_has_initial_revision() {
        let aggregate = Aggregate::empty(StreamId::new("test", "a"));
        assert!(aggregate.is_empty());
        assert!(aggregate.revision.is_initial());
    }

    #[test]
    fn test_revision_is_last_event_revision() {
        let id = StreamId::new("test", "a");
        let events = vec![
            recorded(&id, "01HF000000000000000000000A"),
            recorded(&id, "01HF000000000000000000000B"),
        ];
        let aggregate = Aggregate::new(id, events);
        assert_eq!(aggregate.revision.as_str(), "01HF000000000000000000000B");
    }
}
