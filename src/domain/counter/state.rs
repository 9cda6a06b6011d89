use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use super::events::{Decremented, Incremented, Randomized};
use crate::event_sourcing::core::Named;
use crate::event_sourcing::render::Renderer;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub current: i64,
}

impl Counter {
    pub fn value(&self) -> i64 {
        self.current
    }

    /// Value after adding `amount`; overflow is an error, never a wrap
    pub fn plus(&self, amount: i64) -> anyhow::Result<i64> {
        self.current
            .checked_add(amount)
            .ok_or_else(|| anyhow!("counter overflow: {} + {}", self.current, amount))
    }

    pub fn minus(&self, amount: i64) -> anyhow::Result<i64> {
        self.current
            .checked_sub(amount)
            .ok_or_else(|| anyhow!("counter overflow: {} - {}", self.current, amount))
    }
}

impl Named for Counter {
    fn type_name() -> String {
        "counter:counter".to_string()
    }
}

/// Projection of a counter stream
///
/// Either an increment or a decrement can open a counter; a randomize only
/// applies to a counter that already exists.
pub fn renderer() -> Renderer<Counter> {
    Renderer::new()
        .with_initializer(|event: Incremented| {
            Ok(Counter {
                current: Counter::default().plus(event.amount)?,
            })
        })
        .with_initializer(|event: Decremented| {
            Ok(Counter {
                current: Counter::default().minus(event.amount)?,
            })
        })
        .with_reducer(|counter: &mut Counter, event: Incremented| {
            counter.current = counter.plus(event.amount)?;
            Ok(())
        })
        .with_reducer(|counter: &mut Counter, event: Decremented| {
            counter.current = counter.minus(event.amount)?;
            Ok(())
        })
        .with_reducer(|counter: &mut Counter, event: Randomized| {
            counter.current = event.value;
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::{
        Aggregate, Data, DomainEvent, EventId, Metadata, RecordedEvent, RevisionGenerator, StreamId, Timestamp,
    };
    use crate::event_sourcing::render::RenderError;
    use chrono::Utc;

    fn recorded<E: DomainEvent>(id: &StreamId, generator: &RevisionGenerator, event: &E) -> RecordedEvent {
        let revision = generator.new_revision(Utc::now());
        RecordedEvent {
            stream_id: id.clone(),
            id: EventId::from(&revision),
            revision,
            event_type: E::event_type(),
            timestamp: Timestamp::now(),
            metadata: Metadata::default(),
            data: Data::json(event).unwrap(),
        }
    }

    #[test]
    fn test_counter_projection() {
        let id = StreamId::new("counter", "projection");
        let generator = RevisionGenerator::new();
        let aggregate = Aggregate::new(
            id.clone(),
            vec![
                recorded(&id, &generator, &Randomized { value: 99 }),
                recorded(&id, &generator, &Decremented { amount: 2 }),
                recorded(&id, &generator, &Incremented { amount: 10 }),
                recorded(&id, &generator, &Randomized { value: 4 }),
                recorded(&id, &generator, &Incremented { amount: 1 }),
            ],
        );

        let entity = renderer().render(&aggregate).unwrap();
        assert_eq!(entity.entity_type, "counter:counter");
        assert_eq!(entity.state.map(|c| c.value()), Some(5));
    }

    #[test]
    fn test_overflow_fails_rendering() {
        let id = StreamId::new("counter", "overflow");
        let generator = RevisionGenerator::new();

        let past_max = Aggregate::new(
            id.clone(),
            vec![
                recorded(&id, &generator, &Incremented { amount: i64::MAX }),
                recorded(&id, &generator, &Incremented { amount: 1 }),
            ],
        );
        let err = renderer().render(&past_max).unwrap_err();
        assert!(matches!(err, RenderError::Reduce { .. }));
        assert_eq!(err.event_type().as_str(), "counter:incremented");

        let negated_min = Aggregate::new(
            id.clone(),
            vec![recorded(&id, &generator, &Decremented { amount: i64::MIN })],
        );
        let err = renderer().render(&negated_min).unwrap_err();
        assert!(matches!(err, RenderError::Initialize { .. }));
    }

    #[test]
    fn test_checked_arithmetic() {
        let counter = Counter { current: i64::MIN };
        assert!(counter.minus(1).is_err());
        assert_eq!(counter.plus(1).unwrap(), i64::MIN + 1);
    }
}
