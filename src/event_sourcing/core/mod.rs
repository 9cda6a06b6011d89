// ============================================================================
// Event Sourcing Core - Shared Data Model
// ============================================================================
//
// Backend-agnostic types every other layer speaks:
// - stream identity and revisions
// - recorded events and their payload codec
// - aggregates (raw reads) and entities (projected reads)
// - the error taxonomy stores normalize into
//
// ============================================================================

pub mod aggregate;
pub mod codec;
pub mod entity;
pub mod errors;
pub mod event;
pub mod named;
pub mod revision;
pub mod stream_id;

pub use aggregate::Aggregate;
pub use codec::{Data, JsonCodec, PayloadCodec, JSON_ENCODING};
pub use entity::Entity;
pub use errors::{BoxError, CodecError, EventStoreError};
pub use event::{CorrelationId, DomainEvent, EventId, EventType, Metadata, NewEvent, RecordedEvent, Timestamp};
pub use named::{name_of, Named};
pub use revision::{Revision, RevisionGenerator, INITIAL_REVISION};
pub use stream_id::{StreamId, STREAM_ID_DELIMITER};
