// ============================================================================
// Event Sourcing Store - Persistence Backends
// ============================================================================
//
// One contract (`EventStore`), several realizations:
// - `ScyllaEventStore`        conditional LWT batch per change set
// - `PostgresEventStore`      positional rows guarded by the primary key
// - `RedisStreamEventStore`   one stream entry per change set
// - `MemoryEventStore`        in-process, for tests and local runs
//
// ============================================================================

pub mod event_store;
pub mod instrumented;
pub mod memory;
pub mod postgres;
pub mod redis_stream;
pub mod scylla_store;

pub use event_store::{publish_with_retry, ChangeSet, EventStore, Expectation, PublishOptions};
pub use instrumented::InstrumentedEventStore;
pub use memory::MemoryEventStore;
pub use postgres::PostgresEventStore;
pub use redis_stream::RedisStreamEventStore;
pub use scylla_store::ScyllaEventStore;
