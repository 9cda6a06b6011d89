// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Generic, reusable event sourcing infrastructure:
// - core:    stream ids, revisions, events, codec, errors
// - store:   the event store contract and its backends
// - render:  projecting a stream into typed entity state
// - command: routing commands to handlers and publishing their events
//
// Domain-specific code is in src/domain/
//
// ============================================================================

pub mod command;
pub mod core;
pub mod render;
pub mod store;
pub mod testing;

pub use self::command::*;
pub use self::core::*;
pub use self::render::*;
pub use self::store::*;
