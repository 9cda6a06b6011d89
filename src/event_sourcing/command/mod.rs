// ============================================================================
// Commands - Write Path
// ============================================================================
//
// Commands are routed by name to handlers that decide which events to
// publish. `EntityService` runs the full load / dispatch / reload cycle.
//
// ============================================================================

pub mod command;
pub mod dispatcher;
pub mod handler;
pub mod service;

pub use command::{Command, CommandName, RemoteCommand};
pub use dispatcher::{DispatchError, Dispatcher};
pub use handler::{CommandHandler, Publisher};
pub use service::EntityService;
