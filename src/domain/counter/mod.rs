// ============================================================================
// Counter Domain - the smallest useful entity
// ============================================================================
//
// - Events (Incremented, Decremented, Randomized)
// - Commands (Increment, Decrement, Randomize)
// - State and its renderer (Counter)
// - Command handlers and the wired-up service
//
// ============================================================================

pub mod command_handler;
pub mod commands;
pub mod events;
pub mod state;

pub use command_handler::*;
pub use commands::*;
pub use events::*;
pub use state::*;
