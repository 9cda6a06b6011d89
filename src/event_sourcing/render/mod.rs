// ============================================================================
// Render - Streams to Entities
// ============================================================================
//
// `Renderer` is the pure fold from an aggregate to typed state;
// `EntityLoader` pairs it with a store for the read path.
//
// ============================================================================

pub mod loader;
pub mod renderer;

pub use loader::{EntityLoader, LoadError};
pub use renderer::{RenderError, Renderer};
