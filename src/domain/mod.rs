// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Each entity has its own subdirectory with:
// - Events
// - Commands
// - State and renderer
// - Command handlers
//
// This layer only talks to the event sourcing infrastructure through its
// public contracts.
//
// ============================================================================

pub mod counter;
