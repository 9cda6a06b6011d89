use serde::{Deserialize, Serialize};

use crate::event_sourcing::command::Command;
use crate::event_sourcing::core::Named;

// ============================================================================
// Counter Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Increment {
    pub amount: i64,
}

impl Named for Increment {
    fn type_name() -> String {
        "counter:increment".to_string()
    }
}

impl Command for Increment {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decrement {
    pub amount: i64,
}

impl Named for Decrement {
    fn type_name() -> String {
        "counter:decrement".to_string()
    }
}

impl Command for Decrement {}

/// Overwrite the counter with a value from the service's randomizer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Randomize {}

impl Named for Randomize {
    fn type_name() -> String {
        "counter:randomize".to_string()
    }
}

impl Command for Randomize {}
