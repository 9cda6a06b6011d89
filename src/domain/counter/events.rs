use serde::{Deserialize, Serialize};

use crate::event_sourcing::core::{DomainEvent, Named};

// ============================================================================
// Counter Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incremented {
    pub amount: i64,
}

impl Named for Incremented {
    fn type_name() -> String {
        "counter:incremented".to_string()
    }
}

impl DomainEvent for Incremented {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decremented {
    pub amount: i64,
}

impl Named for Decremented {
    fn type_name() -> String {
        "counter:decremented".to_string()
    }
}

impl DomainEvent for Decremented {}

/// Counter was overwritten with a random value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Randomized {
    pub value: i64,
}

impl Named for Randomized {
    fn type_name() -> String {
        "counter:randomized".to_string()
    }
}

impl DomainEvent for Randomized {}
