use serde::{Deserialize, Serialize};

use super::revision::Revision;
use super::stream_id::StreamId;

/// Projected view of a stream
///
/// `state` is `None` until an initializing event has been seen; such an
/// entity is the "not found" signal for callers. `revision` is always the
/// stream's latest revision, even if the projection ignored the last events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity<T> {
    pub id: StreamId,
    pub revision: Revision,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub state: Option<T>,
}

impl<T> Entity<T> {
    /// True once anything at all has been published to the stream
    pub fn initialized(&self) -> bool {
        !self.revision.is_initial()
    }

    pub fn state(&self) -> Option<&T> {
        self.state.as_ref()
    }

    pub fn into_state(self) -> Option<T> {
        self.state
    }
}
