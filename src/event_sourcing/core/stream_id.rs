use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::EventStoreError;

// ============================================================================
// Stream Identity
// ============================================================================
//
// A stream is named by a `{type, key}` pair. Storage backends need a single
// string key, so the pair is joined with a fixed delimiter. The type may not
// contain the delimiter; the key may.
//
// ============================================================================

pub const STREAM_ID_DELIMITER: char = '.';

/// Two-part name identifying one event stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    #[serde(rename = "type")]
    pub stream_type: String,
    pub key: String,
}

impl StreamId {
    pub fn new(stream_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            stream_type: stream_type.into(),
            key: key.into(),
        }
    }

    /// Like [`StreamId::new`], rejecting a type that could not round-trip
    pub fn try_new(stream_type: impl Into<String>, key: impl Into<String>) -> Result<Self, EventStoreError> {
        let id = Self::new(stream_type, key);
        id.validate()?;
        Ok(id)
    }

    /// A type that is empty or holds the delimiter would collide with
    /// another id once encoded
    pub fn validate(&self) -> Result<(), EventStoreError> {
        if self.stream_type.is_empty() || self.stream_type.contains(STREAM_ID_DELIMITER) {
            return Err(EventStoreError::InvalidStreamId(self.encode()));
        }
        Ok(())
    }

    /// Validated [`StreamId::encode`], used wherever the id becomes a key
    pub fn storage_key(&self) -> Result<String, EventStoreError> {
        self.validate()?;
        Ok(self.encode())
    }

    /// Single-string storage key, e.g. `counter.test-1`
    pub fn encode(&self) -> String {
        format!("{}{}{}", self.stream_type, STREAM_ID_DELIMITER, self.key)
    }

    /// Exact inverse of [`StreamId::encode`]
    pub fn decode(encoded: &str) -> Result<Self, EventStoreError> {
        match encoded.split_once(STREAM_ID_DELIMITER) {
            Some((stream_type, key)) if !stream_type.is_empty() => Ok(Self::new(stream_type, key)),
            _ => Err(EventStoreError::InvalidStreamId(encoded.to_string())),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for StreamId {
    type Err = EventStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
