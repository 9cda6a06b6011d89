use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use ulid::{Generator, Ulid};

use super::errors::EventStoreError;
use super::event::Timestamp;

// ============================================================================
// Revisions
// ============================================================================
//
// A revision is a 26 character Crockford base32 ULID: 48 bits of
// milliseconds followed by 80 bits of entropy. String order equals numeric
// order, so revisions compare lexicographically.
//
// Two ways to produce one:
// - `RevisionGenerator` for stores that assign revisions before writing.
//   Within one millisecond the entropy is incremented, never re-randomized.
// - `Revision::from_log_position` for log-backed stores. The entropy holds
//   the broker sequence number and the index inside the change set, so order
//   follows the log rather than the local clock.
//
// ============================================================================

pub const INITIAL_REVISION: &str = "00000000000000000000000000";

/// Sortable position token within a stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Sentinel for "stream has no events yet"
    pub fn initial() -> Self {
        Self(INITIAL_REVISION.to_string())
    }

    pub fn is_initial(&self) -> bool {
        self.0 == INITIAL_REVISION
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic revision for the `index`th event of a log entry
    pub fn from_log_position(timestamp_ms: u64, sequence: u64, index: u16) -> Self {
        let entropy = (u128::from(sequence) << 16) | u128::from(index);
        Self(Ulid::from_parts(timestamp_ms, entropy).to_string())
    }

    /// Inverse of [`Revision::from_log_position`]: `(timestamp_ms, sequence, index)`
    pub fn log_position(&self) -> Result<(u64, u64, u16), EventStoreError> {
        let ulid = self.parse()?;
        let entropy = ulid.random();
        Ok((ulid.timestamp_ms(), (entropy >> 16) as u64, (entropy & 0xffff) as u16))
    }

    /// Revision of the event at 0-based `position` in a positional stream.
    ///
    /// Revisions there are 1-based so that position 0 still sorts after the
    /// initial sentinel. Upper-case hex keeps the value a valid ULID string.
    pub fn from_stream_position(position: u64) -> Self {
        Self(format!("{:026X}", u128::from(position) + 1))
    }

    /// Inverse of [`Revision::from_stream_position`]; `None` for the initial
    /// revision
    pub fn stream_position(&self) -> Result<Option<u64>, EventStoreError> {
        let value =
            u128::from_str_radix(&self.0, 16).map_err(|e| EventStoreError::invalid_revision(self.as_str(), e))?;
        match value {
            0 => Ok(None),
            n => u64::try_from(n - 1)
                .map(Some)
                .map_err(|e| EventStoreError::invalid_revision(self.as_str(), e)),
        }
    }

    /// Commit time encoded in the revision's timestamp bits
    pub fn timestamp(&self) -> Result<Timestamp, EventStoreError> {
        let ulid = self.parse()?;
        let millis = i64::try_from(ulid.timestamp_ms())
            .map_err(|e| EventStoreError::invalid_revision(self.as_str(), e))?;
        let time = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| EventStoreError::invalid_revision(self.as_str(), "timestamp out of range"))?;
        Ok(Timestamp::from(time))
    }

    fn parse(&self) -> Result<Ulid, EventStoreError> {
        Ulid::from_string(&self.0).map_err(|e| EventStoreError::invalid_revision(self.as_str(), e))
    }
}

impl Default for Revision {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Revision {
    type Err = EventStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == INITIAL_REVISION {
            return Ok(Self::initial());
        }
        let ulid = Ulid::from_string(s).map_err(|e| EventStoreError::invalid_revision(s, e))?;
        Ok(Self(ulid.to_string()))
    }
}

impl From<Ulid> for Revision {
    fn from(ulid: Ulid) -> Self {
        Self(ulid.to_string())
    }
}

// ============================================================================
// Generator
// ============================================================================

struct GeneratorState {
    generator: Generator,
    last: Ulid,
}

/// Monotonic revision source. One instance per store, shared by every
/// publish that store performs.
pub struct RevisionGenerator {
    state: Mutex<GeneratorState>,
}

impl RevisionGenerator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GeneratorState {
                generator: Generator::new(),
                last: Ulid::nil(),
            }),
        }
    }

    /// Next revision at or after `time`. Strictly greater than every revision
    /// this generator has produced before, even when the clock stalls or
    /// steps backwards.
    pub fn new_revision(&self, time: DateTime<Utc>) -> Revision {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let next = match state.generator.generate_from_datetime(SystemTime::from(time)) {
            Ok(ulid) => ulid,
            Err(_) => {
                // Entropy exhausted for this millisecond, borrow the next one.
                let bumped = SystemTime::UNIX_EPOCH + Duration::from_millis(state.last.timestamp_ms() + 1);
                state.generator = Generator::new();
                match state.generator.generate_from_datetime(bumped) {
                    Ok(ulid) => ulid,
                    Err(_) => Ulid::from_parts(state.last.timestamp_ms() + 1, 0),
                }
            }
        };

        state.last = next;
        Revision::from(next)
    }
}

impl Default for RevisionGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RevisionGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevisionGenerator").finish_non_exhaustive()
    }
}
