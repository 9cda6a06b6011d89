use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::codec::Data;
use super::errors::CodecError;
use super::named::Named;
use super::revision::Revision;
use super::stream_id::StreamId;

// ============================================================================
// Recorded Events
// ============================================================================
//
// A `RecordedEvent` is the immutable fact a store hands back from `load`.
// Everything on it is assigned at publish time: the revision (and the event
// id derived from it), the batch timestamp, and the causal metadata copied
// from the publish options.
//
// ============================================================================

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

pub(crate) use string_newtype;

string_newtype!(
    /// Unique id of a recorded event; always equal to its revision
    EventId
);
string_newtype!(
    /// Name a payload is registered under, e.g. `counter:incremented`
    EventType
);
string_newtype!(CorrelationId);
string_newtype!(
    /// RFC 3339 UTC time with millisecond precision
    Timestamp
);

impl From<&Revision> for EventId {
    fn from(revision: &Revision) -> Self {
        Self(revision.as_str().to_string())
    }
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    pub fn to_datetime(&self) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(&self.0).map(|t| t.with_timezone(&Utc))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Self(time.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

/// Causal links attached to every event of one publish call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    #[serde(rename = "aggregate")]
    pub stream_id: StreamId,
    pub revision: Revision,
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub metadata: Metadata,
    pub data: Data,
}

impl RecordedEvent {
    /// Decode the payload as `E`
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E, CodecError> {
        self.data.decode()
    }
}

// ============================================================================
// Domain Events
// ============================================================================

/// Typed event payload with a registered name
///
/// Implementors usually only need `#[derive(Serialize, Deserialize)]` and an
/// `event_type` matching the name stored alongside the payload.
pub trait DomainEvent: Named + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn event_type() -> EventType
    where
        Self: Sized,
    {
        EventType::from(Self::type_name())
    }
}

/// An event about to be published: its registered type and encoded payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: Data,
}

impl NewEvent {
    pub fn new(event_type: impl Into<EventType>, data: Data) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Encode a typed domain event as JSON
    pub fn from_domain<E: DomainEvent>(event: &E) -> Result<Self, CodecError> {
        Ok(Self::new(E::event_type(), Data::json(event)?))
    }
}
