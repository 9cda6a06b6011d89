use crate::utils::IsTransient;

// ============================================================================
// Event Store Errors
// ============================================================================
//
// Every backend normalizes its native "precondition failed" signal
// (LWT not applied, unique-key violation, wrong last stream entry) into the
// single `RevisionConflict` value. Anything else from the transport passes
// through untouched inside `Backend`.
//
// ============================================================================

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Payload codec failures
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("expected encoding {expected}, got {actual}")]
    InvalidEncoding { expected: String, actual: String },

    #[error("payload serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("revision-conflict")]
    RevisionConflict,

    #[error("attempted to publish empty list of events")]
    EmptyBatch,

    #[error("invalid stream id {0:?}: expected a non-empty type without '.'")]
    InvalidStreamId(String),

    #[error("invalid revision {revision:?}: {reason}")]
    InvalidRevision { revision: String, reason: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("{backend} error: {source}")]
    Backend {
        backend: &'static str,
        #[source]
        source: BoxError,
    },
}

impl EventStoreError {
    pub fn backend(backend: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Backend {
            backend,
            source: source.into(),
        }
    }

    pub fn invalid_revision(revision: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidRevision {
            revision: revision.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_revision_conflict(&self) -> bool {
        matches!(self, Self::RevisionConflict)
    }
}

/// Only a lost race between writers is worth another attempt
impl IsTransient for EventStoreError {
    fn is_transient(&self) -> bool {
        self.is_revision_conflict()
    }
}
