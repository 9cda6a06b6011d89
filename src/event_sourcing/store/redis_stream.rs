use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamRangeReply;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;

use super::event_store::{publish_with_retry, EventStore, Expectation, PublishOptions};
use crate::event_sourcing::core::{
    Aggregate, CodecError, Data, EventId, EventStoreError, EventType, Metadata, NewEvent, RecordedEvent, Revision,
    StreamId,
};
use crate::utils::RetryConfig;

// ============================================================================
// Redis Streams Event Store - One Log Entry per Change Set
// ============================================================================
//
// Each stream is a Redis stream at `<prefix><encoded stream id>`. A publish
// appends exactly one entry holding the whole change set. Redis assigns the
// entry id (`<ms>-<seq>`), so no revision is stored: the revision of event i
// in an entry is derived on read from (ms, seq, i).
//
// The expected-last-entry guard runs as a Lua script so the check and the
// XADD are one atomic step on the server. An exact expectation names both
// the entry and the event index inside it, and only the entry's final event
// matches.
//
// ============================================================================

const BACKEND: &str = "redis";
const CHANGE_SET_FIELD: &str = "change-set";
const WRONG_LAST_SEQUENCE: &str = "WRONG_LAST_SEQUENCE";

/// ARGV[1]: expected last entry id, `0-0` for an empty stream, empty for
/// no expectation. ARGV[2]: expected index of the last event in that entry,
/// empty unless an exact revision is expected. ARGV[3]: change set payload.
const APPEND_SCRIPT: &str = r#"
    local key = KEYS[1]
    local expected = ARGV[1]
    local expected_index = ARGV[2]

    if expected ~= '' then
        local last = redis.call('XREVRANGE', key, '+', '-', 'COUNT', 1)
        local current = '0-0'
        if #last > 0 then
            current = last[1][1]
        end
        if current ~= expected then
            return redis.error_reply('WRONG_LAST_SEQUENCE expected ' .. expected .. ' found ' .. current)
        end

        if expected_index ~= '' then
            if #last == 0 then
                return redis.error_reply('WRONG_LAST_SEQUENCE expected ' .. expected .. ' on an empty stream')
            end
            local fields = last[1][2]
            local count = -1
            for i = 1, #fields, 2 do
                if fields[i] == 'change-set' then
                    count = #cjson.decode(fields[i + 1]).events
                end
            end
            if count - 1 ~= tonumber(expected_index) then
                return redis.error_reply('WRONG_LAST_SEQUENCE expected index ' .. expected_index .. ' of ' .. current)
            end
        end
    end

    return redis.call('XADD', key, '*', 'change-set', ARGV[3])
"#;

fn redis_error(error: redis::RedisError) -> EventStoreError {
    if error.code() == Some(WRONG_LAST_SEQUENCE) {
        return EventStoreError::RevisionConflict;
    }
    EventStoreError::backend(BACKEND, error)
}

/// Event as stored inside a log entry; position fields are derived on read
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggedEvent {
    #[serde(rename = "type")]
    event_type: EventType,
    data: Data,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggedChangeSet {
    events: Vec<LoggedEvent>,
}

/// Split a stream entry id `<ms>-<seq>`
fn parse_entry_id(entry_id: &str) -> Result<(u64, u64), EventStoreError> {
    let invalid = |reason: &str| EventStoreError::invalid_revision(entry_id, reason);
    let (ms, seq) = entry_id.split_once('-').ok_or_else(|| invalid("missing '-' in entry id"))?;
    let ms = ms.parse().map_err(|_| invalid("entry id milliseconds"))?;
    let seq = seq.parse().map_err(|_| invalid("entry id sequence"))?;
    Ok((ms, seq))
}

/// Entry id and event index a revision was derived from. A revision this
/// store could not have produced never matches the latest, so it conflicts.
fn entry_position_of(revision: &Revision) -> Result<(String, u16), EventStoreError> {
    let (ms, seq, index) = revision
        .log_position()
        .map_err(|_| EventStoreError::RevisionConflict)?;
    Ok((format!("{ms}-{seq}"), index))
}

/// Expand one log entry into recorded events
fn decode_entry(id: &StreamId, entry_id: &str, payload: &str) -> Result<Vec<RecordedEvent>, EventStoreError> {
    let (ms, seq) = parse_entry_id(entry_id)?;
    let change_set: LoggedChangeSet = serde_json::from_str(payload).map_err(CodecError::from)?;

    change_set
        .events
        .into_iter()
        .enumerate()
        .map(|(index, event)| {
            let index = u16::try_from(index).map_err(|e| EventStoreError::invalid_revision(entry_id, e))?;
            let revision = Revision::from_log_position(ms, seq, index);
            Ok(RecordedEvent {
                stream_id: id.clone(),
                id: EventId::from(&revision),
                timestamp: revision.timestamp()?,
                revision,
                event_type: event.event_type,
                metadata: event.metadata,
                data: event.data,
            })
        })
        .collect()
}

pub struct RedisStreamEventStore {
    connection: MultiplexedConnection,
    key_prefix: String,
    page_size: usize,
    retry: RetryConfig,
}

impl RedisStreamEventStore {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self {
            connection,
            key_prefix: "change-set.".to_string(),
            page_size: 97,
            retry: RetryConfig::revision_conflict(),
        }
    }

    /// Connect through a client and build a store on a multiplexed connection
    pub async fn connect(client: &redis::Client) -> Result<Self, EventStoreError> {
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_error)?;
        Ok(Self::new(connection))
    }

    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: NonZeroU32) -> Self {
        self.page_size = usize::try_from(page_size.get()).unwrap_or(usize::MAX);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn key(&self, id: &StreamId) -> Result<String, EventStoreError> {
        Ok(format!("{}{}", self.key_prefix, id.storage_key()?))
    }

    async fn try_publish(
        &self,
        key: &str,
        expected: &(String, String),
        payload: &str,
        event_count: usize,
    ) -> Result<Revision, EventStoreError> {
        let mut connection = self.connection.clone();
        let entry_id: String = redis::Script::new(APPEND_SCRIPT)
            .key(key)
            .arg(&expected.0)
            .arg(&expected.1)
            .arg(payload)
            .invoke_async(&mut connection)
            .await
            .map_err(redis_error)?;

        let (ms, seq) = parse_entry_id(&entry_id)?;
        let last_index = u16::try_from(event_count - 1).map_err(|e| EventStoreError::invalid_revision(&entry_id, e))?;
        Ok(Revision::from_log_position(ms, seq, last_index))
    }
}

#[async_trait]
impl EventStore for RedisStreamEventStore {
    async fn load(&self, id: &StreamId) -> Result<Aggregate, EventStoreError> {
        let key = self.key(id)?;
        let mut connection = self.connection.clone();

        let mut events = Vec::new();
        let mut start = "-".to_string();
        loop {
            let reply: StreamRangeReply = connection
                .xrange_count(&key, &start, "+", self.page_size)
                .await
                .map_err(redis_error)?;

            let page_len = reply.ids.len();
            for entry in &reply.ids {
                let payload: String = entry
                    .get(CHANGE_SET_FIELD)
                    .ok_or_else(|| EventStoreError::backend(BACKEND, format!("entry {} has no change set", entry.id)))?;
                events.extend(decode_entry(id, &entry.id, &payload)?);
            }

            match reply.ids.last() {
                Some(last) if page_len >= self.page_size => start = format!("({}", last.id),
                _ => break,
            }
        }

        tracing::debug!(stream = %id, events = events.len(), "Loaded stream");
        Ok(Aggregate::new(id.clone(), events))
    }

    async fn publish(
        &self,
        id: &StreamId,
        options: &PublishOptions,
        events: Vec<NewEvent>,
    ) -> Result<Revision, EventStoreError> {
        if events.is_empty() {
            return Err(EventStoreError::EmptyBatch);
        }

        let key = self.key(id)?;
        let expected = match options.expectation() {
            Expectation::Any => (String::new(), String::new()),
            Expectation::Empty => ("0-0".to_string(), String::new()),
            Expectation::Exactly(revision) => {
                let (entry_id, index) = entry_position_of(revision)?;
                (entry_id, index.to_string())
            }
        };

        let change_set = LoggedChangeSet {
            events: events
                .iter()
                .map(|event| LoggedEvent {
                    event_type: event.event_type.clone(),
                    data: event.data.clone(),
                    metadata: options.metadata.clone(),
                })
                .collect(),
        };
        let payload = serde_json::to_string(&change_set).map_err(CodecError::from)?;

        let revision = publish_with_retry(options, &self.retry, |_| {
            self.try_publish(&key, &expected, &payload, events.len())
        })
        .await?;

        tracing::info!(
            stream = %id,
            revision = %revision,
            event_count = events.len(),
            "Appended change set entry"
        );

        Ok(revision)
    }

    async fn remove(&self, id: &StreamId) -> Result<u64, EventStoreError> {
        let key = self.key(id)?;
        let mut connection = self.connection.clone();

        let (removed, _deleted): (u64, u64) = redis::pipe()
            .atomic()
            .cmd("XLEN")
            .arg(&key)
            .cmd("DEL")
            .arg(&key)
            .query_async(&mut connection)
            .await
            .map_err(redis_error)?;

        tracing::info!(stream = %id, removed, "Removed stream");
        Ok(removed)
    }
}
