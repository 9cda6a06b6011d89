use async_trait::async_trait;
use chrono::Utc;
use futures_util::TryStreamExt;
use scylla::client::session::Session;
use scylla::statement::batch::Batch;
use scylla::statement::unprepared::Statement;
use scylla::value::{CqlValue, Row};
use std::num::NonZeroU32;
use std::sync::Arc;

use super::event_store::{publish_with_retry, ChangeSet, EventStore, Expectation, PublishOptions};
use crate::event_sourcing::core::{
    Aggregate, BoxError, CodecError, EventStoreError, NewEvent, Revision, RevisionGenerator, StreamId,
};
use crate::utils::RetryConfig;

// ============================================================================
// ScyllaDB Event Store - Conditional Batch per Change Set
// ============================================================================
//
// One partition per stream (pk = encoded stream id) holding:
// - one row per change set, sk = "change-set#<terminal revision>", with the
//   whole change set as JSON
// - one pointer row, sk = "latest-revision", holding the latest revision
//
// A publish writes both rows in a single LWT batch. The condition sits on
// the pointer row, so Paxos arbitrates between concurrent writers and a
// rejected batch leaves no trace:
//
//   expected initial    -> IF NOT EXISTS
//   expected revision r -> IF revision = r
//   no expectation      -> IF revision < new  (IF NOT EXISTS when no pointer)
//
// A batch that is not `[applied]` is a revision conflict.
//
// ============================================================================

const BACKEND: &str = "scylla";
const CHANGE_SET_PREFIX: &str = "change-set#";
const CHANGE_SET_UPPER_BOUND: &str = "change-set$";
const LATEST_REVISION: &str = "latest-revision";
const REMOVE_PAGE_SIZE: usize = 25;

fn scylla_error(error: impl Into<BoxError>) -> EventStoreError {
    EventStoreError::backend(BACKEND, error)
}

fn sort_key(revision: &Revision) -> String {
    format!("{CHANGE_SET_PREFIX}{revision}")
}

pub struct ScyllaEventStore {
    session: Arc<Session>,
    keyspace: String,
    table: String,
    page_size: i32,
    revisions: RevisionGenerator,
    retry: RetryConfig,
}

impl ScyllaEventStore {
    pub fn new(session: Arc<Session>, keyspace: &str, table: &str) -> Self {
        Self {
            session,
            keyspace: keyspace.to_string(),
            table: table.to_string(),
            page_size: 97,
            revisions: RevisionGenerator::new(),
            retry: RetryConfig::revision_conflict(),
        }
    }

    pub fn with_page_size(mut self, page_size: NonZeroU32) -> Self {
        self.page_size = i32::try_from(page_size.get()).unwrap_or(i32::MAX);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn qualified_table(&self) -> String {
        format!("{}.{}", self.keyspace, self.table)
    }

    /// Create the keyspace and change set table if missing
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        self.session
            .query_unpaged(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                     {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                    self.keyspace
                ),
                &[],
            )
            .await
            .map_err(scylla_error)?;

        self.session
            .query_unpaged(
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        pk text,
                        sk text,
                        revision text,
                        timestamp text,
                        change_set text,
                        PRIMARY KEY (pk, sk)
                    ) WITH CLUSTERING ORDER BY (sk ASC)",
                    self.qualified_table()
                ),
                &[],
            )
            .await
            .map_err(scylla_error)?;

        tracing::info!(keyspace = %self.keyspace, table = %self.table, "Scylla event store schema ready");
        Ok(())
    }

    async fn latest_revision(&self, pk: &str) -> Result<Option<String>, EventStoreError> {
        let result = self
            .session
            .query_unpaged(
                format!("SELECT revision FROM {} WHERE pk = ? AND sk = ?", self.qualified_table()),
                (pk, LATEST_REVISION),
            )
            .await
            .map_err(scylla_error)?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(None),
        };

        match rows_result.maybe_first_row::<(Option<String>,)>() {
            Ok(Some((revision,))) => Ok(revision),
            Ok(None) => Ok(None),
            Err(e) => Err(scylla_error(e)),
        }
    }

    async fn try_publish(
        &self,
        id: &StreamId,
        options: &PublishOptions,
        events: &[NewEvent],
    ) -> Result<Revision, EventStoreError> {
        let pk = id.storage_key()?;
        let now = Utc::now();
        let change_set = ChangeSet::assemble(id, options, events, now, |_| self.revisions.new_revision(now))?;
        let payload = serde_json::to_string(&change_set).map_err(CodecError::from)?;

        let revision = change_set.revision.as_str().to_string();
        let timestamp = change_set.timestamp.as_str().to_string();
        let table = self.qualified_table();

        let mut batch = Batch::default();
        batch.append_statement(
            format!("INSERT INTO {table} (pk, sk, revision, timestamp, change_set) VALUES (?, ?, ?, ?, ?)").as_str(),
        );
        let change_set_values = (
            pk.clone(),
            sort_key(&change_set.revision),
            revision.clone(),
            timestamp.clone(),
            payload,
        );

        let insert_pointer =
            format!("INSERT INTO {table} (pk, sk, revision, timestamp) VALUES (?, ?, ?, ?) IF NOT EXISTS");
        let update_pointer = |comparison: &str| {
            format!("UPDATE {table} SET revision = ?, timestamp = ? WHERE pk = ? AND sk = ? IF revision {comparison} ?")
        };

        let applied = match options.expectation() {
            Expectation::Empty => {
                batch.append_statement(insert_pointer.as_str());
                let pointer = (pk.clone(), LATEST_REVISION, revision.clone(), timestamp);
                self.execute_conditional(&batch, (change_set_values, pointer)).await?
            }
            Expectation::Exactly(expected) => {
                batch.append_statement(update_pointer("=").as_str());
                let pointer = (revision.clone(), timestamp, pk.clone(), LATEST_REVISION, expected.as_str());
                self.execute_conditional(&batch, (change_set_values, pointer)).await?
            }
            Expectation::Any => match self.latest_revision(&pk).await? {
                None => {
                    batch.append_statement(insert_pointer.as_str());
                    let pointer = (pk.clone(), LATEST_REVISION, revision.clone(), timestamp);
                    self.execute_conditional(&batch, (change_set_values, pointer)).await?
                }
                Some(_) => {
                    batch.append_statement(update_pointer("<").as_str());
                    let pointer = (
                        revision.clone(),
                        timestamp,
                        pk.clone(),
                        LATEST_REVISION,
                        revision.clone(),
                    );
                    self.execute_conditional(&batch, (change_set_values, pointer)).await?
                }
            },
        };

        if !applied {
            tracing::debug!(stream = %id, expectation = options.expectation().label(), "Conditional batch not applied");
            return Err(EventStoreError::RevisionConflict);
        }

        Ok(change_set.revision)
    }

    /// Run an LWT batch and report whether it was applied
    async fn execute_conditional<V>(&self, batch: &Batch, values: V) -> Result<bool, EventStoreError>
    where
        V: scylla::serialize::batch::BatchValues,
    {
        let result = self.session.batch(batch, values).await.map_err(scylla_error)?;
        let rows_result = result.into_rows_result().map_err(scylla_error)?;
        let mut rows = rows_result.rows::<Row>().map_err(scylla_error)?;

        match rows.next() {
            Some(row) => {
                let row = row.map_err(scylla_error)?;
                match row.columns.first() {
                    Some(Some(CqlValue::Boolean(applied))) => Ok(*applied),
                    other => Err(scylla_error(format!("unexpected [applied] column: {other:?}"))),
                }
            }
            None => Err(scylla_error("conditional batch returned no rows")),
        }
    }
}

#[async_trait]
impl EventStore for ScyllaEventStore {
    async fn load(&self, id: &StreamId) -> Result<Aggregate, EventStoreError> {
        let mut statement = Statement::new(format!(
            "SELECT change_set FROM {} WHERE pk = ? AND sk > ? AND sk < ?",
            self.qualified_table()
        ));
        statement.set_page_size(self.page_size);

        let mut rows = self
            .session
            .query_iter(statement, (id.storage_key()?, CHANGE_SET_PREFIX, CHANGE_SET_UPPER_BOUND))
            .await
            .map_err(scylla_error)?
            .rows_stream::<(String,)>()
            .map_err(scylla_error)?;

        let mut events = Vec::new();
        let mut change_sets = 0usize;
        while let Some((payload,)) = rows.try_next().await.map_err(scylla_error)? {
            let change_set: ChangeSet = serde_json::from_str(&payload).map_err(CodecError::from)?;
            events.extend(change_set.events);
            change_sets += 1;
        }

        tracing::debug!(stream = %id, change_sets, events = events.len(), "Loaded stream");
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

        let revision = publish_with_retry(options, &self.retry, |_| self.try_publish(id, options, &events)).await?;

        tracing::info!(
            stream = %id,
            revision = %revision,
            event_count = events.len(),
            "Appended change set"
        );

        Ok(revision)
    }

    async fn remove(&self, id: &StreamId) -> Result<u64, EventStoreError> {
        let pk = id.storage_key()?;
        let table = self.qualified_table();

        let mut statement = Statement::new(format!("SELECT sk FROM {table} WHERE pk = ?"));
        statement.set_page_size(REMOVE_PAGE_SIZE as i32);

        let mut rows = self
            .session
            .query_iter(statement, (pk.clone(),))
            .await
            .map_err(scylla_error)?
            .rows_stream::<(String,)>()
            .map_err(scylla_error)?;

        let delete = format!("DELETE FROM {table} WHERE pk = ? AND sk = ?");
        let mut removed = 0u64;
        let mut page: Vec<(String, String)> = Vec::with_capacity(REMOVE_PAGE_SIZE);

        while let Some((sk,)) = rows.try_next().await.map_err(scylla_error)? {
            page.push((pk.clone(), sk));
            if page.len() == REMOVE_PAGE_SIZE {
                removed += self.delete_page(&delete, &mut page).await?;
            }
        }
        if !page.is_empty() {
            removed += self.delete_page(&delete, &mut page).await?;
        }

        tracing::info!(stream = %id, removed, "Removed stream");
        Ok(removed)
    }
}

impl ScyllaEventStore {
    /// Delete one page of rows in a single logged batch
    async fn delete_page(&self, delete: &str, page: &mut Vec<(String, String)>) -> Result<u64, EventStoreError> {
        let mut batch = Batch::default();
        for _ in page.iter() {
            batch.append_statement(delete);
        }

        let rows = std::mem::take(page);
        let count = rows.len() as u64;
        self.session.batch(&batch, rows).await.map_err(scylla_error)?;
        Ok(count)
    }
}
