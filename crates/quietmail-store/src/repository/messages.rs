//! Folder-aware message storage.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use tracing::{debug, error, info, warn};

use super::batch::{BatchOptions, BatchResult};
use crate::engine::EngineManager;
use crate::folder::{Column, Folder};
use crate::message::{Message, MessageId, row_to_message};
use crate::metrics::TimerGuard;
use crate::query::{self, Conditions, SelectOptions, SqlValue};
use crate::transaction::TransactionManager;
use crate::{Error, Result};

/// CRUD and batch operations on messages, one table per folder.
#[derive(Debug, Clone)]
pub struct MessageRepository {
    engine: Arc<EngineManager>,
}

impl MessageRepository {
    /// Create a repository on `engine`.
    #[must_use]
    pub const fn new(engine: Arc<EngineManager>) -> Self {
        Self { engine }
    }

    /// The engine this repository runs on.
    #[must_use]
    pub const fn engine(&self) -> &Arc<EngineManager> {
        &self.engine
    }

    async fn pool(&self) -> Result<SqlitePool> {
        self.engine.get_engine().await
    }

    async fn transactions(&self) -> Result<TransactionManager> {
        TransactionManager::for_engine(&self.engine).await
    }

    fn timer(&self, operation: &str) -> TimerGuard<'_> {
        self.engine
            .metrics()
            .start_timer(&format!("repository.{operation}"), &[])
    }

    /// Insert or replace `message` in its folder.
    ///
    /// # Errors
    ///
    /// Returns a validation error if [`Message::validate`] rejects the
    /// message, or an error if the database query fails.
    pub async fn save(&self, message: &Message) -> Result<()> {
        let _timer = self.timer("save");
        message.validate()?;
        let pool = self.pool().await?;
        query::upsert(message).build().execute(&pool).await?;
        debug!(id = %message.id, folder = %message.folder(), "Message saved");
        Ok(())
    }

    /// Save many messages, grouped by folder and chunked.
    ///
    /// Each chunk is written in its own transaction. A failing chunk marks
    /// every message in it as failed and the batch carries on with the next
    /// chunk. Cancellation is checked before each chunk.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad batch size, or an error if the
    /// engine cannot be opened. Chunk failures are reported in the result.
    pub async fn save_batch(
        &self,
        messages: &[Message],
        options: BatchOptions<'_>,
    ) -> Result<BatchResult> {
        let _timer = self.timer("save_batch");
        let batch_size = self.batch_size(options.batch_size)?;
        let started = Instant::now();
        let mut result = BatchResult::new(messages.len());
        if messages.is_empty() {
            return Ok(result);
        }

        let mut by_folder: BTreeMap<Folder, Vec<&Message>> = BTreeMap::new();
        for message in messages {
            by_folder.entry(message.folder()).or_default().push(message);
        }

        let manager = self.transactions().await?;
        'folders: for (folder, items) in &by_folder {
            for chunk in items.chunks(batch_size) {
                if options.is_cancelled() {
                    info!(
                        processed = result.processed(),
                        total = result.total,
                        "Batch save cancelled"
                    );
                    result.cancelled = true;
                    break 'folders;
                }

                let outcome = match manager.begin().await {
                    Ok(mut tx) => {
                        let written = upsert_all(tx.conn(), chunk).await;
                        tx.finish(written).await
                    }
                    Err(e) => Err(e),
                };

                match outcome {
                    Ok(()) => result.succeeded += chunk.len(),
                    Err(e) => {
                        error!(folder = %folder, size = chunk.len(), error = %e, "Batch chunk failed");
                        let reason = e.to_string();
                        for message in chunk {
                            result.record_failure(message.id.clone(), reason.clone());
                        }
                    }
                }
                options.report(result.processed(), result.total);
            }
        }

        result.duration = started.elapsed();
        self.record_batch(&result);
        info!(
            succeeded = result.succeeded,
            total = result.total,
            success_rate = format_args!("{:.1}%", result.success_rate()),
            duration = ?result.duration,
            "Batch save complete"
        );
        Ok(result)
    }

    /// Look up a message by identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_id(&self, id: &MessageId, folder: Folder) -> Result<Option<Message>> {
        let _timer = self.timer("find_by_id");
        let pool = self.pool().await?;
        let mut qb = query::select(
            folder,
            &Conditions::new().equals(Column::Uid, id),
            &SelectOptions {
                limit: Some(1),
                ..SelectOptions::default()
            },
        )?;
        let row = qb.build().fetch_optional(&pool).await?;
        row.map(|r| row_to_message(&r, folder)).transpose()
    }

    /// Page through a folder, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_all(&self, folder: Folder, limit: u32, offset: u32) -> Result<Vec<Message>> {
        let _timer = self.timer("find_all");
        self.select(
            folder,
            &Conditions::new(),
            SelectOptions {
                limit: Some(limit),
                offset: Some(offset),
                ..SelectOptions::default()
            },
        )
        .await
    }

    /// Fetch several messages by identifier. Unknown identifiers are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_by_ids(&self, ids: &[MessageId], folder: Folder) -> Result<Vec<Message>> {
        let _timer = self.timer("find_by_ids");
        let mut messages = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.engine.config().default_batch_size) {
            let conditions = Conditions::new().any_of(Column::Uid, chunk);
            messages.extend(
                self.select(folder, &conditions, SelectOptions::default())
                    .await?,
            );
        }
        Ok(messages)
    }

    /// Messages that have attachments, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn find_with_attachments(&self, folder: Folder, limit: u32) -> Result<Vec<Message>> {
        let _timer = self.timer("find_with_attachments");
        self.select(
            folder,
            &Conditions::new().not_equals(Column::Attachments, ""),
            SelectOptions {
                limit: Some(limit),
                ..SelectOptions::default()
            },
        )
        .await
    }

    async fn select(
        &self,
        folder: Folder,
        conditions: &Conditions,
        options: SelectOptions,
    ) -> Result<Vec<Message>> {
        let pool = self.pool().await?;
        let mut qb = query::select(folder, conditions, &options)?;
        let rows = qb.build().fetch_all(&pool).await?;
        rows.iter().map(|r| row_to_message(r, folder)).collect()
    }

    /// Delete a message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such message exists.
    pub async fn delete(&self, id: &MessageId, folder: Folder) -> Result<()> {
        let _timer = self.timer("delete");
        let pool = self.pool().await?;
        let done = query::delete(folder, id).build().execute(&pool).await?;
        if done.rows_affected() == 0 {
            return Err(not_found(id, folder));
        }
        debug!(%id, %folder, "Message deleted");
        Ok(())
    }

    /// Delete many messages in chunked transactions. Identifiers absent from
    /// the folder are reported as failures.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad batch size, or an error if the
    /// engine cannot be opened.
    pub async fn delete_batch(
        &self,
        ids: &[MessageId],
        folder: Folder,
        options: BatchOptions<'_>,
    ) -> Result<BatchResult> {
        let _timer = self.timer("delete_batch");
        let batch_size = self.batch_size(options.batch_size)?;
        let started = Instant::now();
        let mut result = BatchResult::new(ids.len());
        let manager = self.transactions().await?;

        for chunk in ids.chunks(batch_size) {
            if options.is_cancelled() {
                result.cancelled = true;
                break;
            }

            let outcome = match manager.begin().await {
                Ok(mut tx) => {
                    let deleted = delete_existing(tx.conn(), chunk, folder).await;
                    tx.finish(deleted).await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(deleted) => {
                    for id in chunk {
                        if deleted.contains(id.as_str()) {
                            result.succeeded += 1;
                        } else {
                            let reason = not_found(id, folder).to_string();
                            result.record_failure(id.clone(), reason);
                        }
                    }
                }
                Err(e) => {
                    error!(%folder, size = chunk.len(), error = %e, "Batch delete chunk failed");
                    let reason = e.to_string();
                    for id in chunk {
                        result.record_failure(id.clone(), reason.clone());
                    }
                }
            }
            options.report(result.processed(), result.total);
        }

        result.duration = started.elapsed();
        self.record_batch(&result);
        info!(succeeded = result.succeeded, total = result.total, %folder, "Batch delete complete");
        Ok(result)
    }

    /// Whether a message exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn exists(&self, id: &MessageId, folder: Folder) -> Result<bool> {
        let found = self.exists_batch(std::slice::from_ref(id), folder).await?;
        Ok(found.get(id).copied().unwrap_or(false))
    }

    /// Membership of many identifiers, resolved with one query per
    /// `max_batch_size` identifiers.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn exists_batch(
        &self,
        ids: &[MessageId],
        folder: Folder,
    ) -> Result<HashMap<MessageId, bool>> {
        let _timer = self.timer("exists_batch");
        let mut found: HashMap<MessageId, bool> = ids.iter().map(|id| (id.clone(), false)).collect();
        if ids.is_empty() {
            return Ok(found);
        }

        let pool = self.pool().await?;
        for chunk in ids.chunks(self.engine.config().max_batch_size) {
            let rows = query::existing_ids(folder, chunk)
                .build()
                .fetch_all(&pool)
                .await?;
            for row in rows {
                let uid: String = row.try_get("uid")?;
                if let Ok(id) = MessageId::new(uid) {
                    found.insert(id, true);
                }
            }
        }
        Ok(found)
    }

    /// Move a message to another folder.
    ///
    /// The read, insert and delete run in one transaction, so the message is
    /// in exactly one of the two folders whatever happens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the message is not in `from`, or a
    /// validation error if `from == to`.
    pub async fn move_message(&self, id: &MessageId, from: Folder, to: Folder) -> Result<Message> {
        let _timer = self.timer("move");
        check_move(from, to)?;

        let manager = self.transactions().await?;
        let mut tx = manager.begin().await?;
        let outcome = move_in(tx.conn(), id, from, to).await;
        let message = tx.finish(outcome).await?;
        info!(%id, %from, %to, "Message moved");
        Ok(message)
    }

    /// Move many messages. Each chunk runs in one transaction and each
    /// message in its own savepoint, so a missing message only fails itself.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad batch size or `from == to`, or an
    /// error if the engine cannot be opened.
    pub async fn move_batch(
        &self,
        ids: &[MessageId],
        from: Folder,
        to: Folder,
        options: BatchOptions<'_>,
    ) -> Result<BatchResult> {
        let _timer = self.timer("move_batch");
        check_move(from, to)?;
        let batch_size = self.batch_size(options.batch_size)?;
        let started = Instant::now();
        let mut result = BatchResult::new(ids.len());
        let manager = self.transactions().await?;

        for chunk in ids.chunks(batch_size) {
            if options.is_cancelled() {
                result.cancelled = true;
                break;
            }

            match move_chunk(&manager, chunk, from, to).await {
                Ok(failures) => {
                    result.succeeded += chunk.len() - failures.len();
                    for (id, reason) in failures {
                        result.record_failure(id, reason);
                    }
                }
                Err(e) => {
                    error!(%from, %to, size = chunk.len(), error = %e, "Batch move chunk failed");
                    let reason = e.to_string();
                    for id in chunk {
                        result.record_failure(id.clone(), reason.clone());
                    }
                }
            }
            options.report(result.processed(), result.total);
        }

        result.duration = started.elapsed();
        self.record_batch(&result);
        info!(succeeded = result.succeeded, total = result.total, %from, %to, "Batch move complete");
        Ok(result)
    }

    /// Number of messages in a folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count(&self, folder: Folder) -> Result<u64> {
        let _timer = self.timer("count");
        self.count_rows(folder, &Conditions::new()).await
    }

    /// Number of messages in a folder matching `conditions`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a condition names a column the folder
    /// lacks, or an error if the database query fails.
    pub async fn count_where(&self, folder: Folder, conditions: &Conditions) -> Result<u64> {
        let _timer = self.timer("count_where");
        self.count_rows(folder, conditions).await
    }

    async fn count_rows(&self, folder: Folder, conditions: &Conditions) -> Result<u64> {
        let pool = self.pool().await?;
        let mut qb = query::count(folder, conditions)?;
        let row = qb.build().fetch_one(&pool).await?;
        let count: i64 = row.try_get("count")?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Flag a message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Capability`] for folders without flags, or
    /// [`Error::NotFound`] if the message doesn't exist.
    pub async fn flag(&self, id: &MessageId, folder: Folder) -> Result<()> {
        self.set_flagged(id, folder, true).await
    }

    /// Clear a message's flag.
    ///
    /// # Errors
    ///
    /// See [`flag`](Self::flag).
    pub async fn unflag(&self, id: &MessageId, folder: Folder) -> Result<()> {
        self.set_flagged(id, folder, false).await
    }

    /// Set or clear a message's flag.
    ///
    /// # Errors
    ///
    /// See [`flag`](Self::flag).
    pub async fn set_flagged(&self, id: &MessageId, folder: Folder, flagged: bool) -> Result<()> {
        let _timer = self.timer("flag");
        if !folder.supports_flagging() {
            return Err(Error::Capability {
                operation: "flagging",
                folder,
            });
        }
        self.update_column(id, folder, Column::Flagged, SqlValue::Bool(flagged))
            .await
    }

    /// Mark a message as read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the message doesn't exist.
    pub async fn mark_read(&self, id: &MessageId, folder: Folder) -> Result<()> {
        let _timer = self.timer("mark_read");
        self.update_column(id, folder, Column::IsRead, SqlValue::Bool(true))
            .await
    }

    /// Mark a message as unread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the message doesn't exist.
    pub async fn mark_unread(&self, id: &MessageId, folder: Folder) -> Result<()> {
        let _timer = self.timer("mark_unread");
        self.update_column(id, folder, Column::IsRead, SqlValue::Bool(false))
            .await
    }

    async fn update_column(
        &self,
        id: &MessageId,
        folder: Folder,
        column: Column,
        value: SqlValue,
    ) -> Result<()> {
        let pool = self.pool().await?;
        let mut qb = query::update(folder, id, &[(column, value)])?;
        let done = qb.build().execute(&pool).await?;
        if done.rows_affected() == 0 {
            return Err(not_found(id, folder));
        }
        debug!(%id, %folder, %column, "Message updated");
        Ok(())
    }

    /// Largest numeric identifier in a folder, 0 if it is empty.
    ///
    /// Never fails: lookup errors are logged and reported as 0 so that an
    /// incremental sync starts over from the beginning.
    pub async fn get_highest_uid(&self, folder: Folder) -> u64 {
        let _timer = self.timer("get_highest_uid");
        match self.highest_uid(folder).await {
            Ok(uid) => uid,
            Err(e) => {
                warn!(%folder, error = %e, "Failed to read highest UID, falling back to 0");
                0
            }
        }
    }

    async fn highest_uid(&self, folder: Folder) -> Result<u64> {
        let pool = self.pool().await?;
        let row = query::highest_uid(folder).build().fetch_one(&pool).await?;
        let highest: i64 = row.try_get("highest")?;
        Ok(u64::try_from(highest).unwrap_or(0))
    }

    fn batch_size(&self, requested: Option<usize>) -> Result<usize> {
        let config = self.engine.config();
        let size = requested.unwrap_or(config.default_batch_size);
        if size == 0 || size > config.max_batch_size {
            return Err(Error::validation(format!(
                "batch size must be between 1 and {}, got {size}",
                config.max_batch_size
            )));
        }
        Ok(size)
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_batch(&self, result: &BatchResult) {
        let metrics = self.engine.metrics();
        metrics.increment("repository.batch.succeeded", result.succeeded as f64, &[]);
        metrics.increment("repository.batch.failed", result.failed as f64, &[]);
    }
}

fn not_found(id: &MessageId, folder: Folder) -> Error {
    Error::NotFound {
        id: id.to_string(),
        folder,
    }
}

fn check_move(from: Folder, to: Folder) -> Result<()> {
    if from == to {
        return Err(Error::validation(format!(
            "cannot move a message from {from} to itself"
        )));
    }
    Ok(())
}

async fn upsert_all(conn: &mut SqliteConnection, messages: &[&Message]) -> Result<()> {
    for message in messages {
        message.validate()?;
        query::upsert(message).build().execute(&mut *conn).await?;
    }
    Ok(())
}

async fn delete_existing(
    conn: &mut SqliteConnection,
    ids: &[MessageId],
    folder: Folder,
) -> Result<HashSet<String>> {
    let rows = query::existing_ids(folder, ids)
        .build()
        .fetch_all(&mut *conn)
        .await?;
    let existing: Vec<String> = rows
        .iter()
        .map(|r| r.try_get("uid"))
        .collect::<std::result::Result<_, _>>()?;
    let existing_ids: Vec<MessageId> = existing
        .iter()
        .filter_map(|uid| MessageId::new(uid.as_str()).ok())
        .collect();
    query::delete_many(folder, &existing_ids)
        .build()
        .execute(&mut *conn)
        .await?;
    Ok(existing.into_iter().collect())
}

/// Read from `from`, insert into `to`, delete from `from`.
pub(crate) async fn move_in(
    conn: &mut SqliteConnection,
    id: &MessageId,
    from: Folder,
    to: Folder,
) -> Result<Message> {
    let mut message = read_in(conn, id, from).await?;
    message.move_to(to);
    insert_in(conn, &message).await?;
    delete_in(conn, id, from).await?;
    Ok(message)
}

async fn read_in(conn: &mut SqliteConnection, id: &MessageId, folder: Folder) -> Result<Message> {
    let mut qb = query::select(
        folder,
        &Conditions::new().equals(Column::Uid, id),
        &SelectOptions::default(),
    )?;
    let row = qb
        .build()
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| not_found(id, folder))?;
    row_to_message(&row, folder)
}

async fn insert_in(conn: &mut SqliteConnection, message: &Message) -> Result<()> {
    query::upsert(message).build().execute(&mut *conn).await?;
    Ok(())
}

async fn delete_in(conn: &mut SqliteConnection, id: &MessageId, folder: Folder) -> Result<()> {
    let done = query::delete(folder, id).build().execute(&mut *conn).await?;
    if done.rows_affected() == 0 {
        return Err(not_found(id, folder));
    }
    Ok(())
}

async fn move_chunk(
    manager: &TransactionManager,
    ids: &[MessageId],
    from: Folder,
    to: Folder,
) -> Result<Vec<(MessageId, String)>> {
    let mut tx = manager.begin().await?;
    let mut failures = Vec::new();
    for id in ids {
        let mut savepoint = tx.savepoint(None).await?;
        let outcome = move_in(savepoint.conn(), id, from, to).await;
        if let Err(e) = savepoint.finish(outcome).await {
            failures.push((id.clone(), e.to_string()));
        }
    }
    tx.commit().await?;
    Ok(failures)
}
