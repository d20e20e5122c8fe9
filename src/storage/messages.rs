//! Message repository: batched upserts, filtered counts, streamed reads and
//! bulk removal over the message entity graph.
//!
//! A message and its child rows (edit timestamp, reply link, attachments,
//! embeds, reactions) are always replaced together. Reads compose children
//! one message at a time through prepared lookups that stay open for the
//! whole stream.

use futures::Stream;
use rusqlite::{params, params_from_iter, Connection, InterruptHandle, Row, Statement};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::filter::{where_clause, MessageFilter, WhereClause};
use super::pool::ConnectionPool;
use crate::aggregate::AggregateRecomputer;
use crate::error::{map_interrupt, FilterError, StoreError};
use crate::model::{Attachment, EmojiFlags, Embed, Message, Reaction};
use crate::observability::metrics::{record_messages_added, record_messages_removed};

/// Child tables keyed by `message_id`, replaced wholesale on every upsert.
const CHILD_TABLES: [&str; 5] = ["edit_timestamps", "replied_to", "attachments", "embeds", "reactions"];

/// Which side of a filter [`MessageRepository::remove`] deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalMode {
    /// Delete the messages the filter matches.
    Matching,
    /// Delete every message the filter does not match.
    KeepMatching,
}

/// Message storage over a connection pool.
#[derive(Clone)]
pub struct MessageRepository {
    pool: ConnectionPool,
    total_messages: Arc<AggregateRecomputer<u64>>,
    total_attachments: Arc<AggregateRecomputer<u64>>,
    stream_buffer: usize,
}

impl MessageRepository {
    /// Create a repository and spawn its total-message and total-attachment
    /// aggregates. Must be called from within a tokio runtime.
    pub fn new(pool: ConnectionPool, stream_buffer: usize) -> Self {
        let total_messages = {
            let pool = pool.clone();
            AggregateRecomputer::spawn("total_messages", move || count_all_messages(&*pool.take()?))
        };
        let total_attachments = {
            let pool = pool.clone();
            AggregateRecomputer::spawn("total_attachments", move || {
                count_distinct_attachments(&*pool.take()?)
            })
        };

        Self::with_aggregates(pool, Arc::new(total_messages), Arc::new(total_attachments), stream_buffer)
    }

    /// Create a repository that signals existing aggregates after writes.
    pub fn with_aggregates(
        pool: ConnectionPool,
        total_messages: Arc<AggregateRecomputer<u64>>,
        total_attachments: Arc<AggregateRecomputer<u64>>,
        stream_buffer: usize,
    ) -> Self {
        Self {
            pool,
            total_messages,
            total_attachments,
            stream_buffer: stream_buffer.max(1),
        }
    }

    pub fn total_messages(&self) -> &Arc<AggregateRecomputer<u64>> {
        &self.total_messages
    }

    pub fn total_attachments(&self) -> &Arc<AggregateRecomputer<u64>> {
        &self.total_attachments
    }

    /// Upsert a batch of messages in one transaction.
    ///
    /// Each message's parent row is written or overwritten and every child
    /// collection is fully replaced. Either the whole batch commits or none of
    /// it does.
    #[tracing::instrument(skip_all, fields(count = messages.len()))]
    pub async fn add(&self, messages: Vec<Message>) -> Result<(), StoreError> {
        if messages.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let count = messages.len();
        let added_attachments = self
            .pool
            .run(move |conn| insert_messages(conn, &messages))
            .await?;

        record_messages_added(count, started.elapsed().as_secs_f64());
        debug!(count, added_attachments, "Messages added");

        self.total_messages.recompute();
        if added_attachments {
            self.total_attachments.recompute();
        }
        Ok(())
    }

    /// Count the messages matching `filter`.
    ///
    /// Cancelling `cancel` interrupts the running query.
    pub async fn count(
        &self,
        filter: Option<&MessageFilter>,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        let clause = where_clause(filter, None, false)?;
        self.run_interruptible(cancel, move |conn| count_matching(conn, &clause))
            .await
    }

    /// Stream fully composed messages matching `filter`.
    ///
    /// The stream holds one pooled connection until it ends, is dropped, or
    /// `cancel` fires; the last item is `Err(Cancelled)` when it was cut short
    /// by cancellation.
    pub fn get(
        &self,
        filter: Option<&MessageFilter>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Message, StoreError>> + Send + 'static {
        let clause = where_clause(filter, Some("m"), false);
        self.stream(clause, cancel, stream_messages)
    }

    /// Stream ids of messages matching `filter`, without their children.
    pub fn get_ids(
        &self,
        filter: Option<&MessageFilter>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<i64, StoreError>> + Send + 'static {
        let clause = where_clause(filter, None, false);
        self.stream(clause, cancel, stream_message_ids)
    }

    /// Delete messages selected by `filter` and `mode`; children cascade.
    ///
    /// Returns the number of messages deleted.
    #[tracing::instrument(skip(self, filter))]
    pub async fn remove(&self, filter: &MessageFilter, mode: RemovalMode) -> Result<usize, StoreError> {
        let clause = where_clause(Some(filter), None, mode == RemovalMode::KeepMatching)?;

        let started = Instant::now();
        let removed = self.pool.run(move |conn| delete_matching(conn, &clause)).await?;

        record_messages_removed(removed, started.elapsed().as_secs_f64());
        debug!(removed, "Messages removed");

        self.total_messages.recompute();
        // Cascade takes attachments with their messages.
        self.total_attachments.recompute();
        Ok(removed)
    }

    /// Run `f` on a pooled connection, interrupting it if `cancel` fires.
    async fn run_interruptible<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        // Cleared before the connection goes back to the pool, so an
        // interrupt can never reach another operation.
        let interrupt: Arc<Mutex<Option<InterruptHandle>>> = Arc::default();
        let slot = Arc::clone(&interrupt);
        let pool = self.pool.clone();
        let worker_cancel = cancel.clone();

        let mut task = tokio::task::spawn_blocking(move || {
            let conn = pool.take()?;
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(conn.get_interrupt_handle());
            // A cancel that fired before the handle was published never
            // reaches the statement.
            let result = if worker_cancel.is_cancelled() {
                Err(StoreError::Cancelled)
            } else {
                f(&*conn)
            };
            slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            result
        });

        tokio::select! {
            result = &mut task => result?,
            () = cancel.cancelled() => {
                let running = match interrupt.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
                    Some(handle) => {
                        handle.interrupt();
                        true
                    }
                    None => false,
                };
                // A worker still waiting for a connection sees the token once
                // it gets one and gives it straight back.
                if running {
                    let _ = task.await;
                }
                Err(StoreError::Cancelled)
            }
        }
    }

    /// Produce items on a blocking worker into a bounded channel.
    fn stream<T, F>(
        &self,
        clause: Result<WhereClause, FilterError>,
        cancel: CancellationToken,
        produce: F,
    ) -> ReceiverStream<Result<T, StoreError>>
    where
        F: FnOnce(&Connection, &WhereClause, &mut dyn FnMut(T) -> ControlFlow<()>) -> Result<(), StoreError>
            + Send
            + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.stream_buffer);

        let clause = match clause {
            Ok(clause) => clause,
            Err(e) => {
                let _ = tx.try_send(Err(e.into()));
                return ReceiverStream::new(rx);
            }
        };

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let result = pool.take().and_then(|conn| {
                let mut sink = |item: T| {
                    if cancel.is_cancelled() || tx.blocking_send(Ok(item)).is_err() {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                };
                produce(&*conn, &clause, &mut sink)
            });

            let result = match result {
                Ok(()) if cancel.is_cancelled() => Err(StoreError::Cancelled),
                other => other,
            };
            if let Err(e) = result {
                let _ = tx.blocking_send(Err(e));
            }
        });

        ReceiverStream::new(rx)
    }
}

/// Write a batch of messages inside one transaction.
///
/// Returns whether any attachment rows were written.
pub fn insert_messages(conn: &mut Connection, messages: &[Message]) -> Result<bool, StoreError> {
    let tx = conn.transaction()?;
    let mut added_attachments = false;

    {
        // A true upsert: REPLACE would delete the row first and cascade into
        // reply links that point at it.
        let mut upsert_message = tx.prepare(
            "INSERT INTO messages (message_id, sender_id, channel_id, text, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (message_id) DO UPDATE SET
                 sender_id = excluded.sender_id,
                 channel_id = excluded.channel_id,
                 text = excluded.text,
                 timestamp = excluded.timestamp",
        )?;

        let mut delete_children = CHILD_TABLES
            .iter()
            .map(|table| tx.prepare(&format!("DELETE FROM {table} WHERE message_id = ?1")))
            .collect::<Result<Vec<_>, _>>()?;

        let mut insert_edit_timestamp =
            tx.prepare("INSERT INTO edit_timestamps (message_id, edit_timestamp) VALUES (?1, ?2)")?;
        let mut insert_replied_to =
            tx.prepare("INSERT INTO replied_to (message_id, replied_to_id) VALUES (?1, ?2)")?;
        let mut insert_attachment = tx.prepare(
            "INSERT INTO attachments (message_id, attachment_id, name, type, normalized_url, download_url, size, width, height)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        let mut insert_embed = tx.prepare("INSERT INTO embeds (message_id, json) VALUES (?1, ?2)")?;
        let mut insert_reaction = tx.prepare(
            "INSERT INTO reactions (message_id, emoji_id, emoji_name, emoji_flags, count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;

        for message in messages {
            let id = message.id;

            upsert_message.execute(params![
                id,
                message.sender_id,
                message.channel_id,
                message.text,
                message.timestamp
            ])?;

            for delete in &mut delete_children {
                delete.execute([id])?;
            }

            if let Some(edit_timestamp) = message.edit_timestamp {
                insert_edit_timestamp.execute(params![id, edit_timestamp])?;
            }

            if let Some(replied_to_id) = message.replied_to_id {
                insert_replied_to.execute(params![id, replied_to_id])?;
            }

            for attachment in &message.attachments {
                insert_attachment.execute(params![
                    id,
                    attachment.id,
                    attachment.name,
                    attachment.content_type,
                    attachment.normalized_url,
                    attachment.download_url,
                    attachment.size,
                    attachment.width,
                    attachment.height
                ])?;
                added_attachments = true;
            }

            for embed in &message.embeds {
                insert_embed.execute(params![id, embed.json])?;
            }

            for reaction in &message.reactions {
                insert_reaction.execute(params![
                    id,
                    reaction.emoji_id,
                    reaction.emoji_name,
                    reaction.emoji_flags.bits(),
                    reaction.count
                ])?;
            }
        }
    }

    tx.commit()?;
    Ok(added_attachments)
}

/// Count messages matching a compiled predicate.
pub fn count_matching(conn: &Connection, clause: &WhereClause) -> Result<u64, StoreError> {
    let sql = format!("SELECT COUNT(*) FROM messages{}", clause.sql());
    let count: i64 = conn
        .query_row(&sql, params_from_iter(clause.params()), |row| row.get(0))
        .map_err(map_interrupt)?;
    Ok(u64::try_from(count).unwrap_or_default())
}

pub fn count_all_messages(conn: &Connection) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or_default())
}

/// Count attachments by distinct normalized URL, so re-uploads of one file
/// count once.
pub fn count_distinct_attachments(conn: &Connection) -> Result<u64, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT normalized_url) FROM attachments",
        [],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(count).unwrap_or_default())
}

/// Delete messages matching a compiled predicate; returns rows deleted.
pub fn delete_matching(conn: &Connection, clause: &WhereClause) -> Result<usize, StoreError> {
    let sql = format!("DELETE FROM messages{}", clause.sql());
    Ok(conn.execute(&sql, params_from_iter(clause.params()))?)
}

/// Prepared lookup of one child kind, rebound per message.
struct ChildQuery<'conn, T> {
    stmt: Statement<'conn>,
    read: fn(&Row<'_>) -> rusqlite::Result<T>,
}

impl<'conn, T> ChildQuery<'conn, T> {
    fn prepare(
        conn: &'conn Connection,
        sql: &str,
        read: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> rusqlite::Result<Self> {
        Ok(Self {
            stmt: conn.prepare(sql)?,
            read,
        })
    }

    fn fetch(&mut self, message_id: i64) -> rusqlite::Result<Vec<T>> {
        self.stmt.query_map([message_id], self.read)?.collect()
    }
}

fn read_attachment(row: &Row<'_>) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: row.get(0)?,
        name: row.get(1)?,
        content_type: row.get(2)?,
        normalized_url: row.get(3)?,
        download_url: row.get(4)?,
        size: row.get(5)?,
        width: row.get(6)?,
        height: row.get(7)?,
    })
}

fn read_embed(row: &Row<'_>) -> rusqlite::Result<Embed> {
    Ok(Embed { json: row.get(0)? })
}

fn read_reaction(row: &Row<'_>) -> rusqlite::Result<Reaction> {
    Ok(Reaction {
        emoji_id: row.get(0)?,
        emoji_name: row.get(1)?,
        emoji_flags: EmojiFlags::from_bits(row.get(2)?),
        count: row.get(3)?,
    })
}

/// Compose messages matching `clause` (compiled with alias `m`) and hand them
/// to `sink` one at a time until it breaks or rows run out.
pub fn stream_messages(
    conn: &Connection,
    clause: &WhereClause,
    sink: &mut dyn FnMut(Message) -> ControlFlow<()>,
) -> Result<(), StoreError> {
    let mut attachments = ChildQuery::prepare(
        conn,
        "SELECT attachment_id, name, type, normalized_url, download_url, size, width, height
         FROM attachments
         WHERE message_id = ?1",
        read_attachment,
    )?;
    let mut embeds = ChildQuery::prepare(conn, "SELECT json FROM embeds WHERE message_id = ?1", read_embed)?;
    let mut reactions = ChildQuery::prepare(
        conn,
        "SELECT emoji_id, emoji_name, emoji_flags, count FROM reactions WHERE message_id = ?1",
        read_reaction,
    )?;

    let sql = format!(
        "SELECT m.message_id, m.sender_id, m.channel_id, m.text, m.timestamp, et.edit_timestamp, rt.replied_to_id
         FROM messages m
         LEFT JOIN edit_timestamps et ON et.message_id = m.message_id
         LEFT JOIN replied_to rt ON rt.message_id = m.message_id{}",
        clause.sql()
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(clause.params()))?;

    while let Some(row) = rows.next().map_err(map_interrupt)? {
        let id: i64 = row.get(0)?;
        let message = Message {
            id,
            sender_id: row.get(1)?,
            channel_id: row.get(2)?,
            text: row.get(3)?,
            timestamp: row.get(4)?,
            edit_timestamp: row.get(5)?,
            replied_to_id: row.get(6)?,
            attachments: attachments.fetch(id)?,
            embeds: embeds.fetch(id)?,
            reactions: reactions.fetch(id)?,
        };

        if sink(message).is_break() {
            break;
        }
    }

    Ok(())
}

/// Hand ids of messages matching `clause` to `sink`.
pub fn stream_message_ids(
    conn: &Connection,
    clause: &WhereClause,
    sink: &mut dyn FnMut(i64) -> ControlFlow<()>,
) -> Result<(), StoreError> {
    let sql = format!("SELECT message_id FROM messages{}", clause.sql());
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(clause.params()))?;

    while let Some(row) = rows.next().map_err(map_interrupt)? {
        if sink(row.get(0)?).is_break() {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::{apply_pragmas, migrate, LogProgress};

    fn open() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();
        migrate(&mut conn, &mut LogProgress).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO servers (id, name, type) VALUES (1, 'Guild', 'server');
            INSERT INTO channels (id, server, name) VALUES (10, 1, 'general');
            INSERT INTO users (id, name) VALUES (100, 'alice');
            "#,
        )
        .unwrap();
        conn
    }

    fn message(id: i64) -> Message {
        Message::new(id, 100, 10, format!("message {id}"), 1_000 + id)
    }

    fn attachment(id: i64) -> Attachment {
        Attachment {
            id,
            name: format!("file{id}.png"),
            content_type: Some("image/png".into()),
            normalized_url: format!("https://cdn.example/{id}.png"),
            download_url: format!("https://cdn.example/{id}.png?ex=1"),
            size: 512,
            width: Some(64),
            height: Some(32),
        }
    }

    fn read_all(conn: &Connection, filter: Option<&MessageFilter>) -> Vec<Message> {
        let clause = where_clause(filter, Some("m"), false).unwrap();
        let mut out = Vec::new();
        stream_messages(conn, &clause, &mut |m| {
            out.push(m);
            ControlFlow::Continue(())
        })
        .unwrap();
        out
    }

    fn rows(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_insert_reports_attachments() {
        let mut conn = open();
        assert!(!insert_messages(&mut conn, &[message(1)]).unwrap());

        let mut with_file = message(2);
        with_file.attachments.push(attachment(7));
        assert!(insert_messages(&mut conn, &[with_file]).unwrap());
    }

    #[test]
    fn test_upsert_replaces_children() {
        let mut conn = open();

        let mut first = message(1);
        first.edit_timestamp = Some(5_000);
        first.attachments = vec![attachment(1), attachment(2)];
        first.embeds = vec![Embed { json: r#"{"title":"a"}"#.into() }];
        insert_messages(&mut conn, &[first]).unwrap();

        let mut second = message(1);
        second.text = "edited".into();
        second.attachments = vec![attachment(3)];
        insert_messages(&mut conn, &[second.clone()]).unwrap();

        assert_eq!(read_all(&conn, None), vec![second]);
        assert_eq!(rows(&conn, "edit_timestamps"), 0);
        assert_eq!(rows(&conn, "embeds"), 0);
        assert_eq!(rows(&conn, "attachments"), 1);
    }

    #[test]
    fn test_failed_batch_writes_nothing() {
        let mut conn = open();
        // Unknown channel violates the messages foreign key.
        let bad = Message::new(2, 100, 999, "orphan", 0);

        assert!(insert_messages(&mut conn, &[message(1), bad]).is_err());
        assert_eq!(rows(&conn, "messages"), 0);
    }

    #[test]
    fn test_reply_may_precede_target_in_batch() {
        let mut conn = open();
        let mut reply = message(2);
        reply.replied_to_id = Some(1);

        insert_messages(&mut conn, &[reply, message(1)]).unwrap();

        let stored = read_all(&conn, Some(&MessageFilter::new().with_message_ids([2])));
        assert_eq!(stored[0].replied_to_id, Some(1));
    }

    #[test]
    fn test_delete_cascades_to_children() {
        let mut conn = open();
        let mut m = message(1);
        m.attachments.push(attachment(1));
        m.reactions.push(Reaction {
            emoji_id: None,
            emoji_name: Some("👍".into()),
            emoji_flags: EmojiFlags::NONE,
            count: 2,
        });
        m.edit_timestamp = Some(9);
        insert_messages(&mut conn, &[m]).unwrap();

        let clause = where_clause(Some(&MessageFilter::new().with_message_ids([1])), None, false).unwrap();
        assert_eq!(delete_matching(&conn, &clause).unwrap(), 1);

        for table in ["messages", "attachments", "reactions", "edit_timestamps"] {
            assert_eq!(rows(&conn, table), 0, "{table}");
        }
    }

    #[test]
    fn test_sink_can_stop_stream_early() {
        let mut conn = open();
        insert_messages(&mut conn, &[message(1), message(2), message(3)]).unwrap();

        let clause = where_clause(None, Some("m"), false).unwrap();
        let mut seen = 0;
        stream_messages(&conn, &clause, &mut |_| {
            seen += 1;
            ControlFlow::Break(())
        })
        .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_distinct_attachment_count() {
        let mut conn = open();
        let mut a = message(1);
        a.attachments.push(attachment(1));
        let mut b = message(2);
        let mut same_file = attachment(2);
        same_file.normalized_url = attachment(1).normalized_url;
        b.attachments.push(same_file);
        insert_messages(&mut conn, &[a, b]).unwrap();

        assert_eq!(count_distinct_attachments(&conn).unwrap(), 1);
        assert_eq!(count_all_messages(&conn).unwrap(), 2);
    }
}
