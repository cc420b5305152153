//! Notification queue rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::super::{NotificationRepository, RepositoryError};
use super::{from_millis, sql_error, to_millis, SqliteRepository};
use crate::notifications::{
    NewNotification, NotificationPayload, NotificationStatus, QueuedNotification,
};

const COLUMNS: &str = "id, payload_json, dispatch_at, created_at, dedupe_key, attempts, status, \
                       stale, last_error";

struct RawEntry {
    id: i64,
    payload_json: String,
    dispatch_at: i64,
    created_at: i64,
    dedupe_key: Option<String>,
    attempts: i64,
    status: String,
    stale: bool,
    last_error: Option<String>,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            payload_json: row.get(1)?,
            dispatch_at: row.get(2)?,
            created_at: row.get(3)?,
            dedupe_key: row.get(4)?,
            attempts: row.get(5)?,
            status: row.get(6)?,
            stale: row.get(7)?,
            last_error: row.get(8)?,
        })
    }

    fn decode(self) -> Result<QueuedNotification, RepositoryError> {
        let payload: NotificationPayload = serde_json::from_str(&self.payload_json)
            .map_err(|_| RepositoryError::corruption(format!("payload of queue entry {}", self.id)))?;
        let status = NotificationStatus::parse(&self.status)
            .ok_or_else(|| RepositoryError::corruption(format!("status of queue entry {}", self.id)))?;
        Ok(QueuedNotification {
            id: self.id as u64,
            payload,
            dispatch_at: from_millis(self.dispatch_at, "queue dispatch time")?,
            created_at: from_millis(self.created_at, "queue creation time")?,
            dedupe_key: self.dedupe_key,
            attempts: self.attempts as u32,
            status,
            stale: self.stale,
            last_error: self.last_error,
        })
    }
}

/// Claim the dedupe key (if any) and insert the row in one transaction.
///
/// Claimed keys stay in `notification_dedupe` after the row is pruned, so a
/// replayed announcement is refused however long ago it was delivered.
fn enqueue_sync(conn: &mut Connection, entry: &NewNotification) -> Result<Option<u64>, RepositoryError> {
    let payload_json = serde_json::to_string(&entry.payload)
        .map_err(|e| RepositoryError::storage("serialize payload", e.to_string()))?;
    let tx = conn.transaction().map_err(sql_error("enqueue"))?;

    if let Some(key) = &entry.dedupe_key {
        let claimed = tx
            .execute(
                "INSERT OR IGNORE INTO notification_dedupe (dedupe_key, created_at)
                 VALUES (?1, ?2)",
                params![key, to_millis(entry.created_at)],
            )
            .map_err(sql_error("enqueue"))?;
        if claimed == 0 {
            return Ok(None);
        }
    }

    tx.execute(
        "INSERT INTO notification_queue
             (payload_json, dispatch_at, created_at, dedupe_key, status)
         VALUES (?1, ?2, ?3, ?4, 'pending')",
        params![
            payload_json,
            to_millis(entry.dispatch_at),
            to_millis(entry.created_at),
            entry.dedupe_key
        ],
    )
    .map_err(sql_error("enqueue"))?;
    let id = tx.last_insert_rowid() as u64;
    tx.commit().map_err(sql_error("enqueue"))?;
    Ok(Some(id))
}

fn due_sync(
    conn: &Connection,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<QueuedNotification>, RepositoryError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM notification_queue
             WHERE status = 'pending' AND dispatch_at <= ?1
             ORDER BY dispatch_at, id LIMIT ?2",
            COLUMNS
        ))
        .map_err(sql_error("due"))?;
    let rows = stmt
        .query_map(params![to_millis(now), limit as i64], RawEntry::from_row)
        .map_err(sql_error("due"))?;
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row.map_err(sql_error("due"))?.decode()?);
    }
    Ok(entries)
}

#[async_trait]
impl NotificationRepository for SqliteRepository {
    async fn enqueue(&self, entry: NewNotification) -> Result<Option<u64>, RepositoryError> {
        self.with_conn("enqueue", move |conn| enqueue_sync(conn, &entry))
            .await
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueuedNotification>, RepositoryError> {
        self.with_conn("due", move |conn| due_sync(conn, now, limit))
            .await
    }

    async fn next_dispatch_at(&self) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        self.with_conn("next_dispatch_at", |conn| {
            let next: Option<i64> = conn
                .query_row(
                    "SELECT MIN(dispatch_at) FROM notification_queue WHERE status = 'pending'",
                    [],
                    |row| row.get(0),
                )
                .map_err(sql_error("next_dispatch_at"))?;
            next.map(|ms| from_millis(ms, "queue dispatch time"))
                .transpose()
        })
        .await
    }

    async fn mark_delivered(&self, id: u64, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.with_conn("mark_delivered", move |conn| {
            conn.execute(
                "UPDATE notification_queue
                 SET status = 'delivered', attempts = attempts + 1, delivered_at = ?2
                 WHERE id = ?1",
                params![id as i64, to_millis(at)],
            )
            .map_err(sql_error("mark_delivered"))?;
            Ok(())
        })
        .await
    }

    async fn reschedule(
        &self,
        id: u64,
        attempts: u32,
        dispatch_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), RepositoryError> {
        let error = error.to_string();
        self.with_conn("reschedule", move |conn| {
            conn.execute(
                "UPDATE notification_queue
                 SET attempts = ?2, dispatch_at = ?3, last_error = ?4
                 WHERE id = ?1",
                params![id as i64, attempts, to_millis(dispatch_at), error],
            )
            .map_err(sql_error("reschedule"))?;
            Ok(())
        })
        .await
    }

    async fn mark_failed(&self, id: u64, attempts: u32, error: &str) -> Result<(), RepositoryError> {
        let error = error.to_string();
        self.with_conn("mark_failed", move |conn| {
            conn.execute(
                "UPDATE notification_queue
                 SET status = 'failed', attempts = ?2, last_error = ?3
                 WHERE id = ?1",
                params![id as i64, attempts, error],
            )
            .map_err(sql_error("mark_failed"))?;
            Ok(())
        })
        .await
    }

    async fn mark_stale_before(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        self.with_conn("mark_stale_before", move |conn| {
            conn.execute(
                "UPDATE notification_queue SET stale = 1
                 WHERE status = 'pending' AND dispatch_at < ?1",
                params![to_millis(cutoff)],
            )
            .map_err(sql_error("mark_stale_before"))
        })
        .await
    }

    /// Dedupe keys of pruned rows stay claimed.
    async fn prune_delivered(&self, before: DateTime<Utc>) -> Result<usize, RepositoryError> {
        self.with_conn("prune_delivered", move |conn| {
            conn.execute(
                "DELETE FROM notification_queue WHERE status = 'delivered' AND dispatch_at < ?1",
                params![to_millis(before)],
            )
            .map_err(sql_error("prune_delivered"))
        })
        .await
    }

    async fn pending_count(&self) -> Result<usize, RepositoryError> {
        self.with_conn("pending_count", |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM notification_queue WHERE status = 'pending'",
                    [],
                    |row| row.get(0),
                )
                .map_err(sql_error("pending_count"))?;
            Ok(count as usize)
        })
        .await
    }
}
