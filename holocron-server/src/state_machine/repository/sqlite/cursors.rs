//! Cursor rows with compare-and-swap on the version column.

use std::collections::BTreeSet;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::super::{CursorRepository, RepositoryError};
use super::{from_millis, sql_error, to_millis, SqliteRepository};
use crate::cursor::Cursor;

fn load_sync(conn: &Connection, source: &str) -> Result<Option<Cursor>, RepositoryError> {
    let row: Option<(i64, String, Option<i64>)> = conn
        .query_row(
            "SELECT version, members_json, scanned_at FROM cursors WHERE source = ?1",
            params![source],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(sql_error("load_cursor"))?;

    let Some((version, members_json, scanned_at)) = row else {
        return Ok(None);
    };
    let members: BTreeSet<String> = serde_json::from_str(&members_json)
        .map_err(|_| RepositoryError::corruption(format!("cursor members for {}", source)))?;
    Ok(Some(Cursor {
        members,
        version: version as u64,
        scanned_at: scanned_at
            .map(|ms| from_millis(ms, "cursor scan time"))
            .transpose()?,
    }))
}

fn swap_sync(
    conn: &Connection,
    source: &str,
    expected_version: u64,
    next: &Cursor,
) -> Result<bool, RepositoryError> {
    let members_json = serde_json::to_string(&next.members)
        .map_err(|e| RepositoryError::storage("serialize cursor", e.to_string()))?;
    let scanned_at = next.scanned_at.map(to_millis);

    let changed = if expected_version == 0 {
        conn.execute(
            "INSERT OR IGNORE INTO cursors (source, version, members_json, scanned_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![source, next.version as i64, members_json, scanned_at],
        )
    } else {
        conn.execute(
            "UPDATE cursors SET version = ?2, members_json = ?3, scanned_at = ?4
             WHERE source = ?1 AND version = ?5",
            params![
                source,
                next.version as i64,
                members_json,
                scanned_at,
                expected_version as i64
            ],
        )
    }
    .map_err(sql_error("swap_cursor"))?;

    Ok(changed == 1)
}

#[async_trait]
impl CursorRepository for SqliteRepository {
    async fn load_cursor(&self, source: &str) -> Result<Option<Cursor>, RepositoryError> {
        let source = source.to_string();
        self.with_conn("load_cursor", move |conn| load_sync(conn, &source))
            .await
    }

    async fn swap_cursor(
        &self,
        source: &str,
        expected_version: u64,
        next: &Cursor,
    ) -> Result<bool, RepositoryError> {
        let source = source.to_string();
        let next = next.clone();
        self.with_conn("swap_cursor", move |conn| {
            swap_sync(conn, &source, expected_version, &next)
        })
        .await
    }
}
