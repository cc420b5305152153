//! Nomination and review rows.
//!
//! Each row carries the record JSON and its post-commit outbox, written in
//! the same statement so a crash can never separate them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use holocron_core::state_machine::{Effect, Nomination, Record, RecordKey, Review};
use holocron_core::{ArticleTitle, NominationType};

use super::super::{LifecycleRepository, RepositoryError, StoredRecord};
use super::{sql_error, SqliteRepository};

fn decode_row(record_json: &str, effects_json: &str) -> Result<StoredRecord, RepositoryError> {
    let record: Record = serde_json::from_str(record_json)
        .map_err(|_| RepositoryError::corruption("lifecycle record JSON"))?;
    let pending_effects: Vec<Effect> = serde_json::from_str(effects_json)
        .map_err(|_| RepositoryError::corruption("pending effects JSON"))?;
    Ok(StoredRecord {
        record,
        pending_effects,
    })
}

fn get_sync(conn: &Connection, key: &RecordKey) -> Result<Option<StoredRecord>, RepositoryError> {
    let row: Option<(String, String)> = match key {
        RecordKey::Nomination(id) => conn
            .query_row(
                "SELECT record_json, pending_effects_json FROM nominations
                 WHERE article = ?1 AND kind = ?2 AND sequence = ?3",
                params![id.article.as_str(), id.kind.abbreviation(), id.sequence],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(sql_error("get nomination"))?,
        RecordKey::Review(id) => conn
            .query_row(
                "SELECT record_json, pending_effects_json FROM reviews
                 WHERE article = ?1 AND kind = ?2 AND sequence = ?3",
                params![id.article.as_str(), id.kind.abbreviation(), id.sequence],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(sql_error("get review"))?,
    };
    row.map(|(record, effects)| decode_row(&record, &effects))
        .transpose()
}

fn put_sync(conn: &Connection, stored: &StoredRecord) -> Result<(), RepositoryError> {
    let record_json = serde_json::to_string(&stored.record)
        .map_err(|e| RepositoryError::storage("serialize record", e.to_string()))?;
    let effects_json = serde_json::to_string(&stored.pending_effects)
        .map_err(|e| RepositoryError::storage("serialize effects", e.to_string()))?;
    let has_pending = !stored.pending_effects.is_empty();

    match &stored.record {
        Record::Nomination(n) => {
            conn.execute(
                "INSERT INTO nominations (article, kind, sequence, status, is_open, record_json,
                                          pending_effects_json, has_pending_effects)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(article, kind, sequence) DO UPDATE SET
                     status = excluded.status,
                     is_open = excluded.is_open,
                     record_json = excluded.record_json,
                     pending_effects_json = excluded.pending_effects_json,
                     has_pending_effects = excluded.has_pending_effects",
                params![
                    n.id.article.as_str(),
                    n.id.kind.abbreviation(),
                    n.id.sequence,
                    n.status.name(),
                    n.is_active(),
                    record_json,
                    effects_json,
                    has_pending
                ],
            )
            .map_err(sql_error("put nomination"))?;
        }
        Record::Review(r) => {
            conn.execute(
                "INSERT INTO reviews (article, kind, sequence, status, is_open, record_json,
                                      pending_effects_json, has_pending_effects)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(article, kind, sequence) DO UPDATE SET
                     status = excluded.status,
                     is_open = excluded.is_open,
                     record_json = excluded.record_json,
                     pending_effects_json = excluded.pending_effects_json,
                     has_pending_effects = excluded.has_pending_effects",
                params![
                    r.id.article.as_str(),
                    r.id.kind.abbreviation(),
                    r.id.sequence,
                    r.status.name(),
                    r.is_open(),
                    record_json,
                    effects_json,
                    has_pending
                ],
            )
            .map_err(sql_error("put review"))?;
        }
    }
    Ok(())
}

/// Load every row a query returns, skipping rows that no longer decode so
/// one bad row cannot block the rest.
fn load_rows(
    conn: &Connection,
    operation: &'static str,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<StoredRecord>, RepositoryError> {
    let mut stmt = conn.prepare(sql).map_err(sql_error(operation))?;
    let rows = stmt
        .query_map(args, |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(sql_error(operation))?;

    let mut results = Vec::new();
    for row in rows {
        let (record, effects) = row.map_err(sql_error(operation))?;
        match decode_row(&record, &effects) {
            Ok(stored) => results.push(stored),
            Err(e) => warn!("Skipping undecodable row during {}: {}", operation, e),
        }
    }
    Ok(results)
}

#[async_trait]
impl LifecycleRepository for SqliteRepository {
    async fn get(&self, key: &RecordKey) -> Result<Option<StoredRecord>, RepositoryError> {
        let key = key.clone();
        self.with_conn("get", move |conn| get_sync(conn, &key)).await
    }

    async fn put(&self, stored: &StoredRecord) -> Result<(), RepositoryError> {
        let stored = stored.clone();
        self.with_conn("put", move |conn| put_sync(conn, &stored))
            .await
    }

    async fn clear_pending_effects(&self, key: &RecordKey) -> Result<(), RepositoryError> {
        let key = key.clone();
        self.with_conn("clear_pending_effects", move |conn| {
            let updated = match &key {
                RecordKey::Nomination(id) => conn.execute(
                    "UPDATE nominations SET pending_effects_json = '[]', has_pending_effects = 0
                     WHERE article = ?1 AND kind = ?2 AND sequence = ?3",
                    params![id.article.as_str(), id.kind.abbreviation(), id.sequence],
                ),
                RecordKey::Review(id) => conn.execute(
                    "UPDATE reviews SET pending_effects_json = '[]', has_pending_effects = 0
                     WHERE article = ?1 AND kind = ?2 AND sequence = ?3",
                    params![id.article.as_str(), id.kind.abbreviation(), id.sequence],
                ),
            };
            updated.map_err(sql_error("clear_pending_effects"))?;
            Ok(())
        })
        .await
    }

    async fn nominations_for(
        &self,
        article: &ArticleTitle,
        kind: NominationType,
    ) -> Result<Vec<Nomination>, RepositoryError> {
        let article = article.as_str().to_string();
        self.with_conn("nominations_for", move |conn| {
            let rows = load_rows(
                conn,
                "nominations_for",
                "SELECT record_json, pending_effects_json FROM nominations
                 WHERE article = ?1 AND kind = ?2 ORDER BY sequence",
                params![article, kind.abbreviation()],
            )?;
            Ok(rows
                .into_iter()
                .filter_map(|s| s.record.as_nomination().cloned())
                .collect())
        })
        .await
    }

    async fn open_nominations(&self) -> Result<Vec<Nomination>, RepositoryError> {
        self.with_conn("open_nominations", |conn| {
            let rows = load_rows(
                conn,
                "open_nominations",
                "SELECT record_json, pending_effects_json FROM nominations
                 WHERE is_open = 1 ORDER BY article, kind, sequence",
                [],
            )?;
            Ok(rows
                .into_iter()
                .filter_map(|s| s.record.as_nomination().cloned())
                .collect())
        })
        .await
    }

    async fn reviews_for(
        &self,
        article: &ArticleTitle,
        kind: NominationType,
    ) -> Result<Vec<Review>, RepositoryError> {
        let article = article.as_str().to_string();
        self.with_conn("reviews_for", move |conn| {
            let rows = load_rows(
                conn,
                "reviews_for",
                "SELECT record_json, pending_effects_json FROM reviews
                 WHERE article = ?1 AND kind = ?2 ORDER BY sequence",
                params![article, kind.abbreviation()],
            )?;
            Ok(rows
                .into_iter()
                .filter_map(|s| s.record.as_review().cloned())
                .collect())
        })
        .await
    }

    async fn open_reviews(&self) -> Result<Vec<Review>, RepositoryError> {
        self.with_conn("open_reviews", |conn| {
            let rows = load_rows(
                conn,
                "open_reviews",
                "SELECT record_json, pending_effects_json FROM reviews
                 WHERE is_open = 1 ORDER BY article, kind, sequence",
                [],
            )?;
            Ok(rows
                .into_iter()
                .filter_map(|s| s.record.as_review().cloned())
                .collect())
        })
        .await
    }

    async fn with_pending_effects(&self) -> Result<Vec<StoredRecord>, RepositoryError> {
        self.with_conn("with_pending_effects", |conn| {
            let mut rows = load_rows(
                conn,
                "with_pending_effects",
                "SELECT record_json, pending_effects_json FROM nominations
                 WHERE has_pending_effects = 1",
                [],
            )?;
            rows.extend(load_rows(
                conn,
                "with_pending_effects",
                "SELECT record_json, pending_effects_json FROM reviews
                 WHERE has_pending_effects = 1",
                [],
            )?);
            Ok(rows)
        })
        .await
    }

    async fn status_counts(&self) -> Result<BTreeMap<String, u64>, RepositoryError> {
        self.with_conn("status_counts", |conn| {
            let mut counts = BTreeMap::new();
            for (table, label) in [("nominations", "nomination"), ("reviews", "review")] {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT status, COUNT(*) FROM {} GROUP BY status",
                        table
                    ))
                    .map_err(sql_error("status_counts"))?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                    .map_err(sql_error("status_counts"))?;
                for row in rows {
                    let (status, count) = row.map_err(sql_error("status_counts"))?;
                    counts.insert(format!("{} {}", label, status), count as u64);
                }
            }
            Ok(counts)
        })
        .await
    }
}
