//! Objection ping ledger.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use holocron_core::objection::ObjectionLevel;

use super::super::{ObjectionLedger, RepositoryError};
use super::{sql_error, to_millis, SqliteRepository};

#[async_trait]
impl ObjectionLedger for SqliteRepository {
    async fn pinged_levels(
        &self,
        page: &str,
    ) -> Result<HashMap<String, ObjectionLevel>, RepositoryError> {
        let page = page.to_string();
        self.with_conn("pinged_levels", move |conn| {
            let mut stmt = conn
                .prepare("SELECT fingerprint, level FROM objection_pings WHERE page = ?1")
                .map_err(sql_error("pinged_levels"))?;
            let rows = stmt
                .query_map(params![page], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(sql_error("pinged_levels"))?;

            let mut levels = HashMap::new();
            for row in rows {
                let (fingerprint, level) = row.map_err(sql_error("pinged_levels"))?;
                let level = ObjectionLevel::parse(&level)
                    .ok_or_else(|| RepositoryError::corruption("objection ping level"))?;
                levels.insert(fingerprint, level);
            }
            Ok(levels)
        })
        .await
    }

    async fn record_ping(
        &self,
        page: &str,
        fingerprint: &str,
        level: ObjectionLevel,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let page = page.to_string();
        let fingerprint = fingerprint.to_string();
        self.with_conn("record_ping", move |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT level FROM objection_pings WHERE page = ?1 AND fingerprint = ?2",
                    params![page, fingerprint],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_error("record_ping"))?;

            // Levels only ever go up
            if let Some(previous) = existing.as_deref().and_then(ObjectionLevel::parse) {
                if previous >= level {
                    return Ok(());
                }
            }

            conn.execute(
                "INSERT INTO objection_pings (page, fingerprint, level, pinged_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(page, fingerprint) DO UPDATE SET
                     level = excluded.level,
                     pinged_at = excluded.pinged_at",
                params![page, fingerprint, level.as_str(), to_millis(at)],
            )
            .map_err(sql_error("record_ping"))?;
            Ok(())
        })
        .await
    }

    async fn forget_pings(&self, page: &str, fingerprints: &[String]) -> Result<(), RepositoryError> {
        let page = page.to_string();
        let fingerprints = fingerprints.to_vec();
        self.with_conn("forget_pings", move |conn| {
            let tx = conn.transaction().map_err(sql_error("forget_pings"))?;
            for fingerprint in &fingerprints {
                tx.execute(
                    "DELETE FROM objection_pings WHERE page = ?1 AND fingerprint = ?2",
                    params![page, fingerprint],
                )
                .map_err(sql_error("forget_pings"))?;
            }
            tx.commit().map_err(sql_error("forget_pings"))
        })
        .await
    }
}
