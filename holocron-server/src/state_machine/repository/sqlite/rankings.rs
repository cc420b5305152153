//! Ranking credits and the per-user counters they feed.
//!
//! A credit row per nomination guards the counters: the counter update and
//! the credit insert share one transaction, so a replayed effect finds the
//! credit already present and leaves the counts alone.

use async_trait::async_trait;
use rusqlite::{params, Connection};

use holocron_core::ranking::RankingEntry;
use holocron_core::{NominationId, NominationType, UserName};

use super::super::{RankingRepository, RepositoryError};
use super::{sql_error, SqliteRepository};

fn kind_column(kind: NominationType) -> &'static str {
    match kind {
        NominationType::Featured => "featured",
        NominationType::Good => "good",
        NominationType::Comprehensive => "comprehensive",
    }
}

fn credit_sync(
    conn: &mut Connection,
    nomination: &NominationId,
    user: &UserName,
    year: i32,
) -> Result<Option<u64>, RepositoryError> {
    let tx = conn.transaction().map_err(sql_error("credit"))?;

    let inserted = tx
        .execute(
            "INSERT OR IGNORE INTO ranking_credits (nomination, user, year) VALUES (?1, ?2, ?3)",
            params![nomination.to_string(), user.as_str(), year],
        )
        .map_err(sql_error("credit"))?;
    if inserted == 0 {
        return Ok(None);
    }

    let column = kind_column(nomination.kind);
    tx.execute(
        &format!(
            "INSERT INTO ranking_entries (user_key, year, user, {column})
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(user_key, year) DO UPDATE SET {column} = {column} + 1"
        ),
        params![user.normalized(), year, user.as_str()],
    )
    .map_err(sql_error("credit"))?;

    let pending: i64 = tx
        .query_row(
            "UPDATE ranking_meta SET pending = pending + 1 WHERE id = 1 RETURNING pending",
            [],
            |row| row.get(0),
        )
        .map_err(sql_error("credit"))?;

    tx.commit().map_err(sql_error("credit"))?;
    Ok(Some(pending as u64))
}

#[async_trait]
impl RankingRepository for SqliteRepository {
    async fn credit(
        &self,
        nomination: &NominationId,
        user: &UserName,
        year: i32,
    ) -> Result<Option<u64>, RepositoryError> {
        let nomination = nomination.clone();
        let user = user.clone();
        self.with_conn("credit", move |conn| credit_sync(conn, &nomination, &user, year))
            .await
    }

    async fn ranking_entries(&self) -> Result<Vec<RankingEntry>, RepositoryError> {
        self.with_conn("ranking_entries", |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT user, year, featured, good, comprehensive FROM ranking_entries
                     ORDER BY year, user_key",
                )
                .map_err(sql_error("ranking_entries"))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(RankingEntry {
                        user: UserName(row.get(0)?),
                        year: row.get(1)?,
                        featured: row.get(2)?,
                        good: row.get(3)?,
                        comprehensive: row.get(4)?,
                    })
                })
                .map_err(sql_error("ranking_entries"))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(sql_error("ranking_entries"))
        })
        .await
    }

    async fn pending_since_publish(&self) -> Result<u64, RepositoryError> {
        self.with_conn("pending_since_publish", |conn| {
            let pending: i64 = conn
                .query_row("SELECT pending FROM ranking_meta WHERE id = 1", [], |row| {
                    row.get(0)
                })
                .map_err(sql_error("pending_since_publish"))?;
            Ok(pending as u64)
        })
        .await
    }

    async fn acknowledge_publish(&self, covered: u64) -> Result<(), RepositoryError> {
        self.with_conn("acknowledge_publish", move |conn| {
            conn.execute(
                "UPDATE ranking_meta SET pending = MAX(pending - ?1, 0) WHERE id = 1",
                params![covered as i64],
            )
            .map_err(sql_error("acknowledge_publish"))?;
            Ok(())
        })
        .await
    }
}
