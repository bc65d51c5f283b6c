//! SQLite ticket store shared by every node of a cluster.
//!
//! Lifecycle counters live in their own columns so that `consume` is one
//! conditional `UPDATE ... RETURNING`; the ticket body and policy are JSON.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use cas_core::{ExpirationPolicy, Ticket, TicketBody, TicketId, TicketKind, TicketState};

use super::{StoreError, TicketModifier, TicketPredicate, TicketStore};
use crate::db::DbService;

const COLUMNS: &str = "id, created_at, last_used_at, previous_last_used_at, count_of_uses, policy, body";

#[derive(Clone)]
pub struct SqliteTicketStore {
    pool: SqlitePool,
}

impl SqliteTicketStore {
    pub fn new(db: &DbService) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    async fn insert(tx: &mut Transaction<'_, Sqlite>, ticket: &Ticket) -> Result<(), StoreError> {
        let row = TicketRow::encode(ticket)?;
        let result = sqlx::query(
            r#"
            INSERT INTO tickets (
                id, kind, created_at, last_used_at, previous_last_used_at, count_of_uses,
                max_uses, time_to_live_secs, time_to_idle_secs, parent, principal, policy, body
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ticket.id().as_str())
        .bind(ticket.kind().prefix())
        .bind(row.created_at)
        .bind(row.last_used_at)
        .bind(row.previous_last_used_at)
        .bind(row.count_of_uses)
        .bind(row.max_uses)
        .bind(row.time_to_live_secs)
        .bind(row.time_to_idle_secs)
        .bind(ticket.parent().map(|p| p.as_str().to_string()))
        .bind(ticket.principal().map(|p| p.id.clone()))
        .bind(&row.policy)
        .bind(&row.body)
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(StoreError::Duplicate(ticket.id().clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn overwrite(
        tx: &mut Transaction<'_, Sqlite>,
        ticket: &Ticket,
    ) -> Result<bool, StoreError> {
        let row = TicketRow::encode(ticket)?;
        let result = sqlx::query(
            r#"
            UPDATE tickets SET
                last_used_at = ?, previous_last_used_at = ?, count_of_uses = ?,
                max_uses = ?, time_to_live_secs = ?, time_to_idle_secs = ?,
                policy = ?, body = ?
            WHERE id = ?
            "#,
        )
        .bind(row.last_used_at)
        .bind(row.previous_last_used_at)
        .bind(row.count_of_uses)
        .bind(row.max_uses)
        .bind(row.time_to_live_secs)
        .bind(row.time_to_idle_secs)
        .bind(&row.policy)
        .bind(&row.body)
        .bind(ticket.id().as_str())
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn exists(&self, id: &TicketId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM tickets WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl TicketStore for SqliteTicketStore {
    async fn put(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::insert(&mut tx, ticket).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn put_all(&self, tickets: &[Ticket]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for ticket in tickets {
            // Dropping the transaction on error rolls the batch back.
            Self::insert(&mut tx, ticket).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: &TicketId) -> Result<Ticket, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM tickets WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        decode(&row)
    }

    async fn modify(&self, id: &TicketId, f: TicketModifier<'_>) -> Result<Ticket, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock before it reads;
        // another node's concurrent modify then waits instead of being lost.
        let locked = sqlx::query("UPDATE tickets SET id = id WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        if locked.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.clone()));
        }

        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM tickets WHERE id = ?"))
            .bind(id.as_str())
            .fetch_one(&mut *tx)
            .await?;
        let mut ticket = decode(&row)?;
        f(&mut ticket);
        Self::overwrite(&mut tx, &ticket).await?;
        tx.commit().await?;
        Ok(ticket)
    }

    async fn delete(&self, id: &TicketId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tickets WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_many(&self, ids: &[TicketId]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for id in ids {
            let result = sqlx::query("DELETE FROM tickets WHERE id = ?")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn delete_all(&self, predicate: TicketPredicate<'_>) -> Result<usize, StoreError> {
        let doomed: Vec<TicketId> = self
            .list(None)
            .await?
            .into_iter()
            .filter(|t| predicate(t))
            .map(|t| t.state.id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        self.delete_many(&doomed).await
    }

    async fn consume(&self, id: &TicketId, now: DateTime<Utc>) -> Result<Ticket, StoreError> {
        let now_ms = now.timestamp_millis();
        let row = sqlx::query(&format!(
            r#"
            UPDATE tickets SET
                previous_last_used_at = last_used_at,
                last_used_at = ?1,
                count_of_uses = count_of_uses + 1
            WHERE id = ?2
              AND (max_uses IS NULL OR count_of_uses < max_uses)
              AND (time_to_live_secs IS NULL OR created_at + time_to_live_secs * 1000 > ?1)
              AND (time_to_idle_secs IS NULL OR last_used_at + time_to_idle_secs * 1000 > ?1)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(now_ms)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => decode(&row),
            None if self.exists(id).await? => Err(StoreError::AlreadyConsumed(id.clone())),
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    async fn list(&self, kind: Option<TicketKind>) -> Result<Vec<Ticket>, StoreError> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM tickets WHERE kind = ? ORDER BY created_at"
                ))
                .bind(kind.prefix())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("SELECT {COLUMNS} FROM tickets ORDER BY created_at"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(decode).collect()
    }
}

/// Column values for one ticket.
struct TicketRow {
    created_at: i64,
    last_used_at: i64,
    previous_last_used_at: Option<i64>,
    count_of_uses: i64,
    max_uses: Option<i64>,
    time_to_live_secs: Option<i64>,
    time_to_idle_secs: Option<i64>,
    policy: String,
    body: String,
}

impl TicketRow {
    fn encode(ticket: &Ticket) -> Result<Self, StoreError> {
        let state = &ticket.state;
        let policy = &state.expiration_policy;
        Ok(Self {
            created_at: state.created_at.timestamp_millis(),
            last_used_at: state.last_used_at.timestamp_millis(),
            previous_last_used_at: state.previous_last_used_at.map(|t| t.timestamp_millis()),
            count_of_uses: i64::from(state.count_of_uses),
            max_uses: policy.max_uses.map(i64::from),
            time_to_live_secs: policy.time_to_live_secs.map(clamp_secs),
            time_to_idle_secs: policy.time_to_idle_secs.map(clamp_secs),
            policy: serde_json::to_string(policy)?,
            body: serde_json::to_string(&ticket.body)?,
        })
    }
}

/// Seconds that still fit after the `* 1000` in SQL.
fn clamp_secs(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 2000)
}

fn decode(row: &SqliteRow) -> Result<Ticket, StoreError> {
    let id: String = row.try_get("id")?;
    let policy: String = row.try_get("policy")?;
    let body: String = row.try_get("body")?;
    let count_of_uses: i64 = row.try_get("count_of_uses")?;

    let state = TicketState {
        id: TicketId::new(id),
        created_at: millis(row.try_get("created_at")?)?,
        last_used_at: millis(row.try_get("last_used_at")?)?,
        previous_last_used_at: row
            .try_get::<Option<i64>, _>("previous_last_used_at")?
            .map(millis)
            .transpose()?,
        count_of_uses: u32::try_from(count_of_uses)
            .map_err(|_| StoreError::Corrupt(format!("count_of_uses {count_of_uses}")))?,
        expiration_policy: serde_json::from_str::<ExpirationPolicy>(&policy)?,
    };
    Ok(Ticket {
        state,
        body: serde_json::from_str::<TicketBody>(&body)?,
    })
}

fn millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {ms} out of range")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::store::testing;

    async fn memory_store() -> SqliteTicketStore {
        SqliteTicketStore::new(&DbService::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn store_contract() {
        testing::exercise(&memory_store().await).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consume_has_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let db = DbService::open(dir.path().join("tickets.db")).await.unwrap();
        testing::exercise_concurrent_consume(Arc::new(SqliteTicketStore::new(&db))).await;
    }

    #[tokio::test]
    async fn put_all_rolls_back_on_duplicate() {
        let store = memory_store().await;
        let now = Utc::now();
        store.put(&testing::tgt("TGT-1-a-node", now)).await.unwrap();
        let result = store
            .put_all(&[
                testing::st("ST-2-a-node", "TGT-1-a-node", now),
                testing::tgt("TGT-1-a-node", now),
            ])
            .await;
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_ticket_is_not_consumed() {
        let store = memory_store().await;
        let now = Utc::now();
        store
            .put(&testing::st("ST-3-a-node", "TGT-1-a-node", now))
            .await
            .unwrap();
        let result = store
            .consume(&TicketId::new("ST-3-a-node"), now + Duration::seconds(10))
            .await;
        assert!(matches!(result, Err(StoreError::AlreadyConsumed(_))));
        let ticket = store.get(&TicketId::new("ST-3-a-node")).await.unwrap();
        assert_eq!(ticket.state.count_of_uses, 0);
    }

    #[tokio::test]
    async fn two_pools_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let a = SqliteTicketStore::new(&DbService::open(&path).await.unwrap());
        let b = SqliteTicketStore::new(&DbService::open(&path).await.unwrap());
        let now = Utc::now();

        a.put(&testing::st("ST-4-a-node", "TGT-1-a-node", now))
            .await
            .unwrap();
        let id = TicketId::new("ST-4-a-node");
        assert!(b.consume(&id, now).await.is_ok());
        assert!(matches!(
            a.consume(&id, now).await,
            Err(StoreError::AlreadyConsumed(_))
        ));
    }
}
