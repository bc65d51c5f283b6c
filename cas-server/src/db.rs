//! SQLite access for the shared ticket store.
//!
//! Every node of a cluster opens the same database file. WAL mode lets
//! readers proceed while one node writes; `busy_timeout` makes a node wait
//! for another node's write instead of failing.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct DbService {
    pool: SqlitePool,
}

impl DbService {
    /// Open or create a database at the given path and ensure the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                sqlx::Error::Configuration(format!("Failed to create db directory: {}", e).into())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            // FULL: an acknowledged consume must survive a crash of this node.
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(1) // SQLite performs best with single writer
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// A private in-memory database.
    pub async fn open_in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Each connection would get its own memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        init_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Lifecycle columns are kept out of the JSON body so `consume` can be a
    // single conditional UPDATE. Times are Unix milliseconds.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tickets (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_used_at INTEGER NOT NULL,
            previous_last_used_at INTEGER,
            count_of_uses INTEGER NOT NULL DEFAULT 0,
            max_uses INTEGER,
            time_to_live_secs INTEGER,
            time_to_idle_secs INTEGER,
            parent TEXT,
            principal TEXT,
            policy TEXT NOT NULL,
            body TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tickets_kind ON tickets(kind)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tickets_parent ON tickets(parent)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::*;

    #[tokio::test]
    async fn in_memory_schema_created() {
        let db = DbService::open_in_memory().await.unwrap();
        let row = sqlx::query("SELECT COUNT(*) AS n FROM tickets")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 0);
    }

    #[tokio::test]
    async fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tickets.db");
        let _db = DbService::open(&path).await.unwrap();
        assert!(path.exists());

        // Opening again keeps the schema.
        let again = DbService::open(&path).await.unwrap();
        sqlx::query("SELECT id FROM tickets")
            .fetch_all(again.pool())
            .await
            .unwrap();
    }
}
