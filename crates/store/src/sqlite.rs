use async_trait::async_trait;
use bulkflow_types::{LogEntry, Stage, StageSnapshot};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::store::{LogStore, SnapshotStore, StoreError};

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

const MIGRATIONS: [&str; 2] = [
    include_str!("../migrations/001_create_log_entries.sql"),
    include_str!("../migrations/002_create_stage_snapshots.sql"),
];

/// Log entries and snapshots stored as JSON payloads next to the columns
/// they are queried by
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at a sqlx url such as
    /// `sqlite://bulkflow.db`
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory SQLite database
    ///
    /// Every pooled connection would get its own empty database, so the pool
    /// is pinned to a single connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for migration in MIGRATIONS {
            for statement in migration.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                sqlx::query(statement)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            }
        }

        Ok(())
    }

    fn row_payload<T: serde::de::DeserializeOwned>(row: &SqliteRow) -> Result<T, StoreError> {
        let payload: String = row
            .try_get("payload")
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Ok(serde_json::from_str(&payload)?)
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn append(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let payload = serde_json::to_string(entry)?;

        let result = sqlx::query(
            r#"
            INSERT INTO log_entries (
                id, operation_id, timestamp, level, category, message, payload
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.operation_id())
        .bind(entry.timestamp.to_rfc3339())
        .bind(entry.level.as_str())
        .bind(entry.category.as_str())
        .bind(&entry.message)
        .bind(&payload)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateId(entry.id.to_string()))
            }
            Err(e) => Err(StoreError::DatabaseError(e.to_string())),
        }
    }

    async fn list_for_operation(&self, operation_id: &str) -> Result<Vec<LogEntry>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM log_entries WHERE operation_id = ? ORDER BY seq ASC")
            .bind(operation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_payload).collect()
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn save(&self, snapshot: &StageSnapshot) -> Result<(), StoreError> {
        let payload = serde_json::to_string(snapshot)?;

        sqlx::query(
            r#"
            INSERT INTO stage_snapshots (operation_id, stage, taken_at, payload)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (operation_id, stage)
            DO UPDATE SET taken_at = excluded.taken_at, payload = excluded.payload
            "#,
        )
        .bind(&snapshot.operation_id)
        .bind(snapshot.stage.as_str())
        .bind(snapshot.taken_at.to_rfc3339())
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn load(
        &self,
        operation_id: &str,
        stage: Stage,
    ) -> Result<Option<StageSnapshot>, StoreError> {
        let row = sqlx::query(
            "SELECT payload FROM stage_snapshots WHERE operation_id = ? AND stage = ?",
        )
        .bind(operation_id)
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        row.as_ref().map(Self::row_payload).transpose()
    }

    async fn list_stages(&self, operation_id: &str) -> Result<Vec<Stage>, StoreError> {
        let rows = sqlx::query("SELECT stage FROM stage_snapshots WHERE operation_id = ?")
            .bind(operation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        let mut stages = rows
            .iter()
            .map(|row| {
                let name: String = row
                    .try_get("stage")
                    .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
                Stage::from_str(&name).map_err(|e| StoreError::SerializationError(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        stages.sort();

        Ok(stages)
    }

    async fn delete_stage(&self, operation_id: &str, stage: Stage) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM stage_snapshots WHERE operation_id = ? AND stage = ?")
                .bind(operation_id)
                .bind(stage.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_operation(&self, operation_id: &str) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM stage_snapshots WHERE operation_id = ?")
            .bind(operation_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() as usize)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
