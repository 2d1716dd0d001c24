//! SQLite 任务记录存储（sqlx）
//!
//! 需要启用 `async-sqlite` feature。payload / result 以 JSON 文本存储，时间为 RFC3339。

#![cfg(feature = "async-sqlite")]

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::core::AgentError;
use crate::models::{TaskRecord, TaskStatus};
use crate::store::{TaskRecordStore, TaskUpdater};

fn db_err(e: sqlx::Error) -> AgentError {
    AgentError::Store(e.to_string())
}

pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(db_err)?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, AgentError> {
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), AgentError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                result TEXT,
                error TEXT,
                submitted_at TEXT NOT NULL,
                completed_at TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, AgentError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AgentError::Store(format!("bad timestamp {:?}: {}", s, e)))
}

fn row_to_record(row: &SqliteRow) -> Result<TaskRecord, AgentError> {
    let status: String = row.get("status");
    let payload: String = row.get("payload");
    let result: Option<String> = row.get("result");
    let submitted_at: String = row.get("submitted_at");
    let completed_at: Option<String> = row.get("completed_at");

    Ok(TaskRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        status: TaskStatus::parse(&status)
            .ok_or_else(|| AgentError::Store(format!("unknown status: {}", status)))?,
        payload: serde_json::from_str(&payload)?,
        result: result.as_deref().map(serde_json::from_str::<Value>).transpose()?,
        error: row.get("error"),
        submitted_at: parse_time(&submitted_at)?,
        completed_at: completed_at.as_deref().map(parse_time).transpose()?,
    })
}

#[async_trait]
impl TaskRecordStore for SqliteTaskStore {
    async fn create(&self, record: &TaskRecord) -> Result<(), AgentError> {
        let result = record.result.as_ref().map(Value::to_string);
        sqlx::query(
            "INSERT INTO tasks (id, user_id, status, payload, result, error, submitted_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(record.status.as_str())
        .bind(record.payload.to_string())
        .bind(result)
        .bind(&record.error)
        .bind(record.submitted_at.to_rfc3339())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<TaskRecord>, AgentError> {
        let row = sqlx::query(
            "SELECT id, user_id, status, payload, result, error, submitted_at, completed_at
             FROM tasks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_record).transpose()
    }
}

#[async_trait]
impl TaskUpdater for SqliteTaskStore {
    async fn update_result(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), AgentError> {
        let now = Utc::now().to_rfc3339();
        let done = if status == TaskStatus::Success {
            sqlx::query("UPDATE tasks SET status = ?, result = ?, completed_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(result.map(|v| v.to_string()))
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await
        } else {
            sqlx::query("UPDATE tasks SET status = ?, error = ?, completed_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(error)
                .bind(&now)
                .bind(id)
                .execute(&self.pool)
                .await
        }
        .map_err(db_err)?;

        if done.rows_affected() == 0 {
            return Err(AgentError::TaskNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_roundtrip_and_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTaskStore::new(dir.path().join("tasks.db")).await.unwrap();

        let record = TaskRecord::pending("u1", json!({"content": "2+2"}));
        store.create(&record).await.unwrap();
        let loaded = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.payload, json!({"content": "2+2"}));

        store
            .update_result(&record.id, TaskStatus::Success, Some(json!([{"role": "model"}])), None)
            .await
            .unwrap();
        let done = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Success);
        assert_eq!(done.result, Some(json!([{"role": "model"}])));
        assert!(done.completed_at.is_some());

        assert!(store.get("missing").await.unwrap().is_none());
        assert!(matches!(
            store.update_result("missing", TaskStatus::Failed, None, Some("x".into())).await,
            Err(AgentError::TaskNotFound(_))
        ));
    }
}
