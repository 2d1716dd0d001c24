//! 任务记录持久化与接入侧提交
//!
//! - **TaskRecordStore**：创建 / 查询 TaskRecord
//! - **TaskUpdater**：终态时写入 status + result/error + completed_at
//! - **TaskSubmitter**：创建 pending 记录并发布到 tasks topic

pub mod sqlite;
pub mod submitter;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::AgentError;
use crate::models::{TaskRecord, TaskStatus};

#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteTaskStore;
pub use submitter::TaskSubmitter;

#[async_trait]
pub trait TaskRecordStore: Send + Sync {
    async fn create(&self, record: &TaskRecord) -> Result<(), AgentError>;

    async fn get(&self, id: &str) -> Result<Option<TaskRecord>, AgentError>;
}

#[async_trait]
pub trait TaskUpdater: Send + Sync {
    /// success 时写 result，其余状态写 error
    async fn update_result(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), AgentError>;
}

#[derive(Default)]
pub struct InMemoryTaskRecordStore {
    records: RwLock<HashMap<String, TaskRecord>>,
}

impl InMemoryTaskRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<TaskRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl TaskRecordStore for InMemoryTaskRecordStore {
    async fn create(&self, record: &TaskRecord) -> Result<(), AgentError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(AgentError::Store(format!("task already exists: {}", record.id)));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<TaskRecord>, AgentError> {
        Ok(self.records.read().await.get(id).cloned())
    }
}

#[async_trait]
impl TaskUpdater for InMemoryTaskRecordStore {
    async fn update_result(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<(), AgentError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| AgentError::TaskNotFound(id.to_string()))?;
        record.status = status;
        if status == TaskStatus::Success {
            record.result = result;
        } else {
            record.error = error;
        }
        record.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_update_sets_terminal_fields() {
        let store = InMemoryTaskRecordStore::new();
        let record = TaskRecord::pending("u1", json!({"content": "hi"}));
        store.create(&record).await.unwrap();
        assert!(store.create(&record).await.is_err());

        store
            .update_result(&record.id, TaskStatus::Failed, None, Some("boom".into()))
            .await
            .unwrap();
        let updated = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Failed);
        assert_eq!(updated.error.as_deref(), Some("boom"));
        assert!(updated.result.is_none());
        assert!(updated.completed_at.is_some());

        let missing = store.update_result("nope", TaskStatus::Success, None, None).await;
        assert!(matches!(missing, Err(AgentError::TaskNotFound(_))));
    }
}
