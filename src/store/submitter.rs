//! 接入侧任务提交：记录 → 发布

use std::sync::Arc;

use serde_json::Value;

use crate::core::AgentError;
use crate::models::{TaskRecord, TaskStatus};
use crate::queue::MessagePublisher;
use crate::store::{TaskRecordStore, TaskUpdater};

pub const PUBLISH_FAILED_MESSAGE: &str = "Failed to publish task";

pub struct TaskSubmitter {
    store: Arc<dyn TaskRecordStore>,
    updater: Arc<dyn TaskUpdater>,
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
}

impl TaskSubmitter {
    pub fn new(
        store: Arc<dyn TaskRecordStore>,
        updater: Arc<dyn TaskUpdater>,
        publisher: Arc<dyn MessagePublisher>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            store,
            updater,
            publisher,
            topic: topic.into(),
        }
    }

    /// 发布失败时记录被标记为 failed，并返回发布错误
    pub async fn submit(&self, user_id: &str, payload: Value) -> Result<TaskRecord, AgentError> {
        let record = TaskRecord::pending(user_id, payload);
        self.store.create(&record).await.inspect_err(|e| {
            tracing::error!(task_id = %record.id, "failed to create task record: {}", e)
        })?;

        let bytes = serde_json::to_vec(&record)?;
        if let Err(e) = self.publisher.publish(&self.topic, &record.id, bytes).await {
            tracing::error!(task_id = %record.id, "failed to publish task: {}", e);
            if let Err(update_err) = self
                .updater
                .update_result(&record.id, TaskStatus::Failed, None, Some(PUBLISH_FAILED_MESSAGE.into()))
                .await
            {
                tracing::warn!(task_id = %record.id, "failed to mark task as failed: {}", update_err);
            }
            return Err(e);
        }

        tracing::info!(task_id = %record.id, user_id, "task submitted");
        Ok(record)
    }
}
