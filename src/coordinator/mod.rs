//! 协调器：入站任务消息 → 编排器 → 内容后处理 → 持久化 + 结果发布
//!
//! 每条消息调用一次 `process_task`。解码失败或内容为空时直接记为失败并发布，不进入编排器。
//! 持久化失败只记日志，不影响发布；NeedsLocalTool 返回给调用方，不发布结果。

pub mod content;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, TaskOutcome};
use crate::models::{TaskRecord, TaskResultMessage, TaskStatus};
use crate::orchestrator::TaskOrchestrator;
use crate::protocol::{contents_from_proto, AgentTask};
use crate::queue::{MessageHandler, QueueMessage, ResultPublisher};
use crate::store::TaskUpdater;

pub use content::{is_local_path, ContentProcessor};

pub const EMPTY_CONTENT_ERROR: &str = "Invalid or empty task payload content";
pub const CONTENT_PROCESSING_ERROR: &str = "Failed to process and store multimodal content";

#[derive(Debug)]
pub enum ProcessOutcome {
    /// 已持久化并发布的终态
    Completed(TaskStatus),
    /// 需要本地工具继续处理，未发布
    NeedsLocalTool(AgentTask),
}

pub struct Coordinator {
    orchestrator: Arc<dyn TaskOrchestrator>,
    results: ResultPublisher,
    updater: Arc<dyn TaskUpdater>,
    content: ContentProcessor,
    agent_name: String,
    task_timeout_secs: Option<u64>,
}

impl Coordinator {
    pub fn new(
        orchestrator: Arc<dyn TaskOrchestrator>,
        results: ResultPublisher,
        updater: Arc<dyn TaskUpdater>,
        content: ContentProcessor,
    ) -> Self {
        Self {
            orchestrator,
            results,
            updater,
            content,
            agent_name: String::new(),
            task_timeout_secs: None,
        }
    }

    /// 根任务的 target_agent_id
    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = name.into();
        self
    }

    /// 根任务的 timeout_seconds，约束其下每个远程子调用
    pub fn with_task_timeout(mut self, secs: Option<u64>) -> Self {
        self.task_timeout_secs = secs.filter(|s| *s > 0);
        self
    }

    pub async fn process_task(
        &self,
        message: &QueueMessage,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, AgentError> {
        let record: TaskRecord = match serde_json::from_slice(&message.value) {
            Ok(r) => r,
            Err(e) => {
                if message.key.is_empty() {
                    tracing::error!(offset = message.offset, "failed to decode task message: {}", e);
                    return Err(AgentError::Decode(e.to_string()));
                }
                tracing::warn!(task_id = %message.key, "malformed task message: {}", e);
                let error = format!("Malformed task message: {}", e);
                return self
                    .finish(&message.key, "", TaskStatus::Failed, None, Some(error))
                    .await;
            }
        };

        tracing::info!(task_id = %record.id, user_id = %record.user_id, "starting to process task");
        let Some(text) = record.content_text() else {
            tracing::warn!(task_id = %record.id, "{}", EMPTY_CONTENT_ERROR);
            return self
                .finish(&record.id, &record.user_id, TaskStatus::Failed, None, Some(EMPTY_CONTENT_ERROR.into()))
                .await;
        };

        let mut root = AgentTask::root(&record.id, text);
        root.source_agent_id = record.user_id.clone();
        root.target_agent_id = self.agent_name.clone();
        root.timeout_seconds = self.task_timeout_secs;

        match self.orchestrator.orchestrate(&root, cancel).await {
            TaskOutcome::Final(reply) => {
                tracing::info!(task_id = %record.id, "task execution successful");
                let contents = contents_from_proto(&reply.content);
                let processed = self
                    .content
                    .process(&contents, cancel)
                    .await
                    .and_then(|c| serde_json::to_value(c).map_err(AgentError::from));
                match processed {
                    Ok(result) => {
                        self.finish(&record.id, &record.user_id, TaskStatus::Success, Some(result), None)
                            .await
                    }
                    Err(e) => {
                        tracing::error!(task_id = %record.id, "failed to process result content: {}", e);
                        let error = format!("{}: {}", CONTENT_PROCESSING_ERROR, e);
                        self.finish(&record.id, &record.user_id, TaskStatus::Failed, None, Some(error))
                            .await
                    }
                }
            }
            TaskOutcome::NeedsLocalTool(task) => {
                tracing::info!(
                    task_id = %record.id,
                    tool = %task.task_name,
                    "task requires a local tool, returning to caller"
                );
                Ok(ProcessOutcome::NeedsLocalTool(task))
            }
            TaskOutcome::Failed(e) => {
                tracing::error!(task_id = %record.id, "task execution failed: {}", e);
                self.finish(&record.id, &record.user_id, TaskStatus::Failed, None, Some(e.to_string()))
                    .await
            }
        }
    }

    async fn finish(
        &self,
        id: &str,
        user_id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<ProcessOutcome, AgentError> {
        if let Err(e) = self
            .updater
            .update_result(id, status, result.clone(), error.clone())
            .await
        {
            tracing::error!(task_id = %id, "failed to persist task result: {}", e);
        }

        let message = TaskResultMessage {
            id: id.to_string(),
            user_id: user_id.to_string(),
            status,
            result: result.filter(|_| status == TaskStatus::Success),
            error: error.filter(|_| status != TaskStatus::Success),
        };
        self.results.publish(id, &message).await?;

        tracing::info!(task_id = %id, status = status.as_str(), "task result updated and published");
        Ok(ProcessOutcome::Completed(status))
    }
}

#[async_trait]
impl MessageHandler for Coordinator {
    async fn handle(&self, message: &QueueMessage, cancel: &CancellationToken) -> Result<(), AgentError> {
        self.process_task(message, cancel).await.map(|_| ())
    }
}
