//! 进度事件上报
//!
//! 每步向外部日志汇（topic "agent_logs"）写一条 TaskLogEntry；写失败只记本地日志，不影响任务。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::core::AgentError;
use crate::models::{TaskLogEntry, TaskLogStatus};
use crate::protocol::AgentTask;
use crate::queue::MessagePublisher;

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, entry: &TaskLogEntry) -> Result<(), AgentError>;
}

/// 以 task_id 为 key 把 TaskLogEntry JSON 发布到日志 topic
pub struct QueueProgressSink {
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
}

impl QueueProgressSink {
    pub fn new(publisher: Arc<dyn MessagePublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl ProgressSink for QueueProgressSink {
    async fn emit(&self, entry: &TaskLogEntry) -> Result<(), AgentError> {
        let value = serde_json::to_vec(entry)?;
        self.publisher
            .publish(&self.topic, &entry.task_id, value)
            .await
    }
}

/// 无 sink 时静默
#[derive(Clone, Default)]
pub struct ProgressReporter {
    sink: Option<Arc<dyn ProgressSink>>,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn report(
        &self,
        task: &AgentTask,
        status: TaskLogStatus,
        message: impl Into<String>,
        content: Option<Value>,
    ) {
        let Some(sink) = &self.sink else {
            return;
        };
        let entry = TaskLogEntry {
            task_id: task.task_id.clone(),
            correlation_id: task.correlation_id.clone(),
            timestamp: Utc::now(),
            status,
            message: message.into(),
            content,
        };
        if let Err(e) = sink.emit(&entry).await {
            tracing::warn!(task_id = %entry.task_id, "failed to emit progress log: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryBroker;

    struct BrokenSink;

    #[async_trait]
    impl ProgressSink for BrokenSink {
        async fn emit(&self, _entry: &TaskLogEntry) -> Result<(), AgentError> {
            Err(AgentError::Queue("broker unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_sink_errors_are_swallowed() {
        let reporter = ProgressReporter::new(Arc::new(BrokenSink));
        let task = AgentTask::root("t1", "x");
        reporter.report(&task, TaskLogStatus::Thinking, "thinking", None).await;
        ProgressReporter::disabled()
            .report(&task, TaskLogStatus::Finished, "done", None)
            .await;
    }

    #[tokio::test]
    async fn test_queue_sink_publishes_keyed_entry() {
        let broker = Arc::new(InMemoryBroker::new());
        let reporter = ProgressReporter::new(Arc::new(QueueProgressSink::new(broker.clone(), "agent_logs")));
        let task = AgentTask::root("t1", "x");
        reporter
            .report(&task, TaskLogStatus::Observing, "observed", Some(serde_json::json!({"k": 1})))
            .await;

        let msgs = broker.messages("agent_logs").await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].key, "t1");
        let entry: TaskLogEntry = serde_json::from_slice(&msgs[0].value).unwrap();
        assert_eq!(entry.status, TaskLogStatus::Observing);
        assert_eq!(entry.correlation_id, "t1");
    }
}
