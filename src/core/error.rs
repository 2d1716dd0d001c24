//! Agent 错误类型
//!
//! 编排、调度、协调各层共用的错误枚举。编排内部的本地工具信号用 [`crate::core::TaskOutcome`] 表达；
//! 只有跨越 Agent 契约（`execute` 只能返回 Result）时才以 [`AgentError::LocalToolRequired`] 携带。

use thiserror::Error;

use crate::protocol::AgentTask;

/// 运行过程中可能出现的错误（LLM、远程调用、存储、队列、谱系等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("reached max iterations ({0}) without a final answer")]
    MaxIterations(usize),

    #[error("Remote agent call failed: {0}")]
    Rpc(String),

    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Service discovery error: {0}")]
    Discovery(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Object store error: {0}")]
    Storage(String),

    #[error("Task store error: {0}")]
    Store(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// 父链或子树中出现重复 task_id
    #[error("Cycle detected in task lineage at {0}")]
    LineageCycle(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Content processing failed: {0}")]
    ContentProcessing(String),

    /// 下游 Agent 请求本地工具继续处理；不是失败，调用方应还原为 NeedsLocalTool
    #[error("Local tool required: {}", .0.task_name)]
    LocalToolRequired(Box<AgentTask>),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// 远程调用失败是否可作为观察结果回灌给推理循环（而非终止任务）
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            AgentError::Rpc(_) | AgentError::Connect { .. } | AgentError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            AgentError::MaxIterations(10).to_string(),
            "reached max iterations (10) without a final answer"
        );
        let e = AgentError::Connect {
            endpoint: "http://127.0.0.1:1".into(),
            reason: "refused".into(),
        };
        assert!(e.to_string().contains("http://127.0.0.1:1"));
    }

    #[test]
    fn test_remote_failure_classification() {
        assert!(AgentError::Rpc("boom".into()).is_remote_failure());
        assert!(AgentError::Timeout("calc".into()).is_remote_failure());
        assert!(!AgentError::LlmError("x".into()).is_remote_failure());
        assert!(!AgentError::Cancelled.is_remote_failure());
        let signal = AgentError::LocalToolRequired(Box::new(AgentTask::root("t", "x")));
        assert!(!signal.is_remote_failure());
    }
}
