//! 进度日志条目（topic "agent_logs"），只写不读

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskLogStatus {
    Thinking,
    CallingSubAgent,
    CallingMcpTool,
    Observing,
    Finished,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub task_id: String,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: TaskLogStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}
