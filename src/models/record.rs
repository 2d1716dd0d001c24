//! 任务记录（接入侧持久化）与结果消息

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 任务状态：提交时 pending，终态时由 Coordinator 写为 success / failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "success" => Some(TaskStatus::Success),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

/// 入站任务记录；payload 中的 `content` 字段为用户输入文本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn pending(user_id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            status: TaskStatus::Pending,
            payload,
            result: None,
            error: None,
            submitted_at: Utc::now(),
            completed_at: None,
        }
    }

    /// payload.content，原样返回；全为空白视为缺失
    pub fn content_text(&self) -> Option<&str> {
        self.payload
            .get("content")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }
}

/// 出站结果消息（topic "results"）：成功带 result，失败带 error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultMessage {
    pub id: String,
    pub user_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResultMessage {
    pub fn success(id: &str, user_id: &str, result: Value) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            status: TaskStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: &str, user_id: &str, error: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_text() {
        let mut r = TaskRecord::pending("u1", json!({"content": "  hello "}));
        assert_eq!(r.content_text(), Some("  hello "));
        r.payload = json!({"content": "   "});
        assert_eq!(r.content_text(), None);
        r.payload = json!({"content": 42});
        assert_eq!(r.content_text(), None);
        r.payload = Value::Null;
        assert_eq!(r.content_text(), None);
    }

    #[test]
    fn test_record_decodes_minimal_json() {
        let r: TaskRecord =
            serde_json::from_str(r#"{"id":"t1","payload":{"content":"x"}}"#).unwrap();
        assert_eq!(r.status, TaskStatus::Pending);
        assert_eq!(r.user_id, "");
        assert_eq!(r.content_text(), Some("x"));
    }

    #[test]
    fn test_result_message_shape() {
        let m = TaskResultMessage::failure("t1", "u1", "boom");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v, json!({"id": "t1", "user_id": "u1", "status": "failed", "error": "boom"}));
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert_eq!(TaskStatus::parse("success"), Some(TaskStatus::Success));
    }
}
