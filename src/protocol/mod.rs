//! Agent 间协议消息
//!
//! AgentTask 是 Agent 之间传递的工作单元（每一跳一个 task_id，整条链共享 correlation_id）；
//! 内容使用 ProtoContent / ProtoPart（one-of 风格），与领域模型的互转见 [`convert`]。

pub mod convert;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use convert::{content_from_proto, content_to_proto, contents_from_proto, contents_to_proto};

/// Agent / 工具的能力描述，由 Describe 返回，注册表缓存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CapabilityMetadata {
    pub name: String,
    pub capability: String,
    #[serde(default)]
    pub input_description: String,
    #[serde(default)]
    pub output_description: String,
}

/// 失败重试策略（随任务向下游继承）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_coefficient: f64,
    /// 如 "1s"
    pub initial_delay: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProtoBlob {
    #[serde(default)]
    pub display_name: String,
    pub data: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProtoFileData {
    #[serde(default)]
    pub display_name: String,
    pub file_uri: String,
    pub mime_type: String,
}

/// args 以 JSON 字符串传输
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProtoFunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args_json: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProtoFunctionResponse {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub response: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProtoCodeExecutionResult {
    pub outcome: String,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProtoExecutableCode {
    pub code: String,
    pub language: String,
}

/// 偏移量以毫秒传输
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProtoVideoMetadata {
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub start_offset_ms: Option<u64>,
    #[serde(default)]
    pub end_offset_ms: Option<u64>,
}

/// one-of：一个 Part 只填一种
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PartData {
    Text(String),
    InlineData(ProtoBlob),
    FileData(ProtoFileData),
    FunctionCall(ProtoFunctionCall),
    FunctionResponse(ProtoFunctionResponse),
    CodeExecutionResult(ProtoCodeExecutionResult),
    ExecutableCode(ProtoExecutableCode),
    VideoMetadata(ProtoVideoMetadata),
}

/// data 为空时按空文本处理
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProtoPart {
    #[serde(default)]
    pub data: Option<PartData>,
}

impl ProtoPart {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            data: Some(PartData::Text(s.into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProtoContent {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<ProtoPart>,
}

/// Agent 间传递的任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_id: String,
    pub correlation_id: String,
    /// 根任务为空
    #[serde(default)]
    pub parent_task_id: String,
    #[serde(default)]
    pub source_agent_id: String,
    #[serde(default)]
    pub target_agent_id: String,
    #[serde(default)]
    pub task_name: String,
    #[serde(default)]
    pub content: Vec<ProtoContent>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl AgentTask {
    /// 根任务：task_id 与 correlation_id 均为入站记录 id，内容为一条用户文本
    pub fn root(record_id: &str, text: &str) -> Self {
        Self {
            task_id: record_id.to_string(),
            correlation_id: record_id.to_string(),
            parent_task_id: String::new(),
            source_agent_id: String::new(),
            target_agent_id: String::new(),
            task_name: String::new(),
            content: vec![ProtoContent {
                role: "user".to_string(),
                parts: vec![ProtoPart::text(text)],
            }],
            created_at: Utc::now(),
            timeout_seconds: None,
            retry_policy: None,
        }
    }

    /// 派生下一跳：新 task_id，继承 correlation_id（为空则新生成），source = 本任务的 target
    pub fn child(
        &self,
        target_agent_id: impl Into<String>,
        task_name: impl Into<String>,
        content: Vec<ProtoContent>,
    ) -> Self {
        let correlation_id = if self.correlation_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            self.correlation_id.clone()
        };
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            correlation_id,
            parent_task_id: self.task_id.clone(),
            source_agent_id: self.target_agent_id.clone(),
            target_agent_id: target_agent_id.into(),
            task_name: task_name.into(),
            content,
            created_at: Utc::now(),
            timeout_seconds: self.timeout_seconds,
            retry_policy: self.retry_policy.clone(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_task_id.is_empty()
    }

    /// 所有文本 Part 依次拼接（跨 Content）
    pub fn text(&self) -> String {
        self.content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| match &p.data {
                Some(PartData::Text(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}
