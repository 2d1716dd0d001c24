//! 多模态对话内容（领域模型）
//!
//! Content = 一轮发言（role + parts）；Part 为带标签的联合体，每个 Part 只承载一种数据。
//! LLM 历史、内容处理器与结果落库都使用这一层；跨 Agent 传输时转换为 [`crate::protocol::ProtoContent`]。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 发言者角色
///
/// 协议中的角色是自由字符串；已知角色映射为具名变体，其余（包括空串、`system`）原样保存在 `Other` 中。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum Role {
    #[default]
    User,
    Assistant,
    Tool,
    Model,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Model => "model",
            Role::Other(s) => s.as_str(),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            "model" => Role::Model,
            other => Role::Other(other.to_string()),
        }
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match Role::parse(&s) {
            Role::Other(_) => Role::Other(s),
            known => known,
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

/// 内联二进制数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// 基于 URI 的文件引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub file_uri: String,
    pub mime_type: String,
}

/// 模型请求的函数调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// 函数调用的结果（作为观察回灌给模型）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExecutionResult {
    pub outcome: String,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableCode {
    pub code: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<Duration>,
}

/// 消息的单个部分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Part {
    Text(String),
    InlineData(Blob),
    FileData(FileData),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
    CodeExecutionResult(CodeExecutionResult),
    ExecutableCode(ExecutableCode),
    VideoMetadata(VideoMetadata),
}

impl Default for Part {
    fn default() -> Self {
        Part::Text(String::new())
    }
}

impl Part {
    pub fn text(s: impl Into<String>) -> Self {
        Part::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn as_function_call(&self) -> Option<&FunctionCall> {
        match self {
            Part::FunctionCall(fc) => Some(fc),
            _ => None,
        }
    }
}

/// 一轮发言
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Content {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![Part::text(text)])
    }

    /// 所有文本 Part 依次拼接
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn function_calls(&self) -> Vec<FunctionCall> {
        self.parts
            .iter()
            .filter_map(Part::as_function_call)
            .cloned()
            .collect()
    }

    /// 工具观察：单个 FunctionResponse，role = tool
    pub fn observation(call: &FunctionCall, response: Map<String, Value>) -> Self {
        Self::new(
            Role::Tool,
            vec![Part::FunctionResponse(FunctionResponse {
                id: call.id.clone(),
                name: call.name.clone(),
                response,
            })],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_part_json_shape() {
        let p = Part::FileData(FileData {
            display_name: None,
            file_uri: "/tmp/a.png".into(),
            mime_type: "image/png".into(),
        });
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v, json!({"fileData": {"fileUri": "/tmp/a.png", "mimeType": "image/png"}}));

        let t: Part = serde_json::from_value(json!({"text": "hi"})).unwrap();
        assert_eq!(t, Part::text("hi"));
    }

    #[test]
    fn test_role_serializes_as_plain_string() {
        let c = Content::text(Role::Other("system".into()), "be brief");
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["role"], "system");
        let back: Content = serde_json::from_value(v).unwrap();
        assert_eq!(back, c);

        let model: Content = serde_json::from_value(json!({"role": "model", "parts": []})).unwrap();
        assert_eq!(model.role, Role::Model);
    }

    #[test]
    fn test_joined_text_and_calls() {
        let c = Content::new(
            Role::Model,
            vec![
                Part::text("a"),
                Part::FunctionCall(FunctionCall {
                    id: Some("1".into()),
                    name: "calc".into(),
                    args: json!({"x": 1}),
                }),
                Part::text("b"),
            ],
        );
        assert_eq!(c.joined_text(), "ab");
        assert_eq!(c.function_calls().len(), 1);
        assert_eq!(c.function_calls()[0].name, "calc");
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("model"), Role::Model);
        assert_eq!(Role::parse("system"), Role::Other("system".into()));
        assert_eq!(Role::parse(""), Role::Other(String::new()));
        assert_eq!(Role::Other("system".into()).as_str(), "system");
        assert_eq!(Role::Tool.as_str(), "tool");
    }
}
