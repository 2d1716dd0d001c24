//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient::generate：输入历史与可调用的工具声明，
//! 输出一轮 model 发言；其中的 FunctionCall Part 即为模型请求的调用。

use async_trait::async_trait;
use serde_json::Value;

use crate::models::Content;
use crate::protocol::CapabilityMetadata;

/// 提供给模型的可调用工具（由注册表中的能力描述生成）
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<&CapabilityMetadata> for ToolDeclaration {
    fn from(meta: &CapabilityMetadata) -> Self {
        let mut description = meta.capability.clone();
        if !meta.output_description.is_empty() {
            description.push_str(" Output: ");
            description.push_str(&meta.output_description);
        }
        Self {
            name: meta.name.clone(),
            description,
            parameters: serde_json::json!({
                "type": "object",
                "description": meta.input_description,
                "additionalProperties": true
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    pub tools: Vec<ToolDeclaration>,
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// role 一般为 model
    pub content: Content,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_declaration_from_metadata() {
        let meta = CapabilityMetadata {
            name: "calculator".into(),
            capability: "Evaluates arithmetic.".into(),
            input_description: "An expression".into(),
            output_description: "The number".into(),
        };
        let decl = ToolDeclaration::from(&meta);
        assert_eq!(decl.name, "calculator");
        assert_eq!(decl.description, "Evaluates arithmetic. Output: The number");
        assert_eq!(decl.parameters["description"], "An expression");
    }
}
