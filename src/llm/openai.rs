//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url），把领域发言映射为 chat 消息：
//! model 发言中的 FunctionCall -> assistant.tool_calls，tool 发言中的 FunctionResponse -> role=tool 消息。
//! 适用于 OpenAI、DeepSeek 及自建代理等任何兼容端点。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionResponseMessage, ChatCompletionTool,
    ChatCompletionTools, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    FunctionCall as OpenAiFunctionCall, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{GenerateRequest, GenerateResponse, LlmClient, ToolDeclaration};
use crate::models::{Content, FunctionCall, Part, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self, String> {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url.trim_end_matches('/'))
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| e.to_string())?;

        Ok(Self {
            client: Client::with_config(config).with_http_client(http),
            model: model.to_string(),
            usage: TokenUsage::new(),
        })
    }

    fn build_request(&self, request: &GenerateRequest) -> Result<CreateChatCompletionRequest, String> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .messages(to_openai_messages(&request.contents)?);
        if !request.tools.is_empty() {
            let tools = request
                .tools
                .iter()
                .map(to_openai_tool)
                .collect::<Result<Vec<_>, _>>()?;
            builder.tools(tools);
        }
        builder.build().map_err(|e| e.to_string())
    }
}

fn to_openai_tool(tool: &ToolDeclaration) -> Result<ChatCompletionTools, String> {
    let function = FunctionObjectArgs::default()
        .name(tool.name.clone())
        .description(tool.description.clone())
        .parameters(tool.parameters.clone())
        .build()
        .map_err(|e| e.to_string())?;
    Ok(ChatCompletionTools::Function(ChatCompletionTool { function }))
}

/// 调用 id 缺失时以名字代替，保证 tool_calls 与 tool 消息能对上
fn call_id(id: &Option<String>, name: &str) -> String {
    id.clone().unwrap_or_else(|| name.to_string())
}

fn text_message(role: &Role, text: String) -> Result<ChatCompletionRequestMessage, String> {
    let message = match role {
        Role::Other(r) if r == "system" => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(text)
                .build()
                .map_err(|e| e.to_string())?,
        ),
        _ => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(text)
                .build()
                .map_err(|e| e.to_string())?,
        ),
    };
    Ok(message)
}

/// 领域发言 -> chat 消息。一个 tool 发言中的每个 FunctionResponse 各成一条 role=tool 消息。
fn to_openai_messages(contents: &[Content]) -> Result<Vec<ChatCompletionRequestMessage>, String> {
    let mut messages = Vec::new();
    for content in contents {
        match &content.role {
            Role::Assistant | Role::Model => {
                let calls: Vec<ChatCompletionMessageToolCalls> = content
                    .function_calls()
                    .into_iter()
                    .map(|fc| {
                        ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                            id: call_id(&fc.id, &fc.name),
                            function: OpenAiFunctionCall {
                                arguments: fc.args.to_string(),
                                name: fc.name,
                            },
                        })
                    })
                    .collect();
                let text = content.joined_text();
                let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                if !text.is_empty() || calls.is_empty() {
                    builder.content(text);
                }
                if !calls.is_empty() {
                    builder.tool_calls(calls);
                }
                messages.push(ChatCompletionRequestMessage::Assistant(
                    builder.build().map_err(|e| e.to_string())?,
                ));
            }
            Role::Tool => {
                for part in &content.parts {
                    if let Part::FunctionResponse(fr) = part {
                        messages.push(ChatCompletionRequestMessage::Tool(
                            ChatCompletionRequestToolMessageArgs::default()
                                .tool_call_id(call_id(&fr.id, &fr.name))
                                .content(Value::Object(fr.response.clone()).to_string())
                                .build()
                                .map_err(|e| e.to_string())?,
                        ));
                    }
                }
            }
            role => messages.push(text_message(role, content.joined_text())?),
        }
    }
    Ok(messages)
}

/// choices[0].message -> 领域发言（文本 + FunctionCall）
fn parse_choice_message(message: &ChatCompletionResponseMessage) -> Content {
    let mut parts = Vec::new();
    if let Some(text) = message.content.as_deref().filter(|t| !t.is_empty()) {
        parts.push(Part::text(text));
    }
    for call in message.tool_calls.iter().flatten() {
        // 自定义工具调用不在能力模型之内
        let ChatCompletionMessageToolCalls::Function(call) = call else {
            continue;
        };
        let raw_args = call.function.arguments.as_str();
        let args = if raw_args.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(raw_args).unwrap_or_else(|_| serde_json::json!({ "raw": raw_args }))
        };
        parts.push(Part::FunctionCall(FunctionCall {
            id: Some(call.id.clone()).filter(|id| !id.is_empty()),
            name: call.function.name.clone(),
            args,
        }));
    }
    Content::new(Role::Model, parts)
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, String> {
        let request = self.build_request(request)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        // 提取 token 使用统计
        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let message = response
            .choices
            .first()
            .map(|c| &c.message)
            .ok_or_else(|| "response has no choices".to_string())?;

        Ok(GenerateResponse {
            content: parse_choice_message(message),
        })
    }
}
