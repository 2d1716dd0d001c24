//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use mock::{MockLlmClient, MockStep};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{GenerateRequest, GenerateResponse, LlmClient, ToolDeclaration};

use crate::config::LlmSection;
use crate::core::AgentError;

/// 按配置创建 LLM 客户端：provider = "openai" / "deepseek" 走兼容端点，其余用 Mock
pub fn create_llm_from_config(cfg: &LlmSection) -> Result<Arc<dyn LlmClient>, AgentError> {
    match cfg.provider.as_str() {
        "openai" | "deepseek" => {
            let client = OpenAiClient::new(
                cfg.base_url.as_deref(),
                &cfg.model,
                cfg.api_key.as_deref(),
                cfg.request_timeout_secs,
            )
            .map_err(AgentError::ConfigError)?;
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.model);
            Ok(Arc::new(client))
        }
        other => {
            tracing::info!("Using Mock LLM (provider = {})", other);
            Ok(Arc::new(MockLlmClient::new()))
        }
    }
}
