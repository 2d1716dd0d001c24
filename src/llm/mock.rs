//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本依次返回预设的发言；脚本耗尽后回显最后一条用户文本作为最终答案，便于本地跑通 ReAct 流程。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{GenerateRequest, GenerateResponse, LlmClient};
use crate::models::{Content, FunctionCall, Part, Role};

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum MockStep {
    Reply(Content),
    Fail(String),
    /// 每次都请求同一组调用（不消耗脚本），用于测试迭代上限
    AlwaysCall(Vec<FunctionCall>),
}

#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<MockStep>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<GenerateRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(steps: impl IntoIterator<Item = MockStep>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    /// 一轮纯文本回答
    pub fn text(text: &str) -> MockStep {
        MockStep::Reply(Content::text(Role::Model, text))
    }

    /// 一轮函数调用，calls 为 (name, args)
    pub fn calls(calls: &[(&str, Value)]) -> MockStep {
        MockStep::Reply(Content::new(
            Role::Model,
            calls
                .iter()
                .enumerate()
                .map(|(i, (name, args))| {
                    Part::FunctionCall(FunctionCall {
                        id: Some(format!("call_{}", i)),
                        name: name.to_string(),
                        args: args.clone(),
                    })
                })
                .collect(),
        ))
    }

    /// generate 被调用的次数
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.last_request.lock().ok().and_then(|g| g.clone())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }

        let step = {
            let mut script = self.script.lock().map_err(|e| e.to_string())?;
            match script.front() {
                Some(MockStep::AlwaysCall(_)) => script.front().cloned(),
                _ => script.pop_front(),
            }
        };

        match step {
            Some(MockStep::Reply(content)) => Ok(GenerateResponse { content }),
            Some(MockStep::Fail(e)) => Err(e),
            Some(MockStep::AlwaysCall(calls)) => Ok(GenerateResponse {
                content: Content::new(Role::Model, calls.into_iter().map(Part::FunctionCall).collect()),
            }),
            None => {
                let last_user = request
                    .contents
                    .iter()
                    .rev()
                    .find(|c| c.role == Role::User)
                    .map(Content::joined_text)
                    .unwrap_or_else(|| "(no input)".to_string());
                Ok(GenerateResponse {
                    content: Content::text(Role::Model, format!("Echo from Mock: {}", last_user)),
                })
            }
        }
    }
}
