//! ReAct 主循环
//!
//! Reasoning（调用 LLM）-> 无函数调用则 Final；有则追加模型发言、交给 Dispatcher，
//! NeedsLocalTool 立即向上传递，否则追加观察进入下一轮。超过最大迭代数即 Failed。
//! 每步向进度汇写 THINKING / CALLING_* / OBSERVING / FINISHED / ERROR。

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, TaskOutcome};
use crate::lineage::TaskJournal;
use crate::llm::{GenerateRequest, LlmClient, ToolDeclaration};
use crate::models::{Content, Role, TaskLogStatus};
use crate::orchestrator::{DispatchOutcome, Dispatcher, ProgressReporter};
use crate::protocol::{content_to_proto, contents_from_proto, AgentTask, CapabilityMetadata};
use crate::registry::CapabilityRegistry;
use crate::rpc::{Agent, ConnectionPool};

/// 单个任务内最大 ReAct 迭代数，防止死循环
pub const DEFAULT_MAX_ITERATIONS: usize = 10;
pub const FINAL_TASK_NAME: &str = "Final Result";

/// 由 Coordinator 调用的编排入口
#[async_trait]
pub trait TaskOrchestrator: Send + Sync {
    async fn orchestrate(&self, task: &AgentTask, cancel: &CancellationToken) -> TaskOutcome;
}

pub struct ReactOrchestrator {
    llm: Arc<dyn LlmClient>,
    registry: Arc<dyn CapabilityRegistry>,
    dispatcher: Dispatcher,
    progress: ProgressReporter,
    metadata: CapabilityMetadata,
    max_iterations: usize,
    journal: Option<Arc<dyn TaskJournal>>,
    /// 通过 Agent 契约（远程调用）进入时使用的取消信号
    shutdown: CancellationToken,
}

impl ReactOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<dyn CapabilityRegistry>,
        pool: Arc<ConnectionPool>,
        metadata: CapabilityMetadata,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&registry), pool),
            llm,
            registry,
            progress: ProgressReporter::disabled(),
            metadata,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            journal: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.dispatcher = self.dispatcher.with_progress(progress.clone());
        self.progress = progress;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_local_tool_handler(mut self, handler: impl Into<String>) -> Self {
        self.dispatcher = self.dispatcher.with_local_tool_handler(handler);
        self
    }

    pub fn with_journal(mut self, journal: Arc<dyn TaskJournal>) -> Self {
        self.dispatcher = self.dispatcher.with_journal(Arc::clone(&journal));
        self.journal = Some(journal);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn metadata(&self) -> &CapabilityMetadata {
        &self.metadata
    }

    pub async fn run(&self, task: &AgentTask, cancel: &CancellationToken) -> TaskOutcome {
        self.record(task).await;

        let capabilities = self.registry.all_metadata().await;
        let tools: Vec<ToolDeclaration> = capabilities.iter().map(ToolDeclaration::from).collect();
        let mut history = Vec::with_capacity(task.content.len() + 1);
        if !capabilities.is_empty() {
            history.push(build_tool_prompt(&capabilities));
        }
        history.extend(contents_from_proto(&task.content));

        for iteration in 1..=self.max_iterations {
            self.progress
                .report(
                    task,
                    TaskLogStatus::Thinking,
                    format!("Iteration {}/{}: thinking", iteration, self.max_iterations),
                    None,
                )
                .await;

            let request = GenerateRequest {
                contents: history,
                tools: tools.clone(),
            };
            let generated = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.fail(task, AgentError::Cancelled).await,
                r = self.llm.generate(&request) => r,
            };
            history = request.contents;
            let response = match generated {
                Ok(r) => r,
                Err(e) => return self.fail(task, AgentError::LlmError(e)).await,
            };

            let calls = response.content.function_calls();
            if calls.is_empty() {
                let text = response.content.joined_text();
                self.progress
                    .report(
                        task,
                        TaskLogStatus::Finished,
                        "Task finished",
                        Some(serde_json::Value::String(text)),
                    )
                    .await;
                let reply = task.child(
                    task.source_agent_id.clone(),
                    FINAL_TASK_NAME,
                    vec![content_to_proto(&response.content)],
                );
                self.record(&reply).await;
                tracing::info!(task_id = %task.task_id, iterations = iteration, "task finished");
                return TaskOutcome::Final(reply);
            }

            tracing::debug!(task_id = %task.task_id, calls = calls.len(), "model requested function calls");
            history.push(response.content);
            match self.dispatcher.dispatch(&calls, task, cancel).await {
                Ok(DispatchOutcome::NeedsLocalTool(local)) => {
                    tracing::info!(task_id = %task.task_id, tool = %local.task_name, "handing off to local tool");
                    return TaskOutcome::NeedsLocalTool(local);
                }
                Ok(DispatchOutcome::Observations(observations)) => history.extend(observations),
                Err(e) => return self.fail(task, e).await,
            }
        }

        self.fail(task, AgentError::MaxIterations(self.max_iterations))
            .await
    }

    async fn fail(&self, task: &AgentTask, error: AgentError) -> TaskOutcome {
        tracing::warn!(task_id = %task.task_id, "task failed: {}", error);
        self.progress
            .report(task, TaskLogStatus::Error, error.to_string(), None)
            .await;
        TaskOutcome::Failed(error)
    }

    async fn record(&self, task: &AgentTask) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(task).await {
                tracing::warn!(task_id = %task.task_id, "failed to journal task: {}", e);
            }
        }
    }
}

/// 列出全部可用能力的提示（作为首条 user 发言）
pub fn build_tool_prompt(capabilities: &[CapabilityMetadata]) -> Content {
    let mut prompt = String::from(
        "You can call the following functions. Request a function call when one of them helps; \
         otherwise answer directly.\n",
    );
    for meta in capabilities {
        prompt.push_str(&format!(
            "\nFunction Name: {}\nDescription: {}\nInput: {}\nOutput: {}\n",
            meta.name, meta.capability, meta.input_description, meta.output_description
        ));
    }
    Content::text(Role::User, prompt)
}

#[async_trait]
impl TaskOrchestrator for ReactOrchestrator {
    async fn orchestrate(&self, task: &AgentTask, cancel: &CancellationToken) -> TaskOutcome {
        self.run(task, cancel).await
    }
}

#[async_trait]
impl Agent for ReactOrchestrator {
    async fn execute(&self, task: AgentTask) -> Result<AgentTask, AgentError> {
        let cancel = self.shutdown.child_token();
        self.run(&task, &cancel).await.into_result()
    }

    async fn describe(&self) -> Result<CapabilityMetadata, AgentError> {
        Ok(self.metadata.clone())
    }
}
