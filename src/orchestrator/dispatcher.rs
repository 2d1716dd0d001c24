//! 单轮函数调用分发
//!
//! 依次解析每个调用：
//! - 注册表未命中（或解析出错）→ 本地工具：立即返回 NeedsLocalTool，并中止本轮已发出的远程调用；
//! - 命中 → 派生子任务，每个调用一个并发任务执行，结果或错误统一转为 tool 观察 `{"output"|"error": ...}`。
//!
//! 所有远程调用结束后按完成结果汇总返回；观察顺序与调用顺序无关。每个调用的错误单独保留，不会互相覆盖。
//! 子 Agent 以 `LocalToolRequired` 返回时，其本地工具任务作为 NeedsLocalTool 上抛。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::lineage::TaskJournal;
use crate::models::{Content, FunctionCall, Part, Role, TaskLogStatus};
use crate::orchestrator::ProgressReporter;
use crate::protocol::{content_to_proto, AgentTask, ProtoContent, ProtoPart};
use crate::registry::{CapabilityRegistry, Endpoint};
use crate::rpc::ConnectionPool;

/// 约定的本地工具处理方
pub const DEFAULT_LOCAL_TOOL_HANDLER: &str = "mcp_tool_handler";

#[derive(Debug)]
pub enum DispatchOutcome {
    /// 每个远程调用一条 tool 观察
    Observations(Vec<Content>),
    NeedsLocalTool(AgentTask),
}

struct InFlight {
    call: FunctionCall,
    handle: JoinHandle<Result<AgentTask, AgentError>>,
}

pub struct Dispatcher {
    registry: Arc<dyn CapabilityRegistry>,
    pool: Arc<ConnectionPool>,
    progress: ProgressReporter,
    local_tool_handler: String,
    journal: Option<Arc<dyn TaskJournal>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<dyn CapabilityRegistry>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            registry,
            pool,
            progress: ProgressReporter::disabled(),
            local_tool_handler: DEFAULT_LOCAL_TOOL_HANDLER.to_string(),
            journal: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_local_tool_handler(mut self, handler: impl Into<String>) -> Self {
        self.local_tool_handler = handler.into();
        self
    }

    pub fn with_journal(mut self, journal: Arc<dyn TaskJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub async fn dispatch(
        &self,
        calls: &[FunctionCall],
        origin: &AgentTask,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, AgentError> {
        let mut in_flight: Vec<InFlight> = Vec::with_capacity(calls.len());

        for call in calls {
            let endpoint = match self.registry.resolve(&call.name).await {
                Ok(Some(endpoint)) => endpoint,
                Ok(None) => return Ok(self.local_tool(call, origin, in_flight).await),
                Err(e) => {
                    tracing::warn!(tool = %call.name, "capability resolution failed, treating as local tool: {}", e);
                    return Ok(self.local_tool(call, origin, in_flight).await);
                }
            };

            let child = origin.child(
                call.name.clone(),
                format!("Sub-task for {}", call.name),
                vec![ProtoContent {
                    role: Role::User.as_str().to_string(),
                    parts: vec![ProtoPart::text(call.args.to_string())],
                }],
            );
            self.progress
                .report(
                    origin,
                    TaskLogStatus::CallingSubAgent,
                    format!("Calling sub-agent: {}", call.name),
                    Some(call.args.clone()),
                )
                .await;
            self.record(&child).await;

            let pool = Arc::clone(&self.pool);
            let deadline = origin
                .timeout_seconds
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs);
            in_flight.push(InFlight {
                call: call.clone(),
                handle: tokio::spawn(call_remote(pool, endpoint, child, deadline)),
            });
        }

        self.collect(in_flight, origin, cancel).await
    }

    /// 仅携带该函数调用的本地工具任务；中止本轮已发出的远程调用
    async fn local_tool(
        &self,
        call: &FunctionCall,
        origin: &AgentTask,
        in_flight: Vec<InFlight>,
    ) -> DispatchOutcome {
        if !in_flight.is_empty() {
            tracing::info!(
                tool = %call.name,
                aborted = in_flight.len(),
                "local tool requested, abandoning in-flight sub-agent calls"
            );
        }
        for f in &in_flight {
            f.handle.abort();
        }

        let content = Content::new(Role::Assistant, vec![Part::FunctionCall(call.clone())]);
        let task = origin.child(
            self.local_tool_handler.clone(),
            call.name.clone(),
            vec![content_to_proto(&content)],
        );
        self.progress
            .report(
                origin,
                TaskLogStatus::CallingMcpTool,
                format!("Delegating to local tool: {}", call.name),
                Some(call.args.clone()),
            )
            .await;
        self.record(&task).await;
        DispatchOutcome::NeedsLocalTool(task)
    }

    async fn collect(
        &self,
        in_flight: Vec<InFlight>,
        origin: &AgentTask,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, AgentError> {
        let abort_handles: Vec<_> = in_flight.iter().map(|f| f.handle.abort_handle()).collect();
        let (calls, handles): (Vec<FunctionCall>, Vec<_>) =
            in_flight.into_iter().map(|f| (f.call, f.handle)).unzip();

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                for h in &abort_handles {
                    h.abort();
                }
                return Err(AgentError::Cancelled);
            }
            results = futures_util::future::join_all(handles) => results,
        };

        let mut observations = Vec::with_capacity(results.len());
        let mut failures: Vec<(String, String)> = Vec::new();
        for (call, joined) in calls.iter().zip(results) {
            let mut response = Map::new();
            match joined {
                Ok(Ok(task)) => {
                    response.insert("output".into(), Value::String(task.text()));
                }
                // 子 Agent 自身需要本地工具：信号原样上抛，本轮其它观察丢弃
                Ok(Err(AgentError::LocalToolRequired(task))) => {
                    tracing::info!(
                        sub_agent = %call.name,
                        tool = %task.task_name,
                        "sub-agent requested a local tool, propagating"
                    );
                    self.progress
                        .report(
                            origin,
                            TaskLogStatus::CallingMcpTool,
                            format!("Sub-agent {} delegated to local tool: {}", call.name, task.task_name),
                            None,
                        )
                        .await;
                    return Ok(DispatchOutcome::NeedsLocalTool(*task));
                }
                Ok(Err(e)) => {
                    failures.push((call.name.clone(), e.to_string()));
                    response.insert("error".into(), Value::String(e.to_string()));
                }
                Err(join_err) => {
                    let msg = format!("sub-agent call did not complete: {}", join_err);
                    failures.push((call.name.clone(), msg.clone()));
                    response.insert("error".into(), Value::String(msg));
                }
            }
            let observation = Content::observation(call, response.clone());
            self.progress
                .report(
                    origin,
                    TaskLogStatus::Observing,
                    format!("Observed result from {}", call.name),
                    Some(Value::Object(response)),
                )
                .await;
            observations.push(observation);
        }

        if !failures.is_empty() {
            tracing::warn!(
                task_id = %origin.task_id,
                failed = failures.len(),
                total = calls.len(),
                "sub-agent calls failed: {:?}",
                failures
            );
        }
        Ok(DispatchOutcome::Observations(observations))
    }

    async fn record(&self, task: &AgentTask) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(task).await {
                tracing::warn!(task_id = %task.task_id, "failed to journal task: {}", e);
            }
        }
    }
}

/// 单个远程调用：取连接、执行（可选截止时间），输出审计日志
async fn call_remote(
    pool: Arc<ConnectionPool>,
    endpoint: Endpoint,
    child: AgentTask,
    deadline: Option<Duration>,
) -> Result<AgentTask, AgentError> {
    let start = Instant::now();
    let target = child.target_agent_id.clone();
    let task_id = child.task_id.clone();

    let result = async {
        let agent = match &endpoint {
            Endpoint::InProcess(agent) => Arc::clone(agent),
            Endpoint::Remote(address) => pool.get(address).await?,
        };
        match deadline {
            Some(d) => tokio::time::timeout(d, agent.execute(child))
                .await
                .unwrap_or_else(|_| Err(AgentError::Timeout(target.clone()))),
            None => agent.execute(child).await,
        }
    }
    .await;

    // 连接失效时丢弃池中条目，下次重连
    if let (Err(AgentError::Connect { .. }), Endpoint::Remote(address)) = (&result, &endpoint) {
        pool.remove(address).await;
    }

    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) if e.is_remote_failure() => "remote_error",
        Err(_) => "error",
    };
    let audit = json!({
        "event": "agent_call_audit",
        "target": target,
        "task_id": task_id,
        "ok": result.is_ok(),
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
    });
    tracing::info!(audit = %audit.to_string(), "agent_call");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{contents_from_proto, CapabilityMetadata};
    use crate::registry::LocalRegistry;
    use crate::rpc::{Agent, AgentConnector};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// 回显参数；可配置延迟与失败
    struct EchoAgent {
        name: &'static str,
        delay_ms: u64,
        fail: bool,
        finished: Arc<AtomicBool>,
    }

    impl EchoAgent {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                delay_ms: 0,
                fail: false,
                finished: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl Agent for EchoAgent {
        async fn execute(&self, task: AgentTask) -> Result<AgentTask, AgentError> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.finished.store(true, Ordering::SeqCst);
            if self.fail {
                return Err(AgentError::Rpc(format!("{} exploded", self.name)));
            }
            let reply = format!("{} handled {}", self.name, task.text());
            Ok(task.child(task.source_agent_id.clone(), "Final Result", vec![ProtoContent {
                role: "model".into(),
                parts: vec![ProtoPart::text(reply)],
            }]))
        }

        async fn describe(&self) -> Result<CapabilityMetadata, AgentError> {
            Ok(CapabilityMetadata {
                name: self.name.to_string(),
                capability: "echo".into(),
                ..Default::default()
            })
        }
    }

    struct NoRemote;

    #[async_trait]
    impl AgentConnector for NoRemote {
        async fn connect(&self, address: &str) -> Result<Arc<dyn Agent>, AgentError> {
            Err(AgentError::Connect {
                endpoint: address.into(),
                reason: "no network in tests".into(),
            })
        }
    }

    fn pool() -> Arc<ConnectionPool> {
        Arc::new(ConnectionPool::new(Arc::new(NoRemote), Duration::from_secs(60)))
    }

    fn call(name: &str, id: &str) -> FunctionCall {
        FunctionCall {
            id: Some(id.into()),
            name: name.into(),
            args: json!({"q": name}),
        }
    }

    fn response_of(c: &Content) -> (&str, &Map<String, Value>) {
        match &c.parts[0] {
            Part::FunctionResponse(fr) => (fr.name.as_str(), &fr.response),
            other => panic!("not an observation: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_both_resolved_yield_two_observations() {
        let reg = Arc::new(LocalRegistry::new());
        let mut slow = EchoAgent::new("A");
        slow.delay_ms = 30;
        reg.register(Arc::new(slow)).await.unwrap();
        reg.register(Arc::new(EchoAgent::new("B"))).await.unwrap();

        let dispatcher = Dispatcher::new(reg, pool());
        let origin = AgentTask::root("root", "question");
        let out = dispatcher
            .dispatch(&[call("A", "1"), call("B", "2")], &origin, &CancellationToken::new())
            .await
            .unwrap();

        let DispatchOutcome::Observations(obs) = out else {
            panic!("expected observations");
        };
        assert_eq!(obs.len(), 2);
        let mut names: Vec<&str> = obs.iter().map(|o| response_of(o).0).collect();
        names.sort();
        assert_eq!(names, vec!["A", "B"]);
        for o in &obs {
            assert_eq!(o.role, Role::Tool);
            let (name, resp) = response_of(o);
            let output = resp["output"].as_str().unwrap();
            assert!(output.starts_with(&format!("{} handled", name)));
            assert!(output.contains(&format!(r#"{{"q":"{}"}}"#, name)));
        }
    }

    #[tokio::test]
    async fn test_unresolved_call_short_circuits() {
        let reg = Arc::new(LocalRegistry::new());
        let mut slow = EchoAgent::new("A");
        slow.delay_ms = 200;
        let finished = slow.finished.clone();
        reg.register(Arc::new(slow)).await.unwrap();

        let dispatcher = Dispatcher::new(reg, pool());
        let mut origin = AgentTask::root("root", "question");
        origin.target_agent_id = "planner".into();
        let out = dispatcher
            .dispatch(&[call("A", "1"), call("B", "2")], &origin, &CancellationToken::new())
            .await
            .unwrap();

        let DispatchOutcome::NeedsLocalTool(task) = out else {
            panic!("expected local tool signal");
        };
        assert_eq!(task.target_agent_id, DEFAULT_LOCAL_TOOL_HANDLER);
        assert_eq!(task.task_name, "B");
        assert_eq!(task.parent_task_id, "root");
        assert_eq!(task.source_agent_id, "planner");
        let contents = contents_from_proto(&task.content);
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].role, Role::Assistant);
        assert_eq!(contents[0].function_calls(), vec![call("B", "2")]);

        // 已发出的 A 被中止，不会完成
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_every_failure_becomes_error_observation() {
        let reg = Arc::new(LocalRegistry::new());
        for name in ["A", "B"] {
            let mut agent = EchoAgent::new(name);
            agent.fail = true;
            reg.register(Arc::new(agent)).await.unwrap();
        }
        reg.register_with(
            CapabilityMetadata {
                name: "C".into(),
                ..Default::default()
            },
            Arc::new(EchoAgent::new("C")),
        )
        .await;

        let dispatcher = Dispatcher::new(reg, pool());
        let origin = AgentTask::root("root", "q");
        let out = dispatcher
            .dispatch(&[call("A", "1"), call("B", "2"), call("C", "3")], &origin, &CancellationToken::new())
            .await
            .unwrap();
        let DispatchOutcome::Observations(obs) = out else {
            panic!("expected observations");
        };
        let errors = obs.iter().filter(|o| response_of(o).1.contains_key("error")).count();
        let outputs = obs.iter().filter(|o| response_of(o).1.contains_key("output")).count();
        assert_eq!((errors, outputs), (2, 1));
    }

    struct RemoteOnly;

    #[async_trait]
    impl CapabilityRegistry for RemoteOnly {
        async fn resolve(&self, _name: &str) -> Result<Option<Endpoint>, AgentError> {
            Ok(Some(Endpoint::Remote("10.0.0.9:1".into())))
        }

        async fn all_metadata(&self) -> Vec<CapabilityMetadata> {
            vec![]
        }

        async fn refresh(&self) -> Result<(), AgentError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_connect_error_is_observation_not_failure() {
        let dispatcher = Dispatcher::new(Arc::new(RemoteOnly), pool());
        let out = dispatcher
            .dispatch(&[call("remote", "1")], &AgentTask::root("r", "q"), &CancellationToken::new())
            .await
            .unwrap();
        let DispatchOutcome::Observations(obs) = out else {
            panic!("expected observations");
        };
        let err = response_of(&obs[0]).1["error"].as_str().unwrap().to_string();
        assert!(err.contains("no network in tests"));
    }

    #[tokio::test]
    async fn test_deadline_and_cancellation() {
        let reg = Arc::new(LocalRegistry::new());
        let mut slow = EchoAgent::new("slow");
        slow.delay_ms = 1500;
        reg.register(Arc::new(slow)).await.unwrap();
        let dispatcher = Dispatcher::new(reg, pool());

        let mut origin = AgentTask::root("root", "q");
        origin.timeout_seconds = Some(1);
        let out = dispatcher
            .dispatch(&[call("slow", "1")], &origin, &CancellationToken::new())
            .await
            .unwrap();
        let DispatchOutcome::Observations(obs) = out else {
            panic!("expected observations");
        };
        assert!(response_of(&obs[0]).1["error"].as_str().unwrap().contains("Timeout"));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = dispatcher
            .dispatch(&[call("slow", "1")], &AgentTask::root("r2", "q"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    #[tokio::test]
    async fn test_zero_timeout_means_no_deadline() {
        let reg = Arc::new(LocalRegistry::new());
        let mut agent = EchoAgent::new("A");
        agent.delay_ms = 50;
        reg.register(Arc::new(agent)).await.unwrap();
        let dispatcher = Dispatcher::new(reg, pool());

        let mut origin = AgentTask::root("root", "q");
        origin.timeout_seconds = Some(0);
        let out = dispatcher
            .dispatch(&[call("A", "1")], &origin, &CancellationToken::new())
            .await
            .unwrap();
        let DispatchOutcome::Observations(obs) = out else {
            panic!("expected observations");
        };
        assert!(response_of(&obs[0]).1.contains_key("output"));
    }

    /// 自身需要本地工具的子 Agent
    struct DelegatingAgent;

    #[async_trait]
    impl Agent for DelegatingAgent {
        async fn execute(&self, task: AgentTask) -> Result<AgentTask, AgentError> {
            let local = task.child(DEFAULT_LOCAL_TOOL_HANDLER, "read_file", vec![]);
            Err(AgentError::LocalToolRequired(Box::new(local)))
        }

        async fn describe(&self) -> Result<CapabilityMetadata, AgentError> {
            Ok(CapabilityMetadata {
                name: "delegator".into(),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_sub_agent_local_tool_request_propagates() {
        let reg = Arc::new(LocalRegistry::new());
        reg.register(Arc::new(DelegatingAgent)).await.unwrap();
        reg.register(Arc::new(EchoAgent::new("A"))).await.unwrap();
        let dispatcher = Dispatcher::new(reg, pool());

        let out = dispatcher
            .dispatch(&[call("A", "1"), call("delegator", "2")], &AgentTask::root("root", "q"), &CancellationToken::new())
            .await
            .unwrap();
        let DispatchOutcome::NeedsLocalTool(task) = out else {
            panic!("expected local tool signal");
        };
        assert_eq!(task.task_name, "read_file");
        assert_eq!(task.target_agent_id, DEFAULT_LOCAL_TOOL_HANDLER);
        assert_eq!(task.correlation_id, "root");
    }

    #[derive(Default)]
    struct CountingJournal {
        recorded: AtomicUsize,
    }

    #[async_trait]
    impl TaskJournal for CountingJournal {
        async fn record(&self, _task: &AgentTask) -> Result<(), AgentError> {
            self.recorded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_child_tasks_are_journaled() {
        let reg = Arc::new(LocalRegistry::new());
        reg.register(Arc::new(EchoAgent::new("A"))).await.unwrap();
        let journal = Arc::new(CountingJournal::default());
        let dispatcher = Dispatcher::new(reg, pool())
            .with_journal(journal.clone())
            .with_local_tool_handler("tools");
        let out = dispatcher
            .dispatch(&[call("A", "1"), call("local", "2")], &AgentTask::root("r", "q"), &CancellationToken::new())
            .await
            .unwrap();
        match out {
            DispatchOutcome::NeedsLocalTool(t) => assert_eq!(t.target_agent_id, "tools"),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(journal.recorded.load(Ordering::SeqCst), 2);
    }
}
