//! Hive - 多 Agent 编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、编排终态、优雅关闭
//! - **models**: 多模态内容、任务记录、进度日志
//! - **protocol**: Agent 间消息（AgentTask 等）及与领域模型的转换
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **rpc**: Agent 契约（execute / describe）、HTTP 传输、连接池
//! - **discovery**: 服务发现（TTL 租约）
//! - **registry**: 能力注册表（本地 / 分布式）
//! - **orchestrator**: ReAct 主循环、调用分发、进度上报
//! - **lineage**: 任务谱系存储与树重建
//! - **queue**: 消息队列传输与消费循环
//! - **store**: 任务记录持久化与提交
//! - **storage**: 对象存储
//! - **coordinator**: 入站任务 → 编排 → 结果发布

pub mod config;
pub mod coordinator;
pub mod core;
pub mod discovery;
pub mod lineage;
pub mod llm;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod rpc;
pub mod storage;
pub mod store;

pub use coordinator::{Coordinator, ProcessOutcome};
pub use core::{AgentError, TaskOutcome};
pub use orchestrator::ReactOrchestrator;
