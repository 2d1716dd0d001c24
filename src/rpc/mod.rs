//! Agent 间调用契约与传输
//!
//! 每个 Agent（包括编排器自身）都实现 execute / describe；远程 Agent 通过 HTTP/JSON 访问，
//! 连接按端点地址池化复用。

pub mod http;
pub mod pool;
#[cfg(feature = "server")]
pub mod server;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::protocol::{AgentTask, CapabilityMetadata};

pub use http::{HttpAgentClient, HttpConnector};
pub use pool::{AgentConnector, ConnectionPool};
#[cfg(feature = "server")]
pub use server::{router, serve};

/// Agent 契约：执行任务、描述能力
#[async_trait]
pub trait Agent: Send + Sync {
    async fn execute(&self, task: AgentTask) -> Result<AgentTask, AgentError>;

    async fn describe(&self) -> Result<CapabilityMetadata, AgentError>;
}
