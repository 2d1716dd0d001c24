//! 本地注册表：启动时直接注册进程内 Agent，RwLock 保护（注册独占，查找共享）

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::AgentError;
use crate::protocol::CapabilityMetadata;
use crate::registry::{CapabilityRegistry, Endpoint};
use crate::rpc::Agent;

struct Entry {
    metadata: CapabilityMetadata,
    agent: Arc<dyn Agent>,
}

#[derive(Default)]
pub struct LocalRegistry {
    agents: RwLock<HashMap<String, Entry>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 describe 返回的名称注册；同名覆盖
    pub async fn register(&self, agent: Arc<dyn Agent>) -> Result<CapabilityMetadata, AgentError> {
        let metadata = agent.describe().await?;
        self.register_with(metadata.clone(), agent).await;
        Ok(metadata)
    }

    pub async fn register_with(&self, metadata: CapabilityMetadata, agent: Arc<dyn Agent>) {
        tracing::info!(name = %metadata.name, "local agent registered");
        self.agents
            .write()
            .await
            .insert(metadata.name.clone(), Entry { metadata, agent });
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.agents.write().await.remove(name).is_some()
    }
}

#[async_trait]
impl CapabilityRegistry for LocalRegistry {
    async fn resolve(&self, name: &str) -> Result<Option<Endpoint>, AgentError> {
        Ok(self
            .agents
            .read()
            .await
            .get(name)
            .map(|e| Endpoint::InProcess(e.agent.clone())))
    }

    async fn all_metadata(&self) -> Vec<CapabilityMetadata> {
        let mut all: Vec<CapabilityMetadata> = self
            .agents
            .read()
            .await
            .values()
            .map(|e| e.metadata.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// 本地表无外部来源
    async fn refresh(&self) -> Result<(), AgentError> {
        Ok(())
    }
}
