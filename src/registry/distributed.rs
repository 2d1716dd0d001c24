//! 分布式注册表：服务发现 + 远程 describe
//!
//! refresh 列出所有存活服务，对尚未缓存的服务建立连接并拉取能力描述；
//! 单个服务失败只记日志并跳过。resolve 只查缓存。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::AgentError;
use crate::discovery::ServiceDiscovery;
use crate::protocol::CapabilityMetadata;
use crate::registry::{CapabilityRegistry, Endpoint};
use crate::rpc::ConnectionPool;

const AGENT_SUFFIX: &str = "_agent";

struct RemoteEntry {
    address: String,
    metadata: CapabilityMetadata,
}

#[derive(Default)]
struct Cache {
    /// 能力名 -> 条目
    entries: HashMap<String, RemoteEntry>,
    /// 已缓存的服务名，refresh 时跳过
    services: HashSet<String>,
}

pub struct DistributedRegistry {
    discovery: Arc<dyn ServiceDiscovery>,
    pool: Arc<ConnectionPool>,
    prefix: String,
    cache: RwLock<Cache>,
}

impl DistributedRegistry {
    pub fn new(
        discovery: Arc<dyn ServiceDiscovery>,
        pool: Arc<ConnectionPool>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            discovery,
            pool,
            prefix: prefix.into(),
            cache: RwLock::new(Cache::default()),
        }
    }

    async fn describe_service(&self, address: &str) -> Result<CapabilityMetadata, AgentError> {
        let agent = self.pool.get(address).await?;
        agent.describe().await
    }

    /// 已缓存的能力数
    pub async fn len(&self) -> usize {
        self.cache.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.entries.is_empty()
    }
}

/// 能力名：优先 describe 返回的 name，为空时用去掉 `_agent` 后缀的服务名
fn capability_name(service: &str, metadata: &CapabilityMetadata) -> String {
    if !metadata.name.is_empty() {
        return metadata.name.clone();
    }
    service
        .strip_suffix(AGENT_SUFFIX)
        .unwrap_or(service)
        .to_string()
}

#[async_trait]
impl CapabilityRegistry for DistributedRegistry {
    async fn resolve(&self, name: &str) -> Result<Option<Endpoint>, AgentError> {
        Ok(self
            .cache
            .read()
            .await
            .entries
            .get(name)
            .map(|e| Endpoint::Remote(e.address.clone())))
    }

    async fn all_metadata(&self) -> Vec<CapabilityMetadata> {
        let mut all: Vec<CapabilityMetadata> = self
            .cache
            .read()
            .await
            .entries
            .values()
            .map(|e| e.metadata.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    async fn refresh(&self) -> Result<(), AgentError> {
        let services = self.discovery.list_services(&self.prefix).await?;

        let pending: Vec<(String, String)> = {
            let cache = self.cache.read().await;
            services
                .into_iter()
                .filter(|(name, _)| !cache.services.contains(name))
                .collect()
        };

        // describe 在锁外完成，避免阻塞并发 resolve
        let mut fetched = Vec::new();
        for (service, address) in pending {
            match self.describe_service(&address).await {
                Ok(metadata) => fetched.push((service, address, metadata)),
                Err(e) => {
                    tracing::warn!(service = %service, address = %address, "skipping agent: {}", e);
                    self.pool.remove(&address).await;
                }
            }
        }

        if fetched.is_empty() {
            return Ok(());
        }
        let mut cache = self.cache.write().await;
        for (service, address, mut metadata) in fetched {
            let name = capability_name(&service, &metadata);
            metadata.name = name.clone();
            tracing::info!(name = %name, address = %address, "discovered remote agent");
            cache.services.insert(service);
            cache.entries.insert(name, RemoteEntry { address, metadata });
        }
        Ok(())
    }
}
