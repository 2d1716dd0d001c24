//! 服务发现
//!
//! 键布局 `/services/{name}/{address}`，带 TTL 租约；注册方需持续续约，租约过期或撤销后条目消失。
//! InMemoryDiscovery 为进程内实现（可由配置预置静态服务），外部后端实现同一 trait 即可接入。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;

pub const SERVICE_PREFIX: &str = "/services/";

pub fn service_key(name: &str, address: &str) -> String {
    format!("{}{}/{}", SERVICE_PREFIX, name, address)
}

/// 注册返回的租约句柄：revoke 或 drop 时停止续约并撤销
pub struct LeaseHandle {
    cancel: CancellationToken,
    keepalive: Option<tokio::task::JoinHandle<()>>,
}

impl LeaseHandle {
    pub fn new(cancel: CancellationToken, keepalive: tokio::task::JoinHandle<()>) -> Self {
        Self {
            cancel,
            keepalive: Some(keepalive),
        }
    }

    /// 撤销租约并等待续约任务退出
    pub async fn revoke(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.keepalive.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for LeaseHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn register(
        &self,
        name: &str,
        address: &str,
        ttl: Duration,
    ) -> Result<LeaseHandle, AgentError>;

    /// 列出 prefix 下的存活服务：name -> 第一个地址
    async fn list_services(&self, prefix: &str) -> Result<HashMap<String, String>, AgentError>;
}

struct Lease {
    /// None 表示静态条目，永不过期
    expires_at: Option<Instant>,
}

#[derive(Default)]
pub struct InMemoryDiscovery {
    entries: Arc<RwLock<HashMap<String, Lease>>>,
}

impl InMemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置静态服务（name -> address）
    pub async fn with_static(services: &HashMap<String, String>) -> Self {
        let discovery = Self::new();
        {
            let mut entries = discovery.entries.write().await;
            for (name, address) in services {
                entries.insert(service_key(name, address), Lease { expires_at: None });
            }
        }
        discovery
    }
}

#[async_trait]
impl ServiceDiscovery for InMemoryDiscovery {
    async fn register(
        &self,
        name: &str,
        address: &str,
        ttl: Duration,
    ) -> Result<LeaseHandle, AgentError> {
        if ttl.is_zero() {
            return Err(AgentError::Discovery("lease ttl must be positive".into()));
        }
        let key = service_key(name, address);
        self.entries.write().await.insert(
            key.clone(),
            Lease {
                expires_at: Some(Instant::now() + ttl),
            },
        );
        tracing::info!(key = %key, ttl_secs = ttl.as_secs_f64(), "service registered");

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let entries = Arc::clone(&self.entries);
        let keepalive = tokio::spawn(async move {
            let mut ticker = tokio::time::interval((ttl / 3).max(Duration::from_millis(1)));
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        entries.write().await.remove(&key);
                        tracing::info!(key = %key, "lease revoked");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Some(lease) = entries.write().await.get_mut(&key) {
                            lease.expires_at = Some(Instant::now() + ttl);
                        }
                    }
                }
            }
        });
        Ok(LeaseHandle::new(cancel, keepalive))
    }

    async fn list_services(&self, prefix: &str) -> Result<HashMap<String, String>, AgentError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, lease| lease.expires_at.map_or(true, |t| t > now));

        let mut services = HashMap::new();
        let mut keys: Vec<&String> = entries.keys().filter(|k| k.starts_with(prefix)).collect();
        keys.sort();
        for key in keys {
            let rest = &key[SERVICE_PREFIX.len().min(key.len())..];
            if let Some((name, address)) = rest.split_once('/') {
                services
                    .entry(name.to_string())
                    .or_insert_with(|| address.to_string());
            }
        }
        Ok(services)
    }
}
