//! 远程 Agent 连接池
//!
//! 按端点地址缓存已建立的客户端：首次使用时惰性连接，之后复用；
//! 超过 idle_timeout 未使用的条目由 evict_idle（或后台 evictor）移除。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::rpc::Agent;

/// 根据地址建立到远程 Agent 的连接
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Agent>, AgentError>;
}

struct PooledAgent {
    agent: Arc<dyn Agent>,
    last_used: Instant,
}

pub struct ConnectionPool {
    connector: Arc<dyn AgentConnector>,
    entries: Mutex<HashMap<String, PooledAgent>>,
    idle_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn AgentConnector>, idle_timeout: Duration) -> Self {
        Self {
            connector,
            entries: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// 取连接：命中则刷新使用时间，否则新建并放入池中
    pub async fn get(&self, address: &str) -> Result<Arc<dyn Agent>, AgentError> {
        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(address) {
                entry.last_used = Instant::now();
                return Ok(entry.agent.clone());
            }
        }

        // 连接在锁外建立；并发建立同一地址时保留先写入的那个
        let agent = self.connector.connect(address).await?;
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(address.to_string())
            .or_insert_with(|| PooledAgent {
                agent,
                last_used: Instant::now(),
            });
        entry.last_used = Instant::now();
        tracing::debug!(address, "pooled new agent connection");
        Ok(entry.agent.clone())
    }

    /// 移除空闲连接，返回移除数量
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.last_used) < self.idle_timeout);
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::info!("Evicted {} idle agent connections", evicted);
        }
        evicted
    }

    pub async fn remove(&self, address: &str) {
        self.entries.lock().await.remove(address);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// 后台定期清理，直到 cancel
    pub fn spawn_evictor(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        pool.evict_idle().await;
                    }
                }
            }
        })
    }
}
