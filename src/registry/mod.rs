//! 能力注册表
//!
//! resolve(name) 返回能力对应的端点；返回 None 不是错误，表示该能力由本地工具处理。
//! 两种实现共用 [`CapabilityRegistry`]：本地表（启动时直接注册进程内 Agent）与分布式表（服务发现 + describe）。
//! 注册表以构造参数注入各组件，不存在进程级单例。

pub mod distributed;
pub mod local;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::protocol::CapabilityMetadata;
use crate::rpc::Agent;

pub use distributed::DistributedRegistry;
pub use local::LocalRegistry;

/// 解析结果：进程内 Agent，或远程地址（经连接池访问）
#[derive(Clone)]
pub enum Endpoint {
    InProcess(Arc<dyn Agent>),
    Remote(String),
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::InProcess(_) => write!(f, "Endpoint::InProcess"),
            Endpoint::Remote(addr) => write!(f, "Endpoint::Remote({})", addr),
        }
    }
}

#[async_trait]
pub trait CapabilityRegistry: Send + Sync {
    /// 只读缓存，不会同步刷新
    async fn resolve(&self, name: &str) -> Result<Option<Endpoint>, AgentError>;

    async fn all_metadata(&self) -> Vec<CapabilityMetadata>;

    async fn refresh(&self) -> Result<(), AgentError>;
}

/// 后台定期 refresh，失败只记日志
pub fn spawn_refresh_loop(
    registry: Arc<dyn CapabilityRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // 第一次 tick 立即返回，启动时已 refresh 过
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = registry.refresh().await {
                        tracing::warn!("registry refresh failed: {}", e);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingRegistry {
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl CapabilityRegistry for CountingRegistry {
        async fn resolve(&self, _name: &str) -> Result<Option<Endpoint>, AgentError> {
            Ok(None)
        }

        async fn all_metadata(&self) -> Vec<CapabilityMetadata> {
            vec![]
        }

        async fn refresh(&self) -> Result<(), AgentError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Err(AgentError::Discovery("backend down".into()))
        }
    }

    #[tokio::test]
    async fn test_refresh_loop_survives_errors_and_stops() {
        let registry = Arc::new(CountingRegistry::default());
        let cancel = CancellationToken::new();
        let handle = spawn_refresh_loop(registry.clone(), Duration::from_millis(10), cancel.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(registry.refreshes.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_endpoint_debug() {
        assert_eq!(
            format!("{:?}", Endpoint::Remote("a:1".into())),
            "Endpoint::Remote(a:1)"
        );
    }
}
