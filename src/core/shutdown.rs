//! 优雅关闭
//!
//! 统一的关闭信号（CancellationToken）贯穿消费循环、协调器、编排器与分发器；
//! 收到信号后按注册顺序执行清理：
//! - 等待后台任务（消费循环、刷新循环、连接淘汰、HTTP 服务）退出
//! - 撤销服务发现租约

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::discovery::LeaseHandle;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    /// 关闭信号 token
    shutdown_token: CancellationToken,
    /// 关闭原因广播
    reason_tx: broadcast::Sender<ShutdownReason>,
}

/// 关闭原因
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    /// 致命错误（如 Agent 服务端监听失败）
    FatalError(String),
}

impl ShutdownManager {
    /// 创建新的关闭管理器
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            shutdown_token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 关闭 token；各组件持有 clone 或 child_token
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 触发关闭
    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
    }

    /// 是否已触发关闭
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// 订阅关闭原因
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    /// 等待关闭信号
    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    /// 执行清理，返回清理是否成功
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：按注册顺序执行清理任务
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    /// 单个清理任务的超时（秒）
    timeout_secs: u64,
}

impl ShutdownCoordinator {
    /// 创建新的关闭协调器
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            cleanup_tasks: Vec::new(),
            timeout_secs: 5,
        }
    }

    /// 设置单个清理任务的超时时间
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// 注册清理任务
    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    /// 执行所有清理任务；单个失败或超时只记录日志
    pub async fn run_cleanup(&self) {
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());

        let timeout = tokio::time::Duration::from_secs(self.timeout_secs);

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    tracing::info!("Cleanup task '{}' completed successfully", name);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Cleanup task '{}' failed: {}", name, e);
                }
                Err(_) => {
                    tracing::warn!("Cleanup task '{}' timed out after {}s", name, self.timeout_secs);
                }
            }
        }

        tracing::info!("All cleanup tasks finished");
    }

    /// 获取关闭管理器
    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }
}

/// 等待后台任务在关闭信号后自行退出
#[derive(Default)]
pub struct BackgroundTasks {
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个后台任务，name 用于日志
    pub async fn push(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.handles.lock().await.push((name.into(), handle));
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for BackgroundTasks {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let handles = std::mem::take(&mut *self.handles.lock().await);
        let mut failed = Vec::new();
        for (name, handle) in handles {
            if let Err(e) = handle.await {
                tracing::warn!(task = %name, "background task ended abnormally: {}", e);
                failed.push(name);
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("background tasks failed: {}", failed.join(", ")))
        }
    }

    fn name(&self) -> &'static str {
        "BackgroundTasks"
    }
}

/// 撤销服务发现租约，使其他实例不再解析到本进程
pub struct LeaseCleanup {
    lease: Mutex<Option<LeaseHandle>>,
}

impl LeaseCleanup {
    pub fn new(lease: LeaseHandle) -> Self {
        Self {
            lease: Mutex::new(Some(lease)),
        }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for LeaseCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        if let Some(lease) = self.lease.lock().await.take() {
            lease.revoke().await;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DiscoveryLease"
    }
}

/// 运行主应用直到其结束或收到关闭信号，然后执行清理
pub async fn run_with_graceful_shutdown<F, Fut>(
    shutdown_manager: Arc<ShutdownManager>,
    app: F,
    cleanup: impl FnOnce() -> Fut,
) where
    F: Future<Output = ()>,
    Fut: Future<Output = ()>,
{
    shutdown_manager.install_signal_handlers();

    tokio::select! {
        _ = app => {
            tracing::info!("Application finished normally");
        }
        _ = shutdown_manager.wait_for_shutdown() => {
            tracing::info!("Shutdown signal received");
        }
    }

    cleanup().await;
}
