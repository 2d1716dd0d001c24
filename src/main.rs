//! Hive - 多 Agent 编排服务
//!
//! 入口：加载配置、初始化日志，装配队列 / 存储 / 注册表 / LLM / 编排器 / 协调器，
//! 提交命令行给出的任务文本，并运行直到收到关闭信号。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use hive::config::{load_config, AppConfig, StoreSection};
use hive::coordinator::{ContentProcessor, Coordinator};
use hive::core::{
    run_with_graceful_shutdown, AgentError, BackgroundTasks, ShutdownCoordinator, ShutdownManager,
};
use hive::discovery::{InMemoryDiscovery, ServiceDiscovery};
use hive::lineage::InMemoryTaskStore;
use hive::llm::create_llm_from_config;
use hive::models::{TaskResultMessage, TaskStatus};
use hive::observability;
use hive::orchestrator::{ProgressReporter, QueueProgressSink, ReactOrchestrator};
use hive::queue::{InMemoryBroker, MessageHandler, QueueMessage, ResultPublisher, TaskConsumer};
use hive::registry::{spawn_refresh_loop, CapabilityRegistry, DistributedRegistry, LocalRegistry};
use hive::rpc::{ConnectionPool, HttpConnector};
use hive::storage::LocalObjectStore;
use hive::store::{InMemoryTaskRecordStore, TaskRecordStore, TaskSubmitter, TaskUpdater};

const POOL_EVICT_INTERVAL: Duration = Duration::from_secs(60);

/// 打印 results topic 上的结果
struct ResultLogger;

#[async_trait]
impl MessageHandler for ResultLogger {
    async fn handle(&self, message: &QueueMessage, _cancel: &CancellationToken) -> Result<(), AgentError> {
        let result: TaskResultMessage = serde_json::from_slice(&message.value)?;
        match result.status {
            TaskStatus::Success => tracing::info!(
                task_id = %result.id,
                "task succeeded: {}",
                result.result.map(|v| v.to_string()).unwrap_or_default()
            ),
            _ => tracing::warn!(
                task_id = %result.id,
                "task failed: {}",
                result.error.unwrap_or_default()
            ),
        }
        Ok(())
    }
}

type RecordStores = (Arc<dyn TaskRecordStore>, Arc<dyn TaskUpdater>);

async fn open_record_store(cfg: &StoreSection) -> anyhow::Result<RecordStores> {
    #[cfg(feature = "async-sqlite")]
    if let Some(path) = &cfg.sqlite_path {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let store = Arc::new(
            hive::store::SqliteTaskStore::new(path)
                .await
                .context("Failed to open SQLite task store")?,
        );
        tracing::info!("Using SQLite task store at {}", path.display());
        return Ok((store.clone(), store));
    }

    #[cfg(not(feature = "async-sqlite"))]
    if cfg.sqlite_path.is_some() {
        tracing::warn!("store.sqlite_path is set but the async-sqlite feature is disabled; using in-memory store");
    }

    let store = Arc::new(InMemoryTaskRecordStore::new());
    Ok((store.clone(), store))
}

/// 本地模式：把配置中的静态服务逐个 describe 后登记
async fn build_local_registry(cfg: &AppConfig, pool: &Arc<ConnectionPool>) -> Arc<LocalRegistry> {
    let registry = Arc::new(LocalRegistry::new());
    for (service, address) in &cfg.discovery.services {
        let registered = match pool.get(address).await {
            Ok(agent) => registry.register(agent).await,
            Err(e) => Err(e),
        };
        match registered {
            Ok(meta) => tracing::info!(service = %service, capability = %meta.name, "registered remote agent"),
            Err(e) => tracing::warn!(service = %service, address = %address, "failed to register agent: {}", e),
        }
    }
    registry
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os("HIVE_CONFIG").map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    observability::init(&cfg.app.log_level);
    tracing::info!(app = %cfg.app.name, agent = %cfg.agent.name, "starting");

    let shutdown = Arc::new(ShutdownManager::new());
    let token = shutdown.token();
    let background = BackgroundTasks::new();
    let mut cleanup = ShutdownCoordinator::new(Arc::clone(&shutdown)).with_timeout(10);

    let broker = Arc::new(InMemoryBroker::new());
    let llm = create_llm_from_config(&cfg.llm).context("Failed to create LLM client")?;

    let connector = HttpConnector::new(cfg.pool.request_timeout_secs).context("Failed to create HTTP client")?;
    let pool = Arc::new(ConnectionPool::new(
        Arc::new(connector),
        Duration::from_secs(cfg.pool.idle_timeout_secs),
    ));
    background
        .push("pool-evictor", pool.spawn_evictor(POOL_EVICT_INTERVAL, token.clone()))
        .await;

    let discovery: Arc<dyn ServiceDiscovery> =
        Arc::new(InMemoryDiscovery::with_static(&cfg.discovery.services).await);
    let registry: Arc<dyn CapabilityRegistry> = if cfg.registry.is_distributed() {
        let registry = Arc::new(DistributedRegistry::new(
            discovery.clone(),
            Arc::clone(&pool),
            cfg.registry.service_prefix.clone(),
        ));
        if let Err(e) = registry.refresh().await {
            tracing::warn!("initial registry refresh failed: {}", e);
        }
        background
            .push(
                "registry-refresh",
                spawn_refresh_loop(
                    registry.clone(),
                    Duration::from_secs(cfg.registry.refresh_interval_secs.max(1)),
                    token.clone(),
                ),
            )
            .await;
        registry
    } else {
        build_local_registry(&cfg, &pool).await
    };
    tracing::info!(capabilities = registry.all_metadata().await.len(), "registry ready");

    let progress = ProgressReporter::new(Arc::new(QueueProgressSink::new(
        broker.clone(),
        cfg.queue.logs_topic.clone(),
    )));
    let mut orchestrator =
        ReactOrchestrator::new(llm, Arc::clone(&registry), Arc::clone(&pool), cfg.agent.metadata())
            .with_progress(progress)
            .with_max_iterations(cfg.agent.max_iterations)
            .with_local_tool_handler(cfg.agent.local_tool_handler.clone())
            .with_shutdown(token.clone());
    if cfg.store.journal {
        tracing::info!("in-memory task lineage journal enabled");
        orchestrator = orchestrator.with_journal(Arc::new(InMemoryTaskStore::new()));
    }
    let orchestrator = Arc::new(orchestrator);

    let (records, updater) = open_record_store(&cfg.store).await?;
    let objects = Arc::new(LocalObjectStore::new(cfg.storage.root.clone()));
    let coordinator = Coordinator::new(
        orchestrator.clone(),
        ResultPublisher::new(broker.clone(), cfg.queue.results_topic.clone()),
        updater.clone(),
        ContentProcessor::new(objects).with_bucket(cfg.storage.bucket.clone()),
    )
    .with_agent_name(cfg.agent.name.clone())
    .with_task_timeout(Some(cfg.agent.task_timeout_secs));

    let task_consumer = TaskConsumer::new(
        Arc::new(broker.consumer(&cfg.queue.tasks_topic, &cfg.queue.group_id).await),
        Arc::new(coordinator),
    );
    background.push("task-consumer", task_consumer.spawn(token.clone())).await;

    let result_consumer = TaskConsumer::new(
        Arc::new(broker.consumer(&cfg.queue.results_topic, "hive-cli").await),
        Arc::new(ResultLogger),
    );
    background.push("result-logger", result_consumer.spawn(token.clone())).await;

    #[cfg(feature = "server")]
    if cfg.server.enabled {
        let addr: std::net::SocketAddr = cfg
            .server
            .bind
            .parse()
            .with_context(|| format!("Invalid server.bind address: {}", cfg.server.bind))?;
        let agent: Arc<dyn hive::rpc::Agent> = orchestrator.clone();
        let server_token = token.clone();
        let manager = Arc::clone(&shutdown);
        background
            .push(
                "agent-server",
                tokio::spawn(async move {
                    if let Err(e) = hive::rpc::serve(agent, addr, server_token).await {
                        tracing::error!("agent server failed: {}", e);
                        manager.shutdown(hive::core::ShutdownReason::FatalError(e.to_string()));
                    }
                }),
            )
            .await;

        let lease = discovery
            .register(
                &format!("{}_agent", cfg.agent.name),
                &cfg.server.bind,
                Duration::from_secs(cfg.discovery.lease_ttl_secs.max(1)),
            )
            .await
            .context("Failed to register with service discovery")?;
        cleanup.register(hive::core::LeaseCleanup::new(lease));
    }
    #[cfg(not(feature = "server"))]
    if cfg.server.enabled {
        tracing::warn!("server.enabled is set but the server feature is disabled");
    }
    cleanup.register(background);

    let submitter = TaskSubmitter::new(records, updater, broker.clone(), cfg.queue.tasks_topic.clone());
    for text in std::env::args().skip(1) {
        let record = submitter
            .submit("cli", serde_json::json!({ "content": text }))
            .await
            .context("Failed to submit task")?;
        tracing::info!(task_id = %record.id, "submitted task from command line");
    }

    run_with_graceful_shutdown(
        Arc::clone(&shutdown),
        std::future::pending::<()>(),
        || async move { cleanup.run_cleanup().await },
    )
    .await;

    Ok(())
}
