//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=openai`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::protocol::CapabilityMetadata;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub registry: RegistrySection,
    pub discovery: DiscoverySection,
    pub pool: PoolSection,
    pub queue: QueueSection,
    pub storage: StorageSection,
    pub server: ServerSection,
    pub store: StoreSection,
}

/// [app] 段：应用名、日志级别（RUST_LOG 优先）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "hive".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// [agent] 段：本编排器对外发布的能力描述与循环参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub name: String,
    pub capability: String,
    pub input_description: String,
    pub output_description: String,
    /// 单任务最大 ReAct 迭代数
    pub max_iterations: usize,
    pub local_tool_handler: String,
    /// 根任务超时（秒），约束每个远程子调用；0 表示不限
    pub task_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: "planner".to_string(),
            capability: "Decomposes a task and delegates to specialist agents or local tools".to_string(),
            input_description: "A natural-language task".to_string(),
            output_description: "The final answer, possibly with generated files".to_string(),
            max_iterations: default_max_iterations(),
            local_tool_handler: "mcp_tool_handler".to_string(),
            task_timeout_secs: 0,
        }
    }
}

fn default_max_iterations() -> usize {
    10
}

impl AgentSection {
    pub fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata {
            name: self.name.clone(),
            capability: self.capability.clone(),
            input_description: self.input_description.clone(),
            output_description: self.output_description.clone(),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// mock / openai（deepseek 按 OpenAI 兼容协议处理）
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [registry] 段：local 为进程内注册，distributed 走服务发现
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub mode: String,
    pub service_prefix: String,
    pub refresh_interval_secs: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            mode: "local".to_string(),
            service_prefix: crate::discovery::SERVICE_PREFIX.to_string(),
            refresh_interval_secs: 30,
        }
    }
}

impl RegistrySection {
    pub fn is_distributed(&self) -> bool {
        self.mode.eq_ignore_ascii_case("distributed")
    }
}

/// [discovery] 段：租约 TTL 与静态服务表（名称 → 地址）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub lease_ttl_secs: u64,
    pub services: HashMap<String, String>,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            lease_ttl_secs: 10,
            services: HashMap::new(),
        }
    }
}

/// [pool] 段：远程 Agent 连接池
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub idle_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            request_timeout_secs: 120,
        }
    }
}

/// [queue] 段：topic 名称与消费组
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub tasks_topic: String,
    pub results_topic: String,
    pub logs_topic: String,
    pub group_id: String,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            tasks_topic: crate::queue::TASKS_TOPIC.to_string(),
            results_topic: crate::queue::RESULTS_TOPIC.to_string(),
            logs_topic: crate::queue::LOGS_TOPIC.to_string(),
            group_id: "agent-service".to_string(),
        }
    }
}

/// [storage] 段：对象存储 bucket 与本地根目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub bucket: String,
    pub root: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            bucket: crate::storage::DEFAULT_BUCKET.to_string(),
            root: PathBuf::from("./data/objects"),
        }
    }
}

/// [server] 段：对外暴露编排器（需 `server` feature）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:8700".to_string(),
        }
    }
}

/// [store] 段：任务记录存储（未设置 sqlite_path 时用内存存储）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StoreSection {
    pub sqlite_path: Option<PathBuf>,
    /// 是否在内存中记录任务谱系（只增不减，仅用于调试与短期运行）
    pub journal: bool,
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 10);
        assert_eq!(cfg.agent.local_tool_handler, "mcp_tool_handler");
        assert_eq!(cfg.queue.logs_topic, "agent_logs");
        assert_eq!(cfg.storage.bucket, "hive-agent-files");
        assert_eq!(cfg.registry.service_prefix, "/services/");
        assert!(!cfg.registry.is_distributed());
        assert_eq!(cfg.agent.metadata().name, "planner");
        assert!(!cfg.store.journal);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(
            &path,
            r#"
[agent]
name = "orchestrator"
max_iterations = 4

[registry]
mode = "distributed"

[discovery.services]
calculator_agent = "127.0.0.1:9001"

[store]
journal = true
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.agent.name, "orchestrator");
        assert_eq!(cfg.agent.max_iterations, 4);
        assert!(cfg.registry.is_distributed());
        assert_eq!(
            cfg.discovery.services.get("calculator_agent").map(String::as_str),
            Some("127.0.0.1:9001")
        );
        // 未出现的段落使用默认值
        assert_eq!(cfg.pool.idle_timeout_secs, 300);
        assert!(cfg.store.journal);
    }
}
