//! 消息队列传输
//!
//! - **MessagePublisher**：按 topic + key 发布字节消息
//! - **MessageConsumer**：拉取 / 提交（at-least-once 语义由调用方的提交时机决定）
//! - **InMemoryBroker**：进程内实现，每个 topic 一条只追加日志，按消费组记录已提交偏移

pub mod consumer;
pub mod publisher;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::core::AgentError;

pub use consumer::{MessageHandler, TaskConsumer};
pub use publisher::ResultPublisher;

pub const TASKS_TOPIC: &str = "tasks";
pub const RESULTS_TOPIC: &str = "results";
pub const LOGS_TOPIC: &str = "agent_logs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub key: String,
    pub value: Vec<u8>,
    /// topic 内的位置，从 0 开始
    pub offset: u64,
}

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<(), AgentError>;
}

#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// 阻塞直到有下一条消息
    async fn fetch(&self) -> Result<QueueMessage, AgentError>;

    async fn commit(&self, message: &QueueMessage) -> Result<(), AgentError>;
}

#[derive(Default)]
struct TopicLog {
    messages: Vec<QueueMessage>,
    /// 消费组 -> 下一条待消费的偏移
    committed: HashMap<String, u64>,
}

#[derive(Default)]
struct BrokerState {
    topics: Mutex<HashMap<String, TopicLog>>,
    notify: Notify,
}

/// 进程内 broker；clone 共享同一份数据
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从该消费组已提交的位置开始消费
    pub async fn consumer(&self, topic: &str, group: &str) -> InMemoryConsumer {
        let start = {
            let topics = self.state.topics.lock().await;
            topics
                .get(topic)
                .and_then(|log| log.committed.get(group).copied())
                .unwrap_or(0)
        };
        InMemoryConsumer {
            state: Arc::clone(&self.state),
            topic: topic.to_string(),
            group: group.to_string(),
            position: Mutex::new(start),
        }
    }

    /// 某 topic 的全部消息（测试与演示用）
    pub async fn messages(&self, topic: &str) -> Vec<QueueMessage> {
        let topics = self.state.topics.lock().await;
        topics
            .get(topic)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    pub async fn committed_offset(&self, topic: &str, group: &str) -> Option<u64> {
        let topics = self.state.topics.lock().await;
        topics.get(topic).and_then(|log| log.committed.get(group).copied())
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<(), AgentError> {
        let mut topics = self.state.topics.lock().await;
        let log = topics.entry(topic.to_string()).or_default();
        let offset = log.messages.len() as u64;
        log.messages.push(QueueMessage {
            key: key.to_string(),
            value,
            offset,
        });
        drop(topics);
        self.state.notify.notify_waiters();
        tracing::debug!(topic, key, offset, "message published");
        Ok(())
    }
}

pub struct InMemoryConsumer {
    state: Arc<BrokerState>,
    topic: String,
    group: String,
    position: Mutex<u64>,
}

#[async_trait]
impl MessageConsumer for InMemoryConsumer {
    async fn fetch(&self) -> Result<QueueMessage, AgentError> {
        let mut position = self.position.lock().await;
        loop {
            // 先登记等待再检查，避免错过检查与等待之间的发布
            let notified = self.state.notify.notified();
            {
                let topics = self.state.topics.lock().await;
                if let Some(msg) = topics
                    .get(&self.topic)
                    .and_then(|log| log.messages.get(*position as usize))
                {
                    *position += 1;
                    return Ok(msg.clone());
                }
            }
            notified.await;
        }
    }

    async fn commit(&self, message: &QueueMessage) -> Result<(), AgentError> {
        let mut topics = self.state.topics.lock().await;
        let log = topics
            .get_mut(&self.topic)
            .ok_or_else(|| AgentError::Queue(format!("unknown topic: {}", self.topic)))?;
        if message.offset >= log.messages.len() as u64 {
            return Err(AgentError::Queue(format!(
                "offset {} out of range for topic {}",
                message.offset, self.topic
            )));
        }
        let next = message.offset + 1;
        let committed = log.committed.entry(self.group.clone()).or_insert(0);
        *committed = (*committed).max(next);
        Ok(())
    }
}
