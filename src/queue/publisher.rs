//! 结果发布：把出站结果序列化为 JSON 写入 results topic

use std::sync::Arc;

use serde::Serialize;

use crate::core::AgentError;
use crate::queue::MessagePublisher;

pub struct ResultPublisher {
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
}

impl ResultPublisher {
    pub fn new(publisher: Arc<dyn MessagePublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn publish<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), AgentError> {
        let bytes = serde_json::to_vec(value).map_err(|e| {
            tracing::error!(key, "failed to serialize result: {}", e);
            AgentError::from(e)
        })?;
        self.publisher
            .publish(&self.topic, key, bytes)
            .await
            .inspect_err(|e| tracing::error!(topic = %self.topic, key, "failed to publish result: {}", e))
    }
}
