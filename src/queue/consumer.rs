//! 消费循环：fetch → handle → commit
//!
//! 处理失败只记日志；无论成败都会提交，传输层不会因处理失败而重投。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::queue::{MessageConsumer, QueueMessage};

const FETCH_RETRY_DELAY: Duration = Duration::from_millis(200);

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &QueueMessage, cancel: &CancellationToken) -> Result<(), AgentError>;
}

pub struct TaskConsumer {
    consumer: Arc<dyn MessageConsumer>,
    handler: Arc<dyn MessageHandler>,
}

impl TaskConsumer {
    pub fn new(consumer: Arc<dyn MessageConsumer>, handler: Arc<dyn MessageHandler>) -> Self {
        Self { consumer, handler }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("task consumer started");
        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                r = self.consumer.fetch() => r,
            };
            let message = match fetched {
                Ok(m) => m,
                Err(e) => {
                    if !cancel.is_cancelled() {
                        tracing::error!("failed to fetch message: {}", e);
                        tokio::time::sleep(FETCH_RETRY_DELAY).await;
                    }
                    continue;
                }
            };

            if let Err(e) = self.handler.handle(&message, &cancel).await {
                tracing::error!(key = %message.key, offset = message.offset, "error handling message: {}", e);
            }
            if let Err(e) = self.consumer.commit(&message).await {
                tracing::error!(key = %message.key, offset = message.offset, "failed to commit message: {}", e);
            }
        }
        tracing::info!("task consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryBroker, MessagePublisher, TASKS_TOPIC};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 奇数次失败，偶数次成功
    struct FlakyHandler {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for FlakyHandler {
        async fn handle(&self, _message: &QueueMessage, _cancel: &CancellationToken) -> Result<(), AgentError> {
            let n = self.seen.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                Err(AgentError::Decode("bad message".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_commits_even_when_handler_fails() {
        let broker = InMemoryBroker::new();
        for key in ["a", "b", "c"] {
            broker.publish(TASKS_TOPIC, key, vec![]).await.unwrap();
        }
        let handler = Arc::new(FlakyHandler {
            seen: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let consumer = TaskConsumer::new(
            Arc::new(broker.consumer(TASKS_TOPIC, "agents").await),
            handler.clone(),
        );
        let handle = consumer.spawn(cancel.clone());

        for _ in 0..100 {
            if broker.committed_offset(TASKS_TOPIC, "agents").await == Some(3) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(broker.committed_offset(TASKS_TOPIC, "agents").await, Some(3));
        assert_eq!(handler.seen.load(Ordering::SeqCst), 3);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
