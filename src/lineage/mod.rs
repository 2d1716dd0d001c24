//! 任务谱系：存储适配与树重建
//!
//! TaskStore 只需按 id 取任务、按父 id 取子任务；TaskJournal 供编排器在创建任务时记一笔。

pub mod tree;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::AgentError;
use crate::protocol::AgentTask;

pub use tree::{build_task_tree, TaskNode};

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_task(&self, task_id: &str) -> Result<Option<AgentTask>, AgentError>;

    async fn children_of(&self, parent_id: &str) -> Result<Vec<AgentTask>, AgentError>;
}

#[async_trait]
pub trait TaskJournal: Send + Sync {
    async fn record(&self, task: &AgentTask) -> Result<(), AgentError>;
}

/// 进程内谱系存储（保留插入顺序以便子任务按创建先后返回）
#[derive(Default)]
pub struct InMemoryTaskStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, AgentTask>,
    order: Vec<String>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, task: AgentTask) {
        let mut inner = self.inner.write().await;
        if !inner.tasks.contains_key(&task.task_id) {
            inner.order.push(task.task_id.clone());
        }
        inner.tasks.insert(task.task_id.clone(), task);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn get_task(&self, task_id: &str) -> Result<Option<AgentTask>, AgentError> {
        Ok(self.inner.read().await.tasks.get(task_id).cloned())
    }

    async fn children_of(&self, parent_id: &str) -> Result<Vec<AgentTask>, AgentError> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .filter(|t| !parent_id.is_empty() && t.parent_task_id == parent_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TaskJournal for InMemoryTaskStore {
    async fn record(&self, task: &AgentTask) -> Result<(), AgentError> {
        self.insert(task.clone()).await;
        Ok(())
    }
}
