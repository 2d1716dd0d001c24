//! 谱系树重建
//!
//! 先沿 parent_task_id 向上找到根，再自根深度优先展开子任务。
//! 两个方向都维护已访问集合，遇到重复 id 立即失败。

use std::collections::HashSet;

use futures_util::future::BoxFuture;
use serde::Serialize;

use crate::core::AgentError;
use crate::lineage::TaskStore;
use crate::protocol::AgentTask;

#[derive(Debug, Clone, Serialize)]
pub struct TaskNode {
    pub task: AgentTask,
    pub children: Vec<TaskNode>,
}

impl TaskNode {
    /// 节点总数（含自身）
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TaskNode::size).sum::<usize>()
    }
}

pub async fn build_task_tree(store: &dyn TaskStore, task_id: &str) -> Result<TaskNode, AgentError> {
    let root = find_root(store, task_id).await?;
    let mut visited = HashSet::new();
    expand(store, root, &mut visited).await
}

async fn find_root(store: &dyn TaskStore, task_id: &str) -> Result<AgentTask, AgentError> {
    let mut seen = HashSet::new();
    let mut current = fetch(store, task_id).await?;
    while !current.parent_task_id.is_empty() {
        if !seen.insert(current.task_id.clone()) {
            return Err(AgentError::LineageCycle(current.task_id));
        }
        current = fetch(store, &current.parent_task_id).await?;
    }
    Ok(current)
}

fn expand<'a>(
    store: &'a dyn TaskStore,
    task: AgentTask,
    visited: &'a mut HashSet<String>,
) -> BoxFuture<'a, Result<TaskNode, AgentError>> {
    Box::pin(async move {
        if !visited.insert(task.task_id.clone()) {
            return Err(AgentError::LineageCycle(task.task_id));
        }
        let children = store.children_of(&task.task_id).await?;
        let mut nodes = Vec::with_capacity(children.len());
        for child in children {
            nodes.push(expand(store, child, &mut *visited).await?);
        }
        Ok(TaskNode {
            task,
            children: nodes,
        })
    })
}

async fn fetch(store: &dyn TaskStore, task_id: &str) -> Result<AgentTask, AgentError> {
    store
        .get_task(task_id)
        .await?
        .ok_or_else(|| AgentError::TaskNotFound(task_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineage::InMemoryTaskStore;

    fn task(id: &str, parent: &str) -> AgentTask {
        let mut t = AgentTask::root(id, id);
        t.correlation_id = "corr".into();
        t.parent_task_id = parent.into();
        t
    }

    #[tokio::test]
    async fn test_tree_from_leaf() {
        let store = InMemoryTaskStore::new();
        store.insert(task("root", "")).await;
        store.insert(task("child1", "root")).await;
        store.insert(task("child2", "child1")).await;

        let tree = build_task_tree(&store, "child2").await.unwrap();
        assert_eq!(tree.task.task_id, "root");
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].task.task_id, "child1");
        assert_eq!(tree.children[0].children.len(), 1);
        assert_eq!(tree.children[0].children[0].task.task_id, "child2");
        assert!(tree.children[0].children[0].children.is_empty());
        assert_eq!(tree.size(), 3);
    }

    #[tokio::test]
    async fn test_siblings_and_missing() {
        let store = InMemoryTaskStore::new();
        store.insert(task("root", "")).await;
        store.insert(task("a", "root")).await;
        store.insert(task("b", "root")).await;
        store.insert(task("a1", "a")).await;

        let tree = build_task_tree(&store, "root").await.unwrap();
        let ids: Vec<&str> = tree.children.iter().map(|n| n.task.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(tree.size(), 4);

        store.insert(task("orphan", "ghost")).await;
        let err = build_task_tree(&store, "orphan").await.unwrap_err();
        assert!(matches!(err, AgentError::TaskNotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_parent_cycle_detected() {
        let store = InMemoryTaskStore::new();
        store.insert(task("x", "y")).await;
        store.insert(task("y", "x")).await;
        let err = build_task_tree(&store, "x").await.unwrap_err();
        assert!(matches!(err, AgentError::LineageCycle(_)));
    }

    /// 子任务查询返回祖先，形成向下的环
    struct LoopingStore;

    #[async_trait::async_trait]
    impl TaskStore for LoopingStore {
        async fn get_task(&self, task_id: &str) -> Result<Option<AgentTask>, AgentError> {
            Ok(Some(task(task_id, if task_id == "root" { "" } else { "root" })))
        }

        async fn children_of(&self, parent_id: &str) -> Result<Vec<AgentTask>, AgentError> {
            Ok(match parent_id {
                "root" => vec![task("kid", "root")],
                _ => vec![task("root", "kid")],
            })
        }
    }

    #[tokio::test]
    async fn test_child_cycle_detected() {
        let err = build_task_tree(&LoopingStore, "kid").await.unwrap_err();
        assert!(matches!(err, AgentError::LineageCycle(id) if id == "root"));
    }
}
