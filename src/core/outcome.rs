//! 编排终态
//!
//! NeedsLocalTool 是正常终态（请求本地工具继续处理），与 Final / Failed 区分，调用方需穷尽匹配。

use crate::core::AgentError;
use crate::protocol::AgentTask;

#[derive(Debug)]
pub enum TaskOutcome {
    /// 最终答案，地址指回调用方
    Final(AgentTask),
    /// 下一跳是本地工具，携带仅含该函数调用的任务
    NeedsLocalTool(AgentTask),
    Failed(AgentError),
}

impl TaskOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Final(_) => "final",
            TaskOutcome::NeedsLocalTool(_) => "needs_local_tool",
            TaskOutcome::Failed(_) => "failed",
        }
    }

    /// 转为 Agent 契约的返回值：NeedsLocalTool 以 [`AgentError::LocalToolRequired`] 携带，与 Final 可区分
    pub fn into_result(self) -> Result<AgentTask, AgentError> {
        match self {
            TaskOutcome::Final(t) => Ok(t),
            TaskOutcome::NeedsLocalTool(t) => Err(AgentError::LocalToolRequired(Box::new(t))),
            TaskOutcome::Failed(e) => Err(e),
        }
    }
}
