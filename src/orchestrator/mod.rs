//! 编排层：ReAct 主循环、单轮调用分发、进度上报

pub mod dispatcher;
pub mod progress;
pub mod react;

pub use dispatcher::{DispatchOutcome, Dispatcher, DEFAULT_LOCAL_TOOL_HANDLER};
pub use progress::{ProgressReporter, ProgressSink, QueueProgressSink};
pub use react::{
    build_tool_prompt, ReactOrchestrator, TaskOrchestrator, DEFAULT_MAX_ITERATIONS, FINAL_TASK_NAME,
};
