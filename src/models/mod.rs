//! 领域模型：多模态内容、任务记录、进度日志

pub mod content;
pub mod log_entry;
pub mod record;

pub use content::{
    Blob, CodeExecutionResult, Content, ExecutableCode, FileData, FunctionCall, FunctionResponse,
    Part, Role, VideoMetadata,
};
pub use log_entry::{TaskLogEntry, TaskLogStatus};
pub use record::{TaskRecord, TaskResultMessage, TaskStatus};
