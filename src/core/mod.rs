//! 核心：错误类型、编排终态、优雅关闭

pub mod error;
pub mod outcome;
pub mod shutdown;

pub use error::AgentError;
pub use outcome::TaskOutcome;
pub use shutdown::{
    run_with_graceful_shutdown, BackgroundTasks, LeaseCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
