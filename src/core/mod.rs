//! 核心编排层：错误分类与恢复、调度与主控入口

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod scheduler;

pub use error::AgentError;
pub use orchestrator::{create_provider_from_config, Orchestrator};
pub use recovery::{classify, ErrorCategory, RecoveryDecision, RecoveryEngine};
pub use scheduler::{ExecutionResult, RunMetrics, Scheduler, SubtaskRecord};
