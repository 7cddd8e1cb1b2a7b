//! Agent 错误类型
//!
//! 与 RecoveryEngine 配合：Scheduler 捕获任务级 AgentError 后交由恢复引擎分类并决策。

use thiserror::Error;

use crate::graph::GraphError;
use crate::llm::LlmError;
use crate::tools::ContractError;

/// 核心运行过程中可能出现的错误（Provider、解析、契约、图、取消）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Config error: {0}")]
    Config(String),

    /// 入口的唯一同步失败：既无 Provider 也无法降级
    #[error("No LLM provider configured")]
    NoProvider,

    #[error("Cancelled")]
    Cancelled,
}
