//! 工具层：Tool trait、注册表（注册期校验 + freeze）、契约校验与带超时的执行器

pub mod contract;
pub mod echo;
pub mod executor;
pub mod registry;

pub use contract::{
    fresh_call_id, normalize_call_id, validate_arguments, validate_call, validate_definition,
    validate_result, ContractError, ToolCall, ToolResult, ToolSpec,
};
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use registry::{ListFilter, Tool, ToolRegistry};
