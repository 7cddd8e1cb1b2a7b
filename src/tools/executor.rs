//! 工具执行器
//!
//! 持有 ToolRegistry 与超时，execute(call) 走完整契约流水线：
//! 调用校验 -> 注册表查找 -> 参数校验 -> 超时内执行 -> 结果校验。
//! 任何一步失败都转为 {success:false, error} 的 ToolResult，从不向上抛出；
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::tools::contract::{self, ToolCall, ToolResult};
use crate::tools::ToolRegistry;

/// 工具执行器：对每次调用施加超时，并把所有失败统一为失败结果
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// 执行一次工具调用；返回的 ToolResult 恒满足成功/失败不变量
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        let result = self.execute_inner(call).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let tool_result = match result {
            Ok(value) => ToolResult::ok(call, value, duration_ms),
            Err(reason) => ToolResult::err(call, reason, duration_ms),
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "call_id": call.id,
            "tool": call.tool,
            "ok": tool_result.success,
            "duration_ms": duration_ms,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        debug_assert!(contract::validate_result(&tool_result, call).is_ok());
        tool_result
    }

    async fn execute_inner(&self, call: &ToolCall) -> Result<serde_json::Value, String> {
        contract::validate_call(call).map_err(|e| e.to_string())?;

        let tool = self
            .registry
            .get(&call.tool)
            .ok_or_else(|| format!("Unknown tool: {}", call.tool))?;

        let schema = tool.input_schema();
        contract::validate_arguments(&call.tool, &call.arguments, &schema)
            .map_err(|e| e.to_string())?;

        match timeout(self.timeout, tool.execute(call.arguments.clone())).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("Tool execution failed: {e}")),
            Err(_) => Err(format!(
                "Tool timeout: {} exceeded {}s",
                call.tool,
                self.timeout.as_secs()
            )),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow_tool"
        }
        fn description(&self) -> &str {
            "sleeps longer than the executor timeout"
        }
        async fn execute(&self, _args: Value) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("late"))
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail_tool"
        }
        fn description(&self) -> &str {
            "always returns an execution error"
        }
        async fn execute(&self, _args: Value) -> Result<Value, String> {
            Err("deliberate failure".to_string())
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(crate::tools::EchoTool, "demo").unwrap();
        reg.register(FailTool, "demo").unwrap();
        reg.register(SlowTool, "demo").unwrap();
        reg.freeze();
        Arc::new(reg)
    }

    #[tokio::test]
    async fn test_execute_ok() {
        let exec = ToolExecutor::new(registry(), 1);
        let call = ToolCall::new("echo", json!({"text": "hi"}));
        let result = exec.execute(&call).await;
        assert!(result.success);
        assert_eq!(result.id, call.id);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failed_result() {
        let exec = ToolExecutor::new(registry(), 1);
        let call = ToolCall::new("ghost_tool", json!({}));
        let result = exec.execute(&call).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_execution_error_is_failed_result() {
        let exec = ToolExecutor::new(registry(), 1);
        let call = ToolCall::new("fail_tool", json!({}));
        let result = exec.execute(&call).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("deliberate failure"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_failed_result() {
        let exec = ToolExecutor::new(registry(), 1);
        let call = ToolCall::new("slow_tool", json!({}));
        let result = exec.execute(&call).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_bad_arguments_is_failed_result() {
        let exec = ToolExecutor::new(registry(), 1);
        let call = ToolCall::new("echo", json!({"text": 42}));
        let result = exec.execute(&call).await;
        assert!(!result.success);
    }
}
