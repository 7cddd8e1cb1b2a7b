//! 工具契约：Tool Call / Tool Result 的结构校验
//!
//! 纯函数校验三类对象：工具定义（注册时）、工具调用（执行前）、工具结果（执行后）。
//! 参数校验仅做必填字段与浅层类型匹配，不做完整 JSON-Schema 校验。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::tools::Tool;

/// 工具名正则：小写蛇形，3-50 字符
fn name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]{2,49}$").expect("valid regex"))
}

/// 调用 ID 正则：call_ 前缀 + 字母数字下划线
fn call_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^call_[A-Za-z0-9_]+$").expect("valid regex"))
}

/// 契约违规错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContractError {
    #[error("Invalid tool name: {0}")]
    InvalidName(String),

    #[error("Invalid tool description for '{tool}': {reason}")]
    InvalidDescription { tool: String, reason: String },

    #[error("Invalid input schema for '{tool}': {reason}")]
    InvalidSchema { tool: String, reason: String },

    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("Registry is frozen, cannot register '{0}'")]
    RegistryFrozen(String),

    #[error("Invalid tool call: {0}")]
    InvalidCall(String),

    #[error("Invalid tool result: {0}")]
    InvalidResult(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Argument validation failed for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
}

/// LLM 发出的工具调用（UniversalTool 调用形状）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// 调用 ID，格式 call_<token>；非法或缺失时由 normalize_call_id 重新生成
    pub id: String,
    pub tool: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: fresh_call_id(),
            tool: tool.into(),
            arguments,
        }
    }
}

/// 工具执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// 对应 ToolCall 的 id
    pub id: String,
    pub tool: String,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolResult {
    /// 成功结果：result 必须是 JSON 可序列化值（Value 天然满足）
    pub fn ok(call: &ToolCall, result: Value, duration_ms: u64) -> Self {
        Self {
            id: call.id.clone(),
            tool: call.tool.clone(),
            success: true,
            result: Some(result),
            error: None,
            duration_ms,
        }
    }

    /// 失败结果：error 必须非空
    pub fn err(call: &ToolCall, error: impl Into<String>, duration_ms: u64) -> Self {
        let error = error.into();
        let error = if error.is_empty() {
            "unspecified tool error".to_string()
        } else {
            error
        };
        Self {
            id: call.id.clone(),
            tool: call.tool.clone(),
            success: false,
            result: None,
            error: Some(error),
            duration_ms,
        }
    }
}

/// 供 LLM 的工具描述（name / description / inputSchema）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// 生成新的调用 ID（uuid simple 形式，满足 call_[A-Za-z0-9_]+）
pub fn fresh_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// 规范化调用 ID：非法或缺失时替换为新生成的 ID，而不是拒绝
pub fn normalize_call_id(call: &mut ToolCall) {
    if !call_id_pattern().is_match(&call.id) {
        let old = std::mem::replace(&mut call.id, fresh_call_id());
        if !old.is_empty() {
            tracing::debug!(old = %old, new = %call.id, "normalized malformed call id");
        }
    }
}

/// 校验工具定义：名称模式、描述长度、schema 为 object 类型
pub fn validate_definition(tool: &dyn Tool) -> Result<(), ContractError> {
    let name = tool.name();
    if !name_pattern().is_match(name) {
        return Err(ContractError::InvalidName(name.to_string()));
    }
    let desc = tool.description();
    if desc.len() < 10 || desc.len() > 500 {
        return Err(ContractError::InvalidDescription {
            tool: name.to_string(),
            reason: format!("length {} outside 10..=500", desc.len()),
        });
    }
    let schema = tool.input_schema();
    let Some(obj) = schema.as_object() else {
        return Err(ContractError::InvalidSchema {
            tool: name.to_string(),
            reason: "schema is not a JSON object".to_string(),
        });
    };
    if obj.get("type").and_then(Value::as_str) != Some("object") {
        return Err(ContractError::InvalidSchema {
            tool: name.to_string(),
            reason: "schema type must be \"object\"".to_string(),
        });
    }
    Ok(())
}

/// 校验工具调用：id 模式、工具名模式、arguments 为非空非数组对象
pub fn validate_call(call: &ToolCall) -> Result<(), ContractError> {
    if !call_id_pattern().is_match(&call.id) {
        return Err(ContractError::InvalidCall(format!(
            "call id '{}' does not match call_[A-Za-z0-9_]+",
            call.id
        )));
    }
    if !name_pattern().is_match(&call.tool) {
        return Err(ContractError::InvalidCall(format!(
            "tool name '{}' is not lowercase snake_case",
            call.tool
        )));
    }
    if !call.arguments.is_object() {
        return Err(ContractError::InvalidCall(
            "arguments must be a non-null, non-array JSON object".to_string(),
        ));
    }
    Ok(())
}

/// 校验工具结果：success=false ⟺ error 非空；success=true ⟹ result 存在
pub fn validate_result(result: &ToolResult, call: &ToolCall) -> Result<(), ContractError> {
    if result.id != call.id || result.tool != call.tool {
        return Err(ContractError::InvalidResult(format!(
            "result id/tool ({}/{}) does not match call ({}/{})",
            result.id, result.tool, call.id, call.tool
        )));
    }
    match (result.success, &result.error) {
        (false, None) => {
            return Err(ContractError::InvalidResult(
                "failed result must carry a non-empty error".to_string(),
            ))
        }
        (false, Some(e)) if e.is_empty() => {
            return Err(ContractError::InvalidResult(
                "failed result must carry a non-empty error".to_string(),
            ))
        }
        (true, Some(_)) => {
            return Err(ContractError::InvalidResult(
                "successful result must not carry an error".to_string(),
            ))
        }
        _ => {}
    }
    if result.success && result.result.is_none() {
        return Err(ContractError::InvalidResult(
            "successful result must carry a result value".to_string(),
        ));
    }
    Ok(())
}

/// 浅层参数校验：必填字段存在 + 顶层类型匹配（string/number/boolean/array/object）
pub fn validate_arguments(
    tool: &str,
    args: &Value,
    schema: &Value,
) -> Result<(), ContractError> {
    let Some(args_obj) = args.as_object() else {
        return Err(ContractError::InvalidArguments {
            tool: tool.to_string(),
            reason: "arguments must be an object".to_string(),
        });
    };
    let empty = serde_json::Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !args_obj.contains_key(field) {
                return Err(ContractError::InvalidArguments {
                    tool: tool.to_string(),
                    reason: format!("missing required field '{field}'"),
                });
            }
        }
    }

    for (key, value) in args_obj {
        let Some(expected) = properties.get(key).and_then(|p| p.get("type")) else {
            continue;
        };
        let Some(expected) = expected.as_str() else {
            continue;
        };
        let matches = match expected {
            "string" => value.is_string(),
            "number" | "integer" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !matches {
            return Err(ContractError::InvalidArguments {
                tool: tool.to_string(),
                reason: format!("field '{key}' expected type {expected}"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fresh_call_id_matches_pattern() {
        let id = fresh_call_id();
        assert!(call_id_pattern().is_match(&id), "bad id: {id}");
    }

    #[test]
    fn test_normalize_keeps_valid_id() {
        let mut call = ToolCall {
            id: "call_abc123".to_string(),
            tool: "echo".to_string(),
            arguments: json!({}),
        };
        normalize_call_id(&mut call);
        assert_eq!(call.id, "call_abc123");
    }

    #[test]
    fn test_normalize_replaces_malformed_id() {
        let mut call = ToolCall {
            id: "tool-use-1".to_string(),
            tool: "echo".to_string(),
            arguments: json!({}),
        };
        normalize_call_id(&mut call);
        assert!(call.id.starts_with("call_"));
        assert_ne!(call.id, "tool-use-1");
    }

    #[test]
    fn test_validate_call_rejects_array_arguments() {
        let call = ToolCall {
            id: fresh_call_id(),
            tool: "echo".to_string(),
            arguments: json!([1, 2]),
        };
        assert!(validate_call(&call).is_err());
    }

    #[test]
    fn test_result_invariant_failure_requires_error() {
        let call = ToolCall::new("echo", json!({}));
        let mut result = ToolResult::err(&call, "boom", 5);
        assert!(validate_result(&result, &call).is_ok());

        result.error = None;
        assert!(validate_result(&result, &call).is_err());
    }

    #[test]
    fn test_result_invariant_success_requires_value() {
        let call = ToolCall::new("echo", json!({}));
        let ok = ToolResult::ok(&call, json!("hi"), 3);
        assert!(validate_result(&ok, &call).is_ok());

        let broken = ToolResult {
            result: None,
            ..ok.clone()
        };
        assert!(validate_result(&broken, &call).is_err());
    }

    #[test]
    fn test_result_must_match_call() {
        let call = ToolCall::new("echo", json!({}));
        let other = ToolCall::new("echo", json!({}));
        let result = ToolResult::ok(&other, json!(1), 1);
        assert!(validate_result(&result, &call).is_err());
    }

    #[test]
    fn test_validate_arguments_required_and_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "text": {"type": "string"},
                "count": {"type": "number"}
            },
            "required": ["text"]
        });
        assert!(validate_arguments("echo", &json!({"text": "hi"}), &schema).is_ok());
        assert!(validate_arguments("echo", &json!({"count": 3}), &schema).is_err());
        assert!(validate_arguments("echo", &json!({"text": 42}), &schema).is_err());
    }
}
