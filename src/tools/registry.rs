//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / input_schema / execute），由 ToolRegistry
//! 按名注册与查找。注册阶段逐个通过契约校验（整批先校验后插入，避免部分注册）；
//! freeze() 结束注册阶段，之后注册表只读，可安全地通过 Arc 并发共享。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::contract::{self, ContractError, ToolSpec};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（小写蛇形，用于调用中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能，10-500 字符）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（object 类型）
    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；失败返回 Err(原因)，由执行器转为失败的 ToolResult
    async fn execute(&self, args: Value) -> Result<Value, String>;
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    module: String,
}

/// 列表过滤条件
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub module: Option<String>,
}

/// 工具注册表：写一次（注册阶段）、读多次（执行阶段）
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    frozen: bool,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册单个工具；定义非法、重名或已冻结时返回错误
    pub fn register(
        &mut self,
        tool: impl Tool + 'static,
        module: &str,
    ) -> Result<(), ContractError> {
        self.register_arc(Arc::new(tool), module)
    }

    fn register_arc(&mut self, tool: Arc<dyn Tool>, module: &str) -> Result<(), ContractError> {
        if self.frozen {
            return Err(ContractError::RegistryFrozen(tool.name().to_string()));
        }
        contract::validate_definition(tool.as_ref())?;
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ContractError::DuplicateTool(name));
        }
        tracing::debug!(tool = %name, module, "registered tool");
        self.tools.insert(
            name,
            RegisteredTool {
                tool,
                module: module.to_string(),
            },
        );
        Ok(())
    }

    /// 整批注册：先校验全部定义，再插入；任一非法则整批失败，不产生部分注册
    pub fn register_all(
        &mut self,
        tools: Vec<Arc<dyn Tool>>,
        module: &str,
    ) -> Result<(), ContractError> {
        if self.frozen {
            let first = tools.first().map(|t| t.name().to_string()).unwrap_or_default();
            return Err(ContractError::RegistryFrozen(first));
        }
        let mut seen: Vec<&str> = Vec::with_capacity(tools.len());
        for tool in &tools {
            contract::validate_definition(tool.as_ref())?;
            let name = tool.name();
            if self.tools.contains_key(name) || seen.contains(&name) {
                return Err(ContractError::DuplicateTool(name.to_string()));
            }
            seen.push(name);
        }
        for tool in tools {
            let name = tool.name().to_string();
            self.tools.insert(
                name,
                RegisteredTool {
                    tool,
                    module: module.to_string(),
                },
            );
        }
        Ok(())
    }

    /// 结束注册阶段；之后 register 返回 RegistryFrozen
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|r| r.tool.clone())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 工具的参数 schema；未注册时返回 None
    pub fn schema_of(&self, name: &str) -> Option<Value> {
        self.tools.get(name).map(|r| r.tool.input_schema())
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 按过滤条件列出 (name, module)
    pub fn list(&self, filter: &ListFilter) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .tools
            .iter()
            .filter(|(_, r)| {
                filter
                    .module
                    .as_deref()
                    .map(|m| r.module == m)
                    .unwrap_or(true)
            })
            .map(|(name, r)| (name.clone(), r.module.clone()))
            .collect();
        out.sort();
        out
    }

    /// 为指定工具名生成 ToolSpec 列表（供 LLM 请求）；未注册的名字记 warn 并跳过
    pub fn specs_for(&self, names: &[String]) -> Vec<ToolSpec> {
        names
            .iter()
            .filter_map(|name| match self.tools.get(name) {
                Some(r) => Some(ToolSpec {
                    name: name.clone(),
                    description: r.tool.description().to_string(),
                    input_schema: r.tool.input_schema(),
                }),
                None => {
                    tracing::warn!(tool = %name, "task references unregistered tool, skipping");
                    None
                }
            })
            .collect()
    }
}
