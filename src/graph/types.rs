//! 任务图类型定义
//!
//! Task 由 Planner 创建后不可变；TaskGraph 是 Planner 的输出、Scheduler 的输入。

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type TaskId = String;

/// 工作量档位，映射到固定时长估计（仅用于调度估计，不是真实执行上限）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    #[default]
    Medium,
    High,
}

impl Effort {
    /// 估计时长（毫秒）：LOW 500 / MEDIUM 1500 / HIGH 3000
    pub fn duration_ms(&self) -> u64 {
        match self {
            Effort::Low => 500,
            Effort::Medium => 1_500,
            Effort::High => 3_000,
        }
    }
}

/// 任务节点：一次 Executor 运行的工作单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// 图内唯一 ID
    pub id: TaskId,
    pub name: String,
    /// 交给 Executor 的自然语言指令
    pub description: String,
    /// 本任务可用的工具名；空集表示纯文本生成，不发工具调用
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub effort: Effort,
    /// 必须先完成的任务 ID
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: description.into(),
            tools: Vec::new(),
            effort: Effort::default(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_effort(mut self, effort: Effort) -> Self {
        self.effort = effort;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependencies = deps;
        self
    }
}

/// Planner 的输出：任务 DAG 与调度辅助信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    /// 原始自然语言目标
    pub goal: String,
    pub subtasks: Vec<Task>,
    /// 拓扑排序后的任务 ID
    pub execution_order: Vec<TaskId>,
    /// 依赖集相同的任务簇（数据模型计算，当前执行仍为顺序）
    pub parallel_groups: Vec<Vec<TaskId>>,
    /// 按 effort 时长加权的最长依赖链
    pub critical_path: Vec<TaskId>,
    pub rationale: String,
}

impl TaskGraph {
    pub fn task_count(&self) -> usize {
        self.subtasks.len()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.subtasks.iter().find(|t| t.id == id)
    }

    /// 关键路径总时长估计（毫秒）
    pub fn critical_path_ms(&self) -> u64 {
        self.critical_path
            .iter()
            .filter_map(|id| self.get(id))
            .map(|t| t.effort.duration_ms())
            .sum()
    }
}

/// 环处理策略：宽松（警告并丢弃闭环边）或严格（构建失败）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CyclePolicy {
    #[default]
    Lenient,
    Strict,
}

/// 图构建错误（仅严格模式下出现）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Cyclic dependency through task '{0}'")]
    Cycle(TaskId),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("Duplicate task id '{0}'")]
    DuplicateId(TaskId),
}
