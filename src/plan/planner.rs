//! Planner：自然语言目标 -> 任务图
//!
//! 快路径按关键词分类命中启发式模板；置信度不足且有 Provider 时走 LLM 分解；
//! LLM 失败降级回低置信模板，再不行退化为单任务兜底计划。宽松环策略下
//! plan 恒返回合法（可能退化的）任务图，不向调用方抛错。

use std::sync::Arc;

use crate::config::PlannerSection;
use crate::core::AgentError;
use crate::graph::{
    critical_path, parallel_groups, topo_sort, CyclePolicy, Task, TaskGraph,
};
use crate::llm::LlmProvider;
use crate::plan::classify::{classify, Classification};
use crate::plan::heuristic::template_for;
use crate::plan::llm::{decompose, RawSubtask};

pub struct Planner {
    provider: Option<Arc<dyn LlmProvider>>,
    config: PlannerSection,
}

impl Planner {
    pub fn new(provider: Option<Arc<dyn LlmProvider>>, config: PlannerSection) -> Self {
        Self { provider, config }
    }

    /// 生成任务图。仅严格环策略下可能返回 Err；宽松策略从不失败
    pub async fn plan(
        &self,
        goal: &str,
        tool_names: &[String],
        policy: CyclePolicy,
    ) -> Result<TaskGraph, AgentError> {
        let classification = classify(goal);
        let template: Option<Vec<Task>> =
            classification.map(|c| template_for(c.category, goal));

        // 快路径：置信度过阈值，模板原样使用
        if let (Some(c), Some(tasks)) = (classification, template.as_ref()) {
            if c.confidence >= self.config.confidence_threshold {
                tracing::info!(
                    category = ?c.category,
                    confidence = c.confidence,
                    tasks = tasks.len(),
                    "heuristic fast path"
                );
                return build_graph(goal, tasks.clone(), heuristic_rationale(&c), policy);
            }
        }

        // 慢路径：LLM 分解，低置信模板作为提示
        if let Some(provider) = &self.provider {
            match decompose(
                provider.as_ref(),
                &self.config,
                goal,
                tool_names,
                template.as_deref(),
            )
            .await
            {
                Ok(plan) => {
                    let tasks = normalize_subtasks(plan.subtasks);
                    if !tasks.is_empty() {
                        let rationale = plan
                            .rationale
                            .unwrap_or_else(|| "LLM decomposition".to_string());
                        return build_graph(goal, tasks, rationale, policy);
                    }
                    tracing::warn!("LLM decomposition returned no usable subtasks");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "LLM decomposition failed, degrading");
                }
            }
        }

        // 降级：低置信模板尚可用则用之，否则单任务兜底
        match (classification, template) {
            (Some(c), Some(tasks)) if !tasks.is_empty() => build_graph(
                goal,
                tasks,
                format!(
                    "degraded to low-confidence heuristic template ({:?}, confidence {:.2})",
                    c.category, c.confidence
                ),
                policy,
            ),
            _ => build_graph(
                goal,
                vec![fallback_task(goal)],
                "fallback single-task plan".to_string(),
                policy,
            ),
        }
    }

    /// 用校验反馈重新分解失败任务；保留原 id 与依赖，图结构不变
    pub async fn replan_task(
        &self,
        goal: &str,
        task: &Task,
        feedback: &str,
        tool_names: &[String],
    ) -> Task {
        if let Some(provider) = &self.provider {
            let replan_goal = format!(
                "Revise the step `{}` of goal: {goal}. \
                 The previous output failed validation: {feedback}",
                task.name
            );
            let hint = [task.clone()];
            match decompose(
                provider.as_ref(),
                &self.config,
                &replan_goal,
                tool_names,
                Some(&hint),
            )
            .await
            {
                Ok(plan) => {
                    if let Some(raw) = plan.subtasks.into_iter().next() {
                        let mut revised = task.clone();
                        if let Some(description) = raw.description.filter(|d| !d.is_empty()) {
                            revised.description = description;
                        }
                        if let Some(tools) = raw.tools {
                            revised.tools = tools;
                        }
                        if let Some(effort) = raw.effort {
                            revised.effort = effort;
                        }
                        return revised;
                    }
                }
                Err(e) => {
                    tracing::warn!(task = %task.id, error = %e, "replan decomposition failed");
                }
            }
        }

        // 无 Provider 或分解失败：确定性修订，把反馈折进指令
        let mut revised = task.clone();
        revised.description = format!(
            "{} (previous attempt failed validation: {feedback}; address these issues)",
            task.description
        );
        revised
    }
}

fn heuristic_rationale(c: &Classification) -> String {
    format!(
        "heuristic template for {:?} ({} keyword(s) matched, confidence {:.2})",
        c.category, c.matched, c.confidence
    )
}

fn fallback_task(goal: &str) -> Task {
    Task::new(
        "manual_analysis",
        format!("Carefully work through this request step by step: {goal}"),
    )
}

/// 归一化 LLM 原始子任务：补缺省 id/name/description，剔除指向未知任务的依赖
fn normalize_subtasks(raw: Vec<RawSubtask>) -> Vec<Task> {
    let mut tasks: Vec<Task> = Vec::with_capacity(raw.len());
    for (i, subtask) in raw.into_iter().enumerate() {
        let id = subtask
            .id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("task_{}", i + 1));
        let name = subtask
            .name
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| id.clone());
        let description = subtask
            .description
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| name.clone());
        let mut task = Task::new(id, description);
        task.name = name;
        task.tools = subtask.tools.unwrap_or_default();
        task.effort = subtask.effort.unwrap_or_default();
        task.dependencies = subtask.dependencies.unwrap_or_default();
        tasks.push(task);
    }

    // 依赖指向图外任务时丢弃该边并警告
    let ids: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
    for task in &mut tasks {
        task.dependencies.retain(|dep| {
            let known = ids.contains(dep);
            if !known {
                tracing::warn!(task = %task.id, dependency = %dep, "dropping unknown dependency");
            }
            known
        });
    }
    tasks
}

/// 拓扑排序 + 并行簇 + 关键路径，组装最终任务图
fn build_graph(
    goal: &str,
    tasks: Vec<Task>,
    rationale: String,
    policy: CyclePolicy,
) -> Result<TaskGraph, AgentError> {
    let execution_order = topo_sort(&tasks, policy)?;
    let parallel_groups = parallel_groups(&tasks, &execution_order);
    let critical_path = critical_path(&tasks, &execution_order);
    Ok(TaskGraph {
        goal: goal.to_string(),
        subtasks: tasks,
        execution_order,
        parallel_groups,
        critical_path,
        rationale,
    })
}
