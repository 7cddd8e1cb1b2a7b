//! Scheduler：按依赖序把任务图驱动到终态
//!
//! 对每个任务：依赖未满足即跳过（同趟不回补）；把已完成依赖的产出折进指令做
//! 上下文传递；经 Executor 执行、Critic 校验；校验失败在 replan 预算内把
//! Critic 反馈交回 Planner 重分解后重试，预算耗尽记 "max replan attempts
//! exceeded"；Executor 出错交 RecoveryEngine 定夺并记录。单任务失败不中断
//! 整趟运行，最终汇总指标与结构化结果。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerSection;
use crate::core::recovery::{RecoveryDecision, RecoveryEngine};
use crate::critic::{Critic, ValidationContext, ValidationResult, Validators};
use crate::graph::{topo_sort, CyclePolicy, Task, TaskGraph, TaskId};
use crate::llm::Message;
use crate::plan::Planner;
use crate::react::events::{now_ms, preview, send_event, EventSender, ProgressEvent};
use crate::react::executor::TaskExecutor;
use crate::tools::{ToolCall, ToolResult};

/// 单任务的汇总记录；被跳过的任务不出现在结果表中
#[derive(Debug, Clone)]
pub struct SubtaskRecord {
    pub success: bool,
    /// Critic 校验所用的输出值
    pub output: Value,
    /// 助手文本本身就是 JSON 对象（而非合成的 message 包装）
    pub structured: bool,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub assistant_message: String,
    pub validation: Option<ValidationResult>,
    pub error: Option<String>,
}

/// 整趟运行的累计指标
#[derive(Debug, Clone, Copy, Default)]
pub struct RunMetrics {
    pub tasks_run: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
    pub tools_called: usize,
    pub replans: u32,
}

/// Scheduler 输出：goal_completed 当且仅当无失败且至少完成一个任务
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub goal: String,
    pub goal_completed: bool,
    pub subtask_results: HashMap<TaskId, SubtaskRecord>,
    pub execution_trace: Vec<String>,
    pub metrics: RunMetrics,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl ExecutionResult {
    /// 构造失败终态（规划或图构建阶段即失败时使用）
    pub fn failed(goal: &str, error: impl Into<String>, duration_ms: u64) -> Self {
        let error = error.into();
        Self {
            goal: goal.to_string(),
            goal_completed: false,
            subtask_results: HashMap::new(),
            execution_trace: vec![format!("run aborted: {error}")],
            metrics: RunMetrics::default(),
            duration_ms,
            error: Some(error),
        }
    }
}

pub struct Scheduler {
    executor: TaskExecutor,
    critic: Critic,
    planner: Arc<Planner>,
    recovery: RecoveryEngine,
    config: SchedulerSection,
}

impl Scheduler {
    pub fn new(
        executor: TaskExecutor,
        critic: Critic,
        planner: Arc<Planner>,
        recovery: RecoveryEngine,
        config: SchedulerSection,
    ) -> Self {
        Self {
            executor,
            critic,
            planner,
            recovery,
            config,
        }
    }

    fn cycle_policy(&self) -> CyclePolicy {
        if self.config.strict_cycles {
            CyclePolicy::Strict
        } else {
            CyclePolicy::Lenient
        }
    }

    /// 执行整张任务图；恒返回结构化结果，不向外抛错
    pub async fn run(
        &self,
        graph: &TaskGraph,
        history: &[Message],
        validators: &Validators,
        events: Option<&EventSender>,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();

        // 以当前策略重排，防调用方手改过 execution_order
        let order = match topo_sort(&graph.subtasks, self.cycle_policy()) {
            Ok(order) => order,
            Err(e) => {
                return ExecutionResult::failed(
                    &graph.goal,
                    format!("graph build failed: {e}"),
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        let index: HashMap<&str, &Task> =
            graph.subtasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut completed: HashSet<TaskId> = HashSet::new();
        let mut records: HashMap<TaskId, SubtaskRecord> = HashMap::new();
        let mut trace: Vec<String> = Vec::new();
        let mut metrics = RunMetrics::default();
        let mut run_error: Option<String> = None;

        'walk: for task_id in &order {
            let Some(task) = index.get(task_id.as_str()).copied() else {
                continue;
            };

            // 依赖有过失败或被跳过的，本任务跳过且同趟不回补
            let unmet: Vec<&TaskId> = task
                .dependencies
                .iter()
                .filter(|d| !completed.contains(*d))
                .collect();
            if !unmet.is_empty() {
                let detail = unmet
                    .iter()
                    .map(|d| d.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                tracing::warn!(task = %task.id, unmet = %detail, "skipping task");
                trace.push(format!("skipped {}: unmet dependencies [{detail}]", task.id));
                continue;
            }

            send_event(
                &events,
                ProgressEvent::TaskStarted {
                    ts: now_ms(),
                    task_id: task.id.clone(),
                    name: task.name.clone(),
                },
            );
            metrics.tasks_run += 1;

            // 只把真正结构化的依赖输出交给一致性比对；纯文本的合成包装不参与
            let previous_outputs: Vec<Value> = task
                .dependencies
                .iter()
                .filter_map(|d| records.get(d))
                .filter(|r| r.structured)
                .map(|r| r.output.clone())
                .collect();

            // replan 在预算内重试同一个任务（修订版），不改图结构
            let mut current = with_context(task, &task.dependencies, &records);
            let record = loop {
                match self
                    .executor
                    .run(&current, history, events, cancel)
                    .await
                {
                    Ok(run) => {
                        metrics.tools_called += run.tool_calls.len();
                        let (output, structured) = parse_output(&run.assistant_message);
                        if !run.success {
                            trace.push(format!("{} failed: iteration timeout", task.id));
                            break SubtaskRecord {
                                success: false,
                                output,
                                structured,
                                tool_calls: run.tool_calls,
                                tool_results: run.tool_results,
                                assistant_message: run.assistant_message,
                                validation: None,
                                error: Some("iteration timeout".to_string()),
                            };
                        }

                        let context = ValidationContext {
                            previous_outputs: previous_outputs.clone(),
                            expected_fields: None,
                        };
                        let validation = self.critic.validate(&output, validators, &context);
                        if validation.valid {
                            trace.push(format!(
                                "{} completed (score {:.2})",
                                task.id, validation.score
                            ));
                            break SubtaskRecord {
                                success: true,
                                output,
                                structured,
                                tool_calls: run.tool_calls,
                                tool_results: run.tool_results,
                                assistant_message: run.assistant_message,
                                validation: Some(validation),
                                error: None,
                            };
                        }

                        send_event(
                            &events,
                            ProgressEvent::TaskValidationFailed {
                                ts: now_ms(),
                                task_id: task.id.clone(),
                                recommendation: validation.recommendation.to_string(),
                                score: validation.score,
                            },
                        );
                        let feedback = validation_feedback(&validation);

                        if metrics.replans < self.config.max_replans {
                            metrics.replans += 1;
                            trace.push(format!(
                                "{} validation failed ({}), replanning",
                                task.id, validation.recommendation
                            ));
                            send_event(
                                &events,
                                ProgressEvent::ReplanStarted {
                                    ts: now_ms(),
                                    task_id: task.id.clone(),
                                    reason: preview(&feedback, 200),
                                },
                            );
                            let revised = self
                                .planner
                                .replan_task(&graph.goal, task, &feedback, &task.tools)
                                .await;
                            current = with_context(&revised, &task.dependencies, &records);
                            continue;
                        }

                        trace.push(format!(
                            "{} failed: max replan attempts exceeded",
                            task.id
                        ));
                        break SubtaskRecord {
                            success: false,
                            output,
                            structured,
                            tool_calls: run.tool_calls,
                            tool_results: run.tool_results,
                            assistant_message: run.assistant_message,
                            validation: Some(validation),
                            error: Some("max replan attempts exceeded".to_string()),
                        };
                    }
                    Err(crate::core::AgentError::Cancelled) => {
                        run_error = Some("run cancelled".to_string());
                        trace.push(format!("{} cancelled", task.id));
                        metrics.tasks_failed += 1;
                        records.insert(
                            task.id.clone(),
                            failed_record("run cancelled".to_string()),
                        );
                        break 'walk;
                    }
                    Err(e) => {
                        let decision = self.recovery.decide(
                            &e.to_string(),
                            self.executor.provider_name(),
                            0,
                            started.elapsed().as_millis() as u64,
                            &[],
                        );
                        let (action, detail) = describe_decision(&decision);
                        tracing::warn!(task = %task.id, error = %e, action, "executor failed");
                        send_event(
                            &events,
                            ProgressEvent::Recovery {
                                ts: now_ms(),
                                task_id: task.id.clone(),
                                action: action.to_string(),
                                detail: detail.clone(),
                            },
                        );
                        trace.push(format!("{} failed: {e} (recovery: {action})", task.id));
                        break failed_record(e.to_string());
                    }
                }
            };

            let success = record.success;
            send_event(
                &events,
                ProgressEvent::TaskCompleted {
                    ts: now_ms(),
                    task_id: task.id.clone(),
                    success,
                },
            );
            if success {
                metrics.tasks_completed += 1;
                completed.insert(task.id.clone());
            } else {
                metrics.tasks_failed += 1;
            }
            records.insert(task.id.clone(), record);
        }

        let goal_completed = metrics.tasks_failed == 0 && metrics.tasks_completed > 0;
        ExecutionResult {
            goal: graph.goal.clone(),
            goal_completed,
            subtask_results: records,
            execution_trace: trace,
            metrics,
            duration_ms: started.elapsed().as_millis() as u64,
            error: run_error,
        }
    }
}

fn failed_record(error: String) -> SubtaskRecord {
    SubtaskRecord {
        success: false,
        output: Value::Null,
        structured: false,
        tool_calls: Vec::new(),
        tool_results: Vec::new(),
        assistant_message: String::new(),
        validation: None,
        error: Some(error),
    }
}

/// 把已完成依赖的助手文本与工具产出折进指令（简单上下文传递，非结构化记忆）
fn with_context(
    task: &Task,
    dependencies: &[TaskId],
    records: &HashMap<TaskId, SubtaskRecord>,
) -> Task {
    let mut lines: Vec<String> = Vec::new();
    for dep in dependencies {
        let Some(record) = records.get(dep) else {
            continue;
        };
        if !record.assistant_message.is_empty() {
            lines.push(format!(
                "- {dep}: {}",
                preview(&record.assistant_message, 300)
            ));
        }
        for result in record.tool_results.iter().filter(|r| r.success) {
            if let Some(value) = &result.result {
                lines.push(format!("- {dep}/{}: {}", result.tool, preview(&value.to_string(), 200)));
            }
        }
    }
    if lines.is_empty() {
        return task.clone();
    }
    let mut amended = task.clone();
    amended.description = format!(
        "{}\n\nContext from completed dependencies:\n{}",
        task.description,
        lines.join("\n")
    );
    amended
}

/// 助手文本是 JSON 对象就按结构化输出用，否则包一层 message 并标记为非结构化
fn parse_output(assistant_message: &str) -> (Value, bool) {
    match serde_json::from_str::<Value>(assistant_message.trim()) {
        Ok(v @ Value::Object(_)) => (v, true),
        _ => (serde_json::json!({ "message": assistant_message }), false),
    }
}

fn validation_feedback(validation: &ValidationResult) -> String {
    let mut parts: Vec<String> = validation.errors.clone();
    parts.extend(validation.consistency.issues.iter().cloned());
    parts.extend(validation.hallucinations.iter().map(|h| h.claim.clone()));
    if parts.is_empty() {
        parts.extend(validation.warnings.iter().cloned());
    }
    parts.join("; ")
}

fn describe_decision(decision: &RecoveryDecision) -> (&'static str, String) {
    match decision {
        RecoveryDecision::Retry { category, delay } => (
            "retry",
            format!("{category:?} retryable after {}ms", delay.as_millis()),
        ),
        RecoveryDecision::SwitchProvider { provider } => {
            ("switch_provider", format!("next provider: {provider}"))
        }
        RecoveryDecision::GracefulDegrade => {
            ("graceful_degrade", "fallback chain exhausted".to_string())
        }
        RecoveryDecision::Escalate { reason } => ("escalate", reason.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutorSection, PlannerSection, RecoverySection};
    use crate::config::{CriticSection, SchedulerSection};
    use crate::llm::MockProvider;
    use crate::tools::{EchoTool, ToolRegistry};

    fn registry() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool, "demo").unwrap();
        reg.freeze();
        Arc::new(reg)
    }

    fn scheduler_with(provider: MockProvider, config: SchedulerSection) -> Scheduler {
        let provider = Arc::new(provider);
        Scheduler::new(
            TaskExecutor::new(provider.clone(), registry(), ExecutorSection::default()),
            Critic::new(CriticSection::default()),
            Arc::new(Planner::new(None, PlannerSection::default())),
            RecoveryEngine::new(RecoverySection::default()),
            config,
        )
    }

    fn chain_graph() -> TaskGraph {
        let tasks = vec![
            Task::new("a", "step a"),
            Task::new("b", "step b").with_dependencies(vec!["a".to_string()]),
            Task::new("c", "step c").with_dependencies(vec!["b".to_string()]),
        ];
        TaskGraph {
            goal: "three step chain".to_string(),
            subtasks: tasks.clone(),
            execution_order: vec!["a".into(), "b".into(), "c".into()],
            parallel_groups: Vec::new(),
            critical_path: Vec::new(),
            rationale: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_happy_path_chain_completes() {
        let scheduler = scheduler_with(MockProvider::new(), SchedulerSection::default());
        let result = scheduler
            .run(
                &chain_graph(),
                &[],
                &Validators::none(),
                None,
                &CancellationToken::new(),
            )
            .await;
        assert!(result.goal_completed);
        assert_eq!(result.metrics.tasks_completed, 3);
        assert_eq!(result.metrics.tasks_failed, 0);
        assert!(result.subtask_results.values().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_partial_failure_skips_downstream() {
        // B 的输出带注入标记，Critic 安全扫描恒拒；replan 预算 0
        let scheduler = scheduler_with(
            MockProvider::scripted(vec![
                MockProvider::text_response("a is done"),
                MockProvider::text_response(r#"{"note": "\"; DROP TABLE users;\""}"#),
            ]),
            SchedulerSection {
                max_replans: 0,
                ..SchedulerSection::default()
            },
        );
        let result = scheduler
            .run(
                &chain_graph(),
                &[],
                &Validators::none(),
                None,
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.goal_completed);
        assert!(result.subtask_results["a"].success);
        assert!(!result.subtask_results["b"].success);
        assert!(!result.subtask_results.contains_key("c"));
        assert!(result.metrics.tasks_failed >= 1);
        assert!(result
            .execution_trace
            .iter()
            .any(|line| line.contains("skipped c")));
    }

    #[tokio::test]
    async fn test_replan_budget_message() {
        let validators = Validators::none()
            .with_schema(|_| Err(vec!["missing field `total`".to_string()]));
        let scheduler = scheduler_with(
            MockProvider::new(),
            SchedulerSection {
                max_replans: 1,
                ..SchedulerSection::default()
            },
        );
        let graph = TaskGraph {
            goal: "single".to_string(),
            subtasks: vec![Task::new("only", "do it")],
            execution_order: vec!["only".into()],
            parallel_groups: Vec::new(),
            critical_path: Vec::new(),
            rationale: "test".to_string(),
        };
        let result = scheduler
            .run(&graph, &[], &validators, None, &CancellationToken::new())
            .await;
        assert!(!result.goal_completed);
        assert_eq!(result.metrics.replans, 1);
        assert_eq!(
            result.subtask_results["only"].error.as_deref(),
            Some("max replan attempts exceeded")
        );
    }

    #[tokio::test]
    async fn test_provider_failure_records_recovery() {
        let scheduler = scheduler_with(
            MockProvider::new().with_failures(100),
            SchedulerSection::default(),
        );
        let graph = TaskGraph {
            goal: "single".to_string(),
            subtasks: vec![Task::new("only", "do it")],
            execution_order: vec!["only".into()],
            parallel_groups: Vec::new(),
            critical_path: Vec::new(),
            rationale: "test".to_string(),
        };
        let result = scheduler
            .run(
                &graph,
                &[],
                &Validators::none(),
                None,
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.goal_completed);
        assert_eq!(result.metrics.tasks_failed, 1);
        assert!(result
            .execution_trace
            .iter()
            .any(|line| line.contains("recovery")));
    }

    #[tokio::test]
    async fn test_context_propagation_amends_instruction() {
        let mut records = HashMap::new();
        records.insert(
            "a".to_string(),
            SubtaskRecord {
                success: true,
                output: serde_json::json!({"x": 1}),
                structured: true,
                tool_calls: Vec::new(),
                tool_results: Vec::new(),
                assistant_message: "alpha finding".to_string(),
                validation: None,
                error: None,
            },
        );
        let task = Task::new("b", "step b").with_dependencies(vec!["a".to_string()]);
        let amended = with_context(&task, &task.dependencies, &records);
        assert!(amended.description.contains("alpha finding"));
        assert!(amended.description.starts_with("step b"));
    }

    #[test]
    fn test_parse_output_object_vs_text() {
        let (value, structured) = parse_output(r#"{"k": 1}"#);
        assert!(structured);
        assert_eq!(value, serde_json::json!({"k": 1}));

        let (value, structured) = parse_output("just words");
        assert!(!structured);
        assert_eq!(value, serde_json::json!({"message": "just words"}));
    }
}
