//! ReAct 执行器：单任务的有界 Thought -> Action -> Observation 循环
//!
//! THOUGHT 调 Provider 流式完成（累积内容与工具调用增量，发增量事件，瞬时失败指数退避重试）；
//! ACTION 对每个工具调用走契约流水线（规范化 id、校验、查注册表、参数校验、带超时执行），
//! 任何失败都变成 {success:false, error} 的结果而不是抛出；OBSERVATION 把 assistant
//! 工具调用消息与每个结果的合成 tool 消息按序追加回对话。循环受 max_iterations 与
//! 单迭代墙钟超时约束；超时的 future 被直接丢弃。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::ExecutorSection;
use crate::core::AgentError;
use crate::graph::Task;
use crate::llm::{CompletionRequest, CompletionResponse, LlmProvider, Message, StreamEvent};
use crate::react::events::{now_ms, preview, send_event, EventSender, ProgressEvent};
use crate::tools::{normalize_call_id, ToolCall, ToolExecutor, ToolRegistry, ToolResult, ToolSpec};

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;
/// 思考内容预览最大字符数
const THOUGHT_PREVIEW_CHARS: usize = 400;
/// 同一工具在单任务内的调用次数告警阈值
const TOOL_FREQUENCY_WARN: u32 = 3;

/// 执行轨迹步类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Thought,
    Action,
    Observation,
    Timeout,
    Done,
}

/// 单条执行轨迹
#[derive(Debug, Clone, serde::Serialize)]
pub struct TraceStep {
    pub kind: StepKind,
    pub detail: String,
    pub ts: i64,
}

impl TraceStep {
    fn new(kind: StepKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            ts: now_ms(),
        }
    }
}

/// 单任务执行结果：工具调用与结果一一对应，轨迹完整
#[derive(Debug, Clone)]
pub struct TaskRunResult {
    pub success: bool,
    pub assistant_message: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub trace: Vec<TraceStep>,
    pub iterations: usize,
    pub max_iterations_reached: bool,
}

/// ReAct 执行器：持有 Provider、工具执行器与循环边界配置
pub struct TaskExecutor {
    provider: Arc<dyn LlmProvider>,
    tools: ToolExecutor,
    config: ExecutorSection,
}

impl TaskExecutor {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        config: ExecutorSection,
    ) -> Self {
        let tools = ToolExecutor::new(registry, config.tool_timeout_secs);
        Self {
            provider,
            tools,
            config,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// 驱动一个任务到终态；只有 Provider 重试耗尽或取消才向上返回 Err
    pub async fn run(
        &self,
        task: &Task,
        seed_messages: &[Message],
        events: Option<&EventSender>,
        cancel: &CancellationToken,
    ) -> Result<TaskRunResult, AgentError> {
        let mut messages: Vec<Message> = seed_messages.to_vec();
        messages.push(Message::user(task.description.clone()));

        // 空工具集 = 纯文本生成：不向 Provider 宣告工具，也不会发出任何调用
        let specs: Vec<ToolSpec> = if task.tools.is_empty() {
            Vec::new()
        } else {
            self.tools.registry().specs_for(&task.tools)
        };

        let mut all_calls: Vec<ToolCall> = Vec::new();
        let mut all_results: Vec<ToolResult> = Vec::new();
        let mut trace: Vec<TraceStep> = Vec::new();
        let mut frequency: HashMap<String, u32> = HashMap::new();
        let mut last_content = String::new();

        for step in 0..self.config.max_iterations {
            send_event(
                &events,
                ProgressEvent::StepUpdate {
                    ts: now_ms(),
                    task_id: task.id.clone(),
                    step,
                    max_steps: self.config.max_iterations,
                },
            );
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            // 单迭代墙钟截止：THOUGHT 与 ACTION 共用同一个 deadline
            let deadline =
                Instant::now() + Duration::from_millis(self.config.iteration_timeout_ms);

            // THOUGHT：整个阶段（含重试）压在迭代截止内，超时即丢弃 future
            send_event(
                &events,
                ProgressEvent::Thinking {
                    ts: now_ms(),
                    task_id: task.id.clone(),
                },
            );
            let thought = match timeout_at(deadline, self.thought(task, &messages, &specs, events))
                .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    trace.push(TraceStep::new(
                        StepKind::Timeout,
                        format!("iteration {step} exceeded {}ms", self.config.iteration_timeout_ms),
                    ));
                    return Ok(TaskRunResult {
                        success: false,
                        assistant_message: last_content,
                        tool_calls: all_calls,
                        tool_results: all_results,
                        trace,
                        iterations: step + 1,
                        max_iterations_reached: false,
                    });
                }
            };

            last_content = thought.content.clone();
            trace.push(TraceStep::new(
                StepKind::Thought,
                preview(&thought.content, THOUGHT_PREVIEW_CHARS),
            ));

            // 无工具任务：丢弃 Provider 违约返回的调用
            let mut calls = if task.tools.is_empty() {
                Vec::new()
            } else {
                thought.tool_calls
            };

            if calls.is_empty() {
                trace.push(TraceStep::new(StepKind::Done, "no tool calls, task complete"));
                messages.push(Message::assistant(thought.content.clone()));
                return Ok(TaskRunResult {
                    success: true,
                    assistant_message: thought.content,
                    tool_calls: all_calls,
                    tool_results: all_results,
                    trace,
                    iterations: step + 1,
                    max_iterations_reached: false,
                });
            }

            // ACTION：顺序执行每个调用；结果按发出顺序回填，保证确定性
            let mut round_results: Vec<ToolResult> = Vec::with_capacity(calls.len());
            for idx in 0..calls.len() {
                let call = &mut calls[idx];
                normalize_call_id(call);
                let count = frequency.entry(call.tool.clone()).or_insert(0);
                *count += 1;
                if *count > TOOL_FREQUENCY_WARN {
                    tracing::warn!(
                        task = %task.id,
                        tool = %call.tool,
                        count = *count,
                        "tool called repeatedly within one task"
                    );
                }
                send_event(
                    &events,
                    ProgressEvent::ToolCallStarted {
                        ts: now_ms(),
                        task_id: task.id.clone(),
                        call_id: call.id.clone(),
                        tool: call.tool.clone(),
                        arguments: call.arguments.clone(),
                    },
                );
                trace.push(TraceStep::new(
                    StepKind::Action,
                    format!("{} ({})", call.tool, call.id),
                ));

                // 工具执行同样压在迭代截止内；超时的调用不计入结果集
                let tool_name = call.tool.clone();
                let result = match timeout_at(deadline, self.tools.execute(call)).await {
                    Ok(result) => result,
                    Err(_) => {
                        trace.push(TraceStep::new(
                            StepKind::Timeout,
                            format!(
                                "iteration {step} exceeded {}ms during {tool_name}",
                                self.config.iteration_timeout_ms
                            ),
                        ));
                        calls.truncate(round_results.len());
                        all_calls.extend(calls);
                        all_results.extend(round_results);
                        return Ok(TaskRunResult {
                            success: false,
                            assistant_message: last_content,
                            tool_calls: all_calls,
                            tool_results: all_results,
                            trace,
                            iterations: step + 1,
                            max_iterations_reached: false,
                        });
                    }
                };
                send_event(
                    &events,
                    ProgressEvent::ToolResultReady {
                        ts: now_ms(),
                        task_id: task.id.clone(),
                        call_id: result.id.clone(),
                        tool: result.tool.clone(),
                        success: result.success,
                        preview: preview(&observation_text(&result), OBSERVATION_PREVIEW_CHARS),
                    },
                );
                round_results.push(result);
            }

            // OBSERVATION：assistant 工具调用消息 + 每个结果一条合成 tool 消息
            messages.push(Message::assistant_with_calls(
                thought.content.clone(),
                calls.clone(),
            ));
            for result in &round_results {
                let observation = observation_text(result);
                trace.push(TraceStep::new(
                    StepKind::Observation,
                    format!("{}: {}", result.tool, preview(&observation, OBSERVATION_PREVIEW_CHARS)),
                ));
                messages.push(Message::tool(result.id.clone(), observation));
            }

            all_calls.extend(calls);
            all_results.extend(round_results);
        }

        tracing::warn!(task = %task.id, max = self.config.max_iterations, "max iterations reached");
        Ok(TaskRunResult {
            success: true,
            assistant_message: last_content,
            tool_calls: all_calls,
            tool_results: all_results,
            trace,
            iterations: self.config.max_iterations,
            max_iterations_reached: true,
        })
    }

    /// THOUGHT 阶段：流式完成 + 指数退避重试；返回累积的完整响应
    async fn thought(
        &self,
        task: &Task,
        messages: &[Message],
        specs: &[ToolSpec],
        events: Option<&EventSender>,
    ) -> Result<CompletionResponse, AgentError> {
        let mut last_err: Option<AgentError> = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = 200u64 * (1 << (attempt - 1).min(8));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            let request =
                CompletionRequest::new(messages.to_vec()).with_tools(specs.to_vec());
            match self.provider.stream_complete(request).await {
                Ok(mut stream) => {
                    let mut failed = false;
                    let mut complete: Option<CompletionResponse> = None;
                    while let Some(event) = stream.next().await {
                        match event {
                            Ok(StreamEvent::ContentDelta { text }) => {
                                send_event(
                                    &events,
                                    ProgressEvent::ThinkingDelta {
                                        ts: now_ms(),
                                        task_id: task.id.clone(),
                                        text,
                                    },
                                );
                            }
                            Ok(StreamEvent::Complete { response }) => {
                                complete = Some(response);
                            }
                            Err(e) => {
                                tracing::warn!(attempt, error = %e, "stream failed mid-flight");
                                last_err = Some(AgentError::Llm(e));
                                failed = true;
                                break;
                            }
                        }
                    }
                    if failed {
                        continue;
                    }
                    match complete {
                        Some(response) => return Ok(response),
                        None => {
                            last_err = Some(AgentError::JsonParse(
                                "stream ended without a complete event".to_string(),
                            ));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "provider call failed");
                    last_err = Some(AgentError::Llm(e));
                }
            }
        }
        Err(last_err.unwrap_or(AgentError::NoProvider))
    }
}

/// 工具结果的观察文本：成功序列化 result，失败给出错误
fn observation_text(result: &ToolResult) -> String {
    if result.success {
        result
            .result
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "null".to_string())
    } else {
        format!(
            "Error: {}",
            result.error.as_deref().unwrap_or("unspecified tool error")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;
    use crate::tools::EchoTool;
    use serde_json::json;

    fn registry() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool, "demo").unwrap();
        reg.freeze();
        Arc::new(reg)
    }

    fn executor(provider: MockProvider) -> TaskExecutor {
        TaskExecutor::new(Arc::new(provider), registry(), ExecutorSection::default())
    }

    fn echo_task() -> Task {
        Task::new("t1", "do the thing").with_tools(vec!["echo".to_string()])
    }

    #[tokio::test]
    async fn test_terminates_after_one_iteration_without_tool_calls() {
        let exec = executor(MockProvider::new());
        let result = exec
            .run(&echo_task(), &[], None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.iterations, 1);
        assert!(!result.max_iterations_reached);
        assert!(result.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_always_tool_call_hits_iteration_cap() {
        let exec = executor(MockProvider::always_tool_call("echo", json!({"text": "again"})));
        let result = exec
            .run(&echo_task(), &[], None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.max_iterations_reached);
        assert_eq!(result.iterations, ExecutorSection::default().max_iterations);
        assert_eq!(result.tool_calls.len(), result.iterations);
    }

    #[tokio::test]
    async fn test_empty_tools_never_calls_tools() {
        // Provider 持续违约返回调用，空工具集任务仍不得发出任何调用
        let exec = executor(MockProvider::always_tool_call("echo", json!({"text": "x"})));
        let task = Task::new("plain", "just write a sentence");
        let result = exec
            .run(&task, &[], None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.tool_calls.is_empty());
        assert!(result.tool_results.is_empty());
        assert_eq!(result.iterations, 1);
    }

    #[tokio::test]
    async fn test_calls_and_results_cardinality() {
        let exec = executor(MockProvider::scripted(vec![
            MockProvider::tool_call_response("echo", json!({"text": "one"})),
            MockProvider::tool_call_response("echo", json!({"text": "two"})),
            MockProvider::text_response("all done"),
        ]));
        let result = exec
            .run(&echo_task(), &[], None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.tool_calls.len(), 2);
        assert_eq!(result.tool_results.len(), result.tool_calls.len());
        for (call, res) in result.tool_calls.iter().zip(&result.tool_results) {
            assert_eq!(call.id, res.id);
            assert_eq!(call.tool, res.tool);
        }
        assert_eq!(result.assistant_message, "all done");
    }

    #[tokio::test]
    async fn test_unknown_tool_call_becomes_failed_result() {
        let exec = executor(MockProvider::scripted(vec![
            MockProvider::tool_call_response("ghost_tool", json!({})),
            MockProvider::text_response("recovered"),
        ]));
        let task = Task::new("t", "use tools").with_tools(vec!["echo".to_string()]);
        let result = exec
            .run(&task, &[], None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.tool_results.len(), 1);
        assert!(!result.tool_results[0].success);
    }

    #[tokio::test]
    async fn test_provider_retry_then_success() {
        let provider = MockProvider::new().with_failures(1);
        let mut cfg = ExecutorSection::default();
        cfg.iteration_timeout_ms = 30_000;
        let exec = TaskExecutor::new(Arc::new(provider), registry(), cfg);
        let result = exec
            .run(&echo_task(), &[], None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_provider_exhaustion_propagates() {
        let provider = MockProvider::new().with_failures(10);
        let mut cfg = ExecutorSection::default();
        cfg.iteration_timeout_ms = 30_000;
        let exec = TaskExecutor::new(Arc::new(provider), registry(), cfg);
        let err = exec
            .run(&echo_task(), &[], None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Llm(_)));
    }

    struct SlowTool;

    #[async_trait::async_trait]
    impl crate::tools::Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Sleeps far past any reasonable deadline."
        }

        async fn execute(&self, _args: serde_json::Value) -> Result<serde_json::Value, String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!("late"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_execution_bounded_by_iteration_deadline() {
        let mut reg = ToolRegistry::new();
        reg.register(SlowTool, "demo").unwrap();
        reg.freeze();
        let provider = MockProvider::scripted(vec![
            MockProvider::tool_call_response("slow", json!({})),
            MockProvider::text_response("never reached"),
        ]);
        let exec = TaskExecutor::new(
            Arc::new(provider),
            Arc::new(reg),
            ExecutorSection::default(),
        );
        let task = Task::new("t", "call the slow tool").with_tools(vec!["slow".to_string()]);
        let result = exec
            .run(&task, &[], None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result
            .trace
            .iter()
            .any(|s| matches!(s.kind, StepKind::Timeout)));
        // 超时的调用不计入，调用与结果仍一一对应
        assert_eq!(result.tool_calls.len(), result.tool_results.len());
        assert!(result.tool_results.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation() {
        let exec = executor(MockProvider::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = exec.run(&echo_task(), &[], None, &cancel).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }
}
