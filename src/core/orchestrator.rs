//! Orchestrator：目标执行的唯一入口
//!
//! 负责把 Provider、工具注册表与配置装配成 Planner / Executor / Critic /
//! Scheduler，对外暴露 execute(goal, history) -> ExecutionResult。缺 Provider
//! 是唯一同步报错的情形；execute 本身恒返回结构化结果，失败也带完整 trace。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::error::AgentError;
use crate::core::recovery::RecoveryEngine;
use crate::core::scheduler::{ExecutionResult, Scheduler};
use crate::critic::{Critic, Validators};
use crate::graph::CyclePolicy;
use crate::llm::{LlmProvider, Message, MockProvider, OpenAiProvider};
use crate::plan::Planner;
use crate::react::events::{now_ms, send_event, EventSender, ProgressEvent};
use crate::react::executor::TaskExecutor;
use crate::tools::ToolRegistry;

pub struct Orchestrator {
    planner: Arc<Planner>,
    scheduler: Scheduler,
    registry: Arc<ToolRegistry>,
    cycle_policy: CyclePolicy,
}

impl Orchestrator {
    /// 装配编排器；provider 缺席是唯一同步失败
    pub fn new(
        provider: Option<Arc<dyn LlmProvider>>,
        registry: Arc<ToolRegistry>,
        config: &AppConfig,
    ) -> Result<Self, AgentError> {
        let provider = provider.ok_or(AgentError::NoProvider)?;
        let planner = Arc::new(Planner::new(
            Some(provider.clone()),
            config.planner.clone(),
        ));
        let executor = TaskExecutor::new(provider, registry.clone(), config.executor.clone());
        let scheduler = Scheduler::new(
            executor,
            Critic::new(config.critic.clone()),
            planner.clone(),
            RecoveryEngine::new(config.recovery.clone()),
            config.scheduler.clone(),
        );
        let cycle_policy = if config.scheduler.strict_cycles {
            CyclePolicy::Strict
        } else {
            CyclePolicy::Lenient
        };
        Ok(Self {
            planner,
            scheduler,
            registry,
            cycle_policy,
        })
    }

    /// 执行一个目标：规划 -> 调度；恒返回结构化结果
    pub async fn execute(
        &self,
        goal: &str,
        history: &[Message],
        validators: &Validators,
        events: Option<&EventSender>,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let started = std::time::Instant::now();
        send_event(
            &events,
            ProgressEvent::PlanStarted {
                ts: now_ms(),
                goal: goal.to_string(),
            },
        );

        let graph = match self
            .planner
            .plan(goal, &self.registry.tool_names(), self.cycle_policy)
            .await
        {
            Ok(graph) => graph,
            Err(e) => {
                send_event(
                    &events,
                    ProgressEvent::Error {
                        ts: now_ms(),
                        text: e.to_string(),
                    },
                );
                return ExecutionResult::failed(
                    goal,
                    format!("planning failed: {e}"),
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        send_event(
            &events,
            ProgressEvent::PlanCompleted {
                ts: now_ms(),
                task_count: graph.task_count(),
                execution_order: graph.execution_order.clone(),
            },
        );
        tracing::info!(
            goal,
            tasks = graph.task_count(),
            rationale = %graph.rationale,
            "plan ready"
        );

        self.scheduler
            .run(&graph, history, validators, events, cancel)
            .await
    }
}

/// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）
pub fn create_provider_from_config(config: &AppConfig) -> Arc<dyn LlmProvider> {
    if std::env::var("OPENAI_API_KEY").is_ok() {
        tracing::info!(model = %config.llm.model, "using OpenAI-compatible provider");
        Arc::new(OpenAiProvider::new(
            config.llm.base_url.as_deref(),
            &config.llm.model,
            None,
        ))
    } else {
        tracing::warn!("OPENAI_API_KEY not set, falling back to mock provider");
        Arc::new(MockProvider::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    fn registry() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool, "demo").unwrap();
        reg.freeze();
        Arc::new(reg)
    }

    #[test]
    fn test_missing_provider_is_sync_error() {
        match Orchestrator::new(None, registry(), &AppConfig::default()) {
            Err(AgentError::NoProvider) => {}
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("construction without provider must fail"),
        }
    }

    #[tokio::test]
    async fn test_invoice_goal_end_to_end_with_mock() {
        let orchestrator = Orchestrator::new(
            Some(Arc::new(MockProvider::new())),
            registry(),
            &AppConfig::default(),
        )
        .unwrap();
        let result = orchestrator
            .execute(
                "analyze this invoice for errors",
                &[],
                &Validators::none(),
                None,
                &CancellationToken::new(),
            )
            .await;
        assert!(result.goal_completed);
        assert_eq!(result.metrics.tasks_run, 4);
        assert_eq!(result.metrics.tasks_completed, 4);
    }
}
