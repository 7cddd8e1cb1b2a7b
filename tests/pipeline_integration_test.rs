//! 端到端集成测试：规划 -> 调度 -> 执行 -> 校验全链路

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use hive::config::{AppConfig, SchedulerSection};
use hive::core::Orchestrator;
use hive::critic::Validators;
use hive::llm::MockProvider;
use hive::react::ProgressEvent;
use hive::tools::{EchoTool, ToolRegistry};

fn registry() -> Arc<ToolRegistry> {
    let mut reg = ToolRegistry::new();
    reg.register(EchoTool, "builtin").unwrap();
    reg.freeze();
    Arc::new(reg)
}

#[tokio::test]
async fn test_invoice_analysis_end_to_end() {
    let orchestrator = Orchestrator::new(
        Some(Arc::new(MockProvider::new())),
        registry(),
        &AppConfig::default(),
    )
    .unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let result = orchestrator
        .execute(
            "analyze this invoice for errors",
            &[],
            &Validators::none(),
            Some(&tx),
            &CancellationToken::new(),
        )
        .await;
    drop(tx);

    assert!(result.goal_completed);
    assert_eq!(result.metrics.tasks_run, 4);
    assert_eq!(result.metrics.tasks_completed, 4);
    assert_eq!(result.metrics.tasks_failed, 0);
    for id in ["parse", "validate", "identify_errors", "generate_report"] {
        assert!(result.subtask_results[id].success, "task {id} should succeed");
    }

    // 事件流首尾齐全：规划开始/完成，各任务开始/完成
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(ProgressEvent::PlanStarted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::PlanCompleted { task_count: 4, .. })));
    let completions = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::TaskCompleted { success: true, .. }))
        .count();
    assert_eq!(completions, 4);
}

#[tokio::test]
async fn test_chain_partial_failure_skips_downstream() {
    // 目标不可分类，走 LLM 分解得到 A -> B -> C 线性链；
    // B 的输出缺少 schema 要求的字段，replan 预算 0
    let provider = MockProvider::scripted(vec![
        MockProvider::text_response(
            r#"{"subtasks": [
                {"id": "a", "description": "step a"},
                {"id": "b", "description": "step b", "dependencies": ["a"]},
                {"id": "c", "description": "step c", "dependencies": ["b"]}
            ], "rationale": "linear chain"}"#,
        ),
        MockProvider::text_response(r#"{"step": "a", "status": "done"}"#),
        MockProvider::text_response(r#"{"step": "b"}"#),
        MockProvider::text_response(r#"{"step": "c", "status": "done"}"#),
    ]);
    let mut config = AppConfig::default();
    config.scheduler = SchedulerSection {
        max_replans: 0,
        ..SchedulerSection::default()
    };
    let orchestrator =
        Orchestrator::new(Some(Arc::new(provider)), registry(), &config).unwrap();

    let validators = Validators::none().with_schema(|output| match output.get("status") {
        Some(_) => Ok(()),
        None => Err(vec!["missing field `status`".to_string()]),
    });

    let result = orchestrator
        .execute(
            "qwfp zxcv asdf",
            &[],
            &validators,
            None,
            &CancellationToken::new(),
        )
        .await;

    assert!(!result.goal_completed);
    assert!(result.subtask_results["a"].success);
    assert!(!result.subtask_results["b"].success);
    assert_eq!(
        result.subtask_results["b"].error.as_deref(),
        Some("max replan attempts exceeded")
    );
    assert!(!result.subtask_results.contains_key("c"));
    assert!(result.metrics.tasks_failed >= 1);
}

#[tokio::test]
async fn test_tool_calls_are_accounted() {
    let provider = MockProvider::scripted(vec![
        // 规划：单任务，使用 echo 工具
        MockProvider::text_response(
            r#"{"subtasks": [{"id": "speak", "description": "echo a word", "tools": ["echo"]}]}"#,
        ),
        // 执行：一次工具调用后收尾
        MockProvider::tool_call_response("echo", json!({"text": "word"})),
        MockProvider::text_response("echoed"),
    ]);
    let orchestrator = Orchestrator::new(
        Some(Arc::new(provider)),
        registry(),
        &AppConfig::default(),
    )
    .unwrap();

    let result = orchestrator
        .execute(
            "qqqq zzzz unclassifiable",
            &[],
            &Validators::none(),
            None,
            &CancellationToken::new(),
        )
        .await;

    assert!(result.goal_completed);
    assert_eq!(result.metrics.tools_called, 1);
    let record = &result.subtask_results["speak"];
    assert_eq!(record.tool_calls.len(), record.tool_results.len());
    assert!(record.tool_results[0].success);
}
