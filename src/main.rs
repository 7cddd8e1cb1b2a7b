//! Hive - 目标驱动的智能体任务执行核心
//!
//! 入口：初始化日志与配置，装配工具注册表与编排器，执行命令行给定的目标，
//! 进度事件实时打印，最后输出结构化运行摘要。

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use hive::config::load_config;
use hive::core::{create_provider_from_config, Orchestrator};
use hive::critic::Validators;
use hive::react::events::EventSender;
use hive::tools::{EchoTool, ToolRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config = load_config(None).context("Failed to load config")?;
    let provider = create_provider_from_config(&config);

    // 注册表在启动期一次写入，随后冻结为只读
    let mut registry = ToolRegistry::new();
    registry
        .register(EchoTool, "builtin")
        .context("Failed to register builtin tools")?;
    registry.freeze();
    let registry = Arc::new(registry);

    let orchestrator = Orchestrator::new(Some(provider), registry, &config)
        .context("Failed to assemble orchestrator")?;

    let goal = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let goal = if goal.trim().is_empty() {
        "analyze this invoice for errors".to_string()
    } else {
        goal
    };

    // 进度事件实时打印；通道关闭即退出
    let (tx, mut rx): (EventSender, _) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "event serialization failed"),
            }
        }
    });

    let cancel = CancellationToken::new();
    let result = orchestrator
        .execute(&goal, &[], &Validators::none(), Some(&tx), &cancel)
        .await;
    drop(tx);
    let _ = printer.await;

    println!();
    println!("goal: {}", result.goal);
    println!("completed: {}", result.goal_completed);
    println!(
        "tasks: {} run / {} completed / {} failed, {} tool call(s), {} replan(s)",
        result.metrics.tasks_run,
        result.metrics.tasks_completed,
        result.metrics.tasks_failed,
        result.metrics.tools_called,
        result.metrics.replans
    );
    println!("duration: {}ms", result.duration_ms);
    for line in &result.execution_trace {
        println!("  {line}");
    }
    if let Some(error) = &result.error {
        println!("error: {error}");
    }

    Ok(())
}
