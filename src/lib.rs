//! Hive - 目标驱动的智能体任务执行核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排入口、Scheduler、错误分类与恢复
//! - **critic**: 任务产出的确定性校验流水线
//! - **graph**: 任务图类型与拓扑算法
//! - **llm**: LLM Provider 抽象与实现（OpenAI 兼容 / Mock）
//! - **plan**: 目标分类、启发式模板与 LLM 分解
//! - **react**: 进度事件与单任务有界 ReAct 循环
//! - **tools**: 工具契约、注册表与执行器

pub mod config;
pub mod core;
pub mod critic;
pub mod graph;
pub mod llm;
pub mod observability;
pub mod plan;
pub mod react;
pub mod tools;

pub use core::{ExecutionResult, Orchestrator};
pub use graph::{Task, TaskGraph};
