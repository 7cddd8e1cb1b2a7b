//! Planner 层：目标分类、启发式模板、LLM 分解与任务图构建

pub mod classify;
pub mod heuristic;
pub mod llm;
pub mod planner;

pub use classify::{classify, Classification, GoalCategory};
pub use planner::Planner;
