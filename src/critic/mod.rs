//! Critic：任务产出的无状态确定性校验

pub mod pipeline;
pub mod types;

pub use pipeline::Critic;
pub use types::{
    Consistency, Hallucination, Recommendation, RuleReport, TestReport, ValidationContext,
    ValidationResult, Validators,
};
