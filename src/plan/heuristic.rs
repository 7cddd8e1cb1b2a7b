//! 启发式分解：每个类别一套固定子任务模板（快路径）
//!
//! 模板带预置依赖、工具名与 effort；置信度达到阈值时原样采用，
//! 否则作为提示交给 LLM 分解。

use crate::graph::{Effort, Task};
use crate::plan::classify::GoalCategory;

/// 类别对应的子任务模板
pub fn template_for(category: GoalCategory, goal: &str) -> Vec<Task> {
    match category {
        GoalCategory::Analyze => vec![
            Task::new("parse", format!("Parse the subject of: {goal}. Extract its structure and fields."))
                .with_tools(vec!["document_parser".to_string()]),
            Task::new("validate", "Validate the parsed fields against expected formats and ranges.")
                .with_dependencies(vec!["parse".to_string()]),
            Task::new("identify_errors", "Identify errors, anomalies and inconsistencies in the validated data.")
                .with_effort(Effort::High)
                .with_dependencies(vec!["validate".to_string()]),
            Task::new("generate_report", "Generate a concise findings report with the identified errors.")
                .with_dependencies(vec!["identify_errors".to_string()]),
        ],
        GoalCategory::Debug => vec![
            Task::new("reproduce", format!("Reproduce the reported problem: {goal}"))
                .with_tools(vec!["code_runner".to_string()]),
            Task::new("diagnose", "Diagnose the root cause from the reproduction output.")
                .with_effort(Effort::High)
                .with_dependencies(vec!["reproduce".to_string()]),
            Task::new("propose_fix", "Propose a minimal fix for the diagnosed root cause.")
                .with_dependencies(vec!["diagnose".to_string()]),
            Task::new("verify_fix", "Verify the proposed fix resolves the problem without regressions.")
                .with_tools(vec!["code_runner".to_string()])
                .with_dependencies(vec!["propose_fix".to_string()]),
        ],
        GoalCategory::Compliance => vec![
            Task::new("gather_requirements", format!("Gather the applicable requirements for: {goal}")),
            Task::new("map_controls", "Map current practices to each gathered requirement.")
                .with_dependencies(vec!["gather_requirements".to_string()]),
            Task::new("assess_gaps", "Assess gaps between requirements and current practices.")
                .with_effort(Effort::High)
                .with_dependencies(vec!["map_controls".to_string()]),
            Task::new("compile_findings", "Compile the compliance findings and recommendations.")
                .with_dependencies(vec!["assess_gaps".to_string()]),
        ],
        GoalCategory::Explain => vec![
            Task::new("research", format!("Collect the facts needed to answer: {goal}"))
                .with_tools(vec!["web_search".to_string()]),
            Task::new("synthesize_explanation", "Synthesize a clear, structured explanation from the collected facts.")
                .with_dependencies(vec!["research".to_string()]),
        ],
        GoalCategory::Compare => vec![
            Task::new("collect_options", format!("Collect the candidates and criteria for: {goal}"))
                .with_tools(vec!["web_search".to_string()]),
            Task::new("evaluate_criteria", "Evaluate each candidate against every criterion.")
                .with_effort(Effort::High)
                .with_dependencies(vec!["collect_options".to_string()]),
            Task::new("draw_conclusion", "Draw a reasoned conclusion with tradeoffs stated.")
                .with_dependencies(vec!["evaluate_criteria".to_string()]),
        ],
        GoalCategory::Weather => vec![
            Task::new("fetch_weather", format!("Fetch the weather data for: {goal}"))
                .with_tools(vec!["weather".to_string()])
                .with_effort(Effort::Low),
        ],
        GoalCategory::Search => vec![
            Task::new("web_search", format!("Search the web for: {goal}"))
                .with_tools(vec!["web_search".to_string()])
                .with_effort(Effort::Low),
            Task::new("summarize_findings", "Summarize the search results into a direct answer.")
                .with_dependencies(vec!["web_search".to_string()]),
        ],
    }
}
