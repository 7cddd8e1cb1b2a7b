//! LLM 分解（慢路径）
//!
//! 置信度不足时把目标连同低置信启发式提示交给 Provider，要求返回
//! {"subtasks": [...], "rationale": "..."}。从回复文本提取 JSON 用三段嵌套策略：
//! 代码围栏块 -> 花括号配平扫描 -> 贪婪括号正则，前一种解析不出才落到下一种。

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::config::{BackoffStrategy, PlannerSection};
use crate::core::AgentError;
use crate::graph::{Effort, Task};
use crate::llm::{CompletionRequest, LlmProvider, Message};

/// LLM 返回的原始子任务（字段全部可缺省，后续统一归一化）
#[derive(Debug, Clone, Deserialize)]
pub struct RawSubtask {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub effort: Option<Effort>,
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
}

/// LLM 分解结果
#[derive(Debug, Clone, Deserialize)]
pub struct LlmPlan {
    pub subtasks: Vec<RawSubtask>,
    #[serde(default)]
    pub rationale: Option<String>,
}

fn greedy_brace_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"))
}

/// 策略一：```json 围栏块
fn extract_fenced(text: &str) -> Option<String> {
    let start = text.find("```json").map(|i| i + 7).or_else(|| {
        text.find("```").map(|i| i + 3)
    })?;
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim().to_string())
}

/// 策略二：花括号配平扫描（跳过字符串字面量内的括号）
fn extract_balanced(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// 策略三：贪婪括号正则
fn extract_greedy(text: &str) -> Option<String> {
    greedy_brace_pattern()
        .find(text)
        .map(|m| m.as_str().to_string())
}

/// 三段嵌套提取：前一策略产出的候选解析失败才尝试下一策略
pub fn extract_plan(text: &str) -> Result<LlmPlan, AgentError> {
    let candidates = [
        extract_fenced(text),
        extract_balanced(text),
        extract_greedy(text),
    ];
    let mut last_err = None;
    for candidate in candidates.into_iter().flatten() {
        match serde_json::from_str::<LlmPlan>(&candidate) {
            Ok(plan) if !plan.subtasks.is_empty() => return Ok(plan),
            Ok(_) => last_err = Some("plan has no subtasks".to_string()),
            Err(e) => last_err = Some(e.to_string()),
        }
    }
    Err(AgentError::JsonParse(
        last_err.unwrap_or_else(|| "no JSON object found in response".to_string()),
    ))
}

/// 构造分解提示词：目标 + 可用工具 + 低置信启发式作为提示
pub fn decomposition_prompt(goal: &str, tool_names: &[String], hint: Option<&[Task]>) -> String {
    let tools = if tool_names.is_empty() {
        "(none)".to_string()
    } else {
        tool_names.join(", ")
    };
    let hint_block = match hint {
        Some(tasks) if !tasks.is_empty() => {
            let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
            format!(
                "\nA low-confidence heuristic suggested these steps: {}. Improve on them if they do not fit.\n",
                ids.join(" -> ")
            )
        }
        _ => String::new(),
    };
    format!(
        r#"Decompose the following goal into a dependency-ordered list of subtasks.

Goal: {goal}

Available tools: {tools}
{hint_block}
Respond with a single JSON object, no other text:
{{
  "subtasks": [
    {{
      "id": "snake_case_id",
      "name": "short name",
      "description": "instruction for the worker executing this subtask",
      "tools": ["tool_name"],
      "effort": "low" | "medium" | "high",
      "dependencies": ["ids of subtasks that must finish first"]
    }}
  ],
  "rationale": "one sentence on why this decomposition"
}}"#
    )
}

/// 按配置计算第 attempt 次重试前的退避时长（毫秒）
pub fn backoff_delay_ms(config: &PlannerSection, attempt: u32) -> u64 {
    match config.backoff {
        BackoffStrategy::Linear => config.backoff_base_ms * (attempt as u64 + 1),
        BackoffStrategy::Exponential => config.backoff_base_ms * (1u64 << attempt.min(10)),
    }
}

/// 调 Provider 分解目标；每次失败按配置退避后重试，最终失败返回错误由调用方降级
pub async fn decompose(
    provider: &dyn LlmProvider,
    config: &PlannerSection,
    goal: &str,
    tool_names: &[String],
    hint: Option<&[Task]>,
) -> Result<LlmPlan, AgentError> {
    let prompt = decomposition_prompt(goal, tool_names, hint);
    let mut last_err = AgentError::JsonParse("decomposition not attempted".to_string());

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = backoff_delay_ms(config, attempt - 1);
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        let request = CompletionRequest::new(vec![Message::user(prompt.clone())]);
        match provider.complete(request).await {
            Ok(response) => match extract_plan(&response.content) {
                Ok(plan) => return Ok(plan),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "LLM plan extraction failed");
                    last_err = e;
                }
            },
            Err(e) => {
                tracing::warn!(attempt, error = %e, "LLM decomposition call failed");
                last_err = AgentError::Llm(e);
            }
        }
    }
    Err(last_err)
}
