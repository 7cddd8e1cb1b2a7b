//! Critic 校验流水线
//!
//! 无状态、确定性的任务产出事后校验。阶段顺序固定：安全扫描（命中即
//! ESCALATE 短路）-> Schema（出错即 FIX 短路）-> 领域规则 -> 事实核查 ->
//! 一致性比对 -> 可选测试套件 -> 建议派生与打分。所有阶段只累积错误条目，
//! 从不向外抛出；同一输入两次调用结果逐位相同。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::config::CriticSection;
use crate::critic::types::{
    Consistency, Recommendation, ValidationContext, ValidationResult, Validators,
};

/// 幻觉置信度超过该值即触发 REPLAN
const HALLUCINATION_REPLAN_THRESHOLD: f64 = 0.7;

/// 注入风险模式：SQL 写动词、脚本标签、模板字面量
fn security_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(drop|truncate|alter)\s+(table|database)",
            r"delete\s+from",
            r"insert\s+into",
            r"<script",
            r"\$\{",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("invalid security pattern {p}: {e}")))
        .collect()
    })
}

/// Critic：持配置，validate 为纯同步计算
pub struct Critic {
    config: CriticSection,
}

impl Critic {
    pub fn new(config: CriticSection) -> Self {
        Self { config }
    }

    /// 校验一个任务输出，恒返回良构结果
    pub fn validate(
        &self,
        output: &Value,
        validators: &Validators,
        context: &ValidationContext,
    ) -> ValidationResult {
        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut reasoning: Vec<String> = Vec::new();

        // 1. 安全扫描：命中即短路，后续阶段不执行
        let lowered = output.to_string().to_lowercase();
        for pattern in security_patterns() {
            if pattern.is_match(&lowered) {
                let error = format!("security risk: output matches injection pattern `{pattern}`");
                tracing::warn!(pattern = %pattern, "critic security scan hit");
                return ValidationResult {
                    valid: false,
                    score: score(1, 0, &[], 0),
                    errors: vec![error],
                    warnings: Vec::new(),
                    hallucinations: Vec::new(),
                    consistency: Consistency::default(),
                    recommendation: Recommendation::Escalate,
                    reasoning: vec!["security scan failed, remaining checks skipped".to_string()],
                };
            }
        }

        // 2. Schema：出错即短路为 FIX；校验器自身 panic 转为错误条目继续
        if let Some(schema) = &validators.schema {
            match guarded("schema", || schema(output)) {
                Ok(Err(schema_errors)) => {
                    reasoning.push(format!(
                        "schema validation failed with {} error(s), remaining checks skipped",
                        schema_errors.len()
                    ));
                    let score = score(schema_errors.len(), 0, &[], 0);
                    return ValidationResult {
                        valid: false,
                        score,
                        errors: schema_errors,
                        warnings: Vec::new(),
                        hallucinations: Vec::new(),
                        consistency: Consistency::default(),
                        recommendation: Recommendation::Fix,
                        reasoning,
                    };
                }
                Ok(Ok(())) => reasoning.push("schema validation passed".to_string()),
                Err(panic_msg) => errors.push(panic_msg),
            }
        }

        // 3. 领域规则：只累积，不短路
        if let Some(rules) = &validators.rules {
            match guarded("rule", || rules(output)) {
                Ok(report) => {
                    if !report.errors.is_empty() || !report.warnings.is_empty() {
                        reasoning.push(format!(
                            "rule validation: {} error(s), {} warning(s)",
                            report.errors.len(),
                            report.warnings.len()
                        ));
                    }
                    errors.extend(report.errors);
                    warnings.extend(report.warnings);
                }
                Err(panic_msg) => errors.push(panic_msg),
            }
        }

        // 4. 事实核查
        let hallucinations = match &validators.fact_checker {
            Some(check) => match guarded("fact check", || check(output)) {
                Ok(claims) => claims,
                Err(panic_msg) => {
                    errors.push(panic_msg);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        if !hallucinations.is_empty() {
            reasoning.push(format!(
                "fact check flagged {} suspicious claim(s)",
                hallucinations.len()
            ));
        }

        // 5. 一致性：与先前输出的重叠键比对 + 期望字段比对
        let consistency = check_consistency(output, context, &mut reasoning);

        // 6. 测试套件：失败折算为告警
        if let Some(suite) = &validators.test_suite {
            match guarded("test suite", || suite(output)) {
                Ok(report) => {
                    if report.failed > 0 {
                        warnings.push(format!(
                            "{}/{} test(s) failed",
                            report.failed,
                            report.passed + report.failed
                        ));
                        for failure in report.failures {
                            warnings.push(format!("test failure: {failure}"));
                        }
                        reasoning.push("test suite reported failures".to_string());
                    }
                }
                Err(panic_msg) => errors.push(panic_msg),
            }
        }

        // 7. 建议派生，按固定优先级
        let recommendation = if errors.len() > self.config.max_errors {
            reasoning.push(format!(
                "error count {} exceeds limit {}",
                errors.len(),
                self.config.max_errors
            ));
            Recommendation::Escalate
        } else if hallucinations
            .iter()
            .any(|h| h.confidence > HALLUCINATION_REPLAN_THRESHOLD)
            || !consistency.consistent
        {
            Recommendation::Replan
        } else if !errors.is_empty() {
            Recommendation::Fix
        } else if self.config.strict_mode && !warnings.is_empty() {
            reasoning.push("strict mode treats warnings as actionable".to_string());
            Recommendation::Fix
        } else {
            Recommendation::Pass
        };

        let valid =
            errors.is_empty() && hallucinations.is_empty() && consistency.consistent;
        let score = score(
            errors.len(),
            warnings.len(),
            &hallucinations,
            consistency.issues.len(),
        );
        if reasoning.is_empty() {
            reasoning.push("all checks passed".to_string());
        }

        ValidationResult {
            valid,
            score,
            errors,
            warnings,
            hallucinations,
            consistency,
            recommendation,
            reasoning,
        }
    }
}

/// 运行外部提供的校验器并捕获其 panic，转为错误文本
fn guarded<T>(stage: &str, f: impl FnOnce() -> T) -> Result<T, String> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::warn!(stage, panic = %msg, "validator panicked");
        format!("{stage} validator panicked: {msg}")
    })
}

/// 扣分公式：1.0 - 0.15*错误 - 0.05*告警 - Σ(0.2*幻觉置信度) - 0.1*一致性问题，夹到 [0,1]
fn score(
    errors: usize,
    warnings: usize,
    hallucinations: &[crate::critic::types::Hallucination],
    issues: usize,
) -> f64 {
    let deduction = 0.15 * errors as f64
        + 0.05 * warnings as f64
        + hallucinations.iter().map(|h| 0.2 * h.confidence).sum::<f64>()
        + 0.1 * issues as f64;
    (1.0 - deduction).clamp(0.0, 1.0)
}

/// 一致性比对：先前输出重叠键取值冲突即矛盾；期望字段取值不符同样计为问题。
/// 字符串比较大小写不敏感，其余类型按相等比较。
fn check_consistency(
    output: &Value,
    context: &ValidationContext,
    reasoning: &mut Vec<String>,
) -> Consistency {
    let mut issues: Vec<String> = Vec::new();

    if let Value::Object(current) = output {
        for previous in &context.previous_outputs {
            let Value::Object(prev) = previous else {
                continue;
            };
            for (key, value) in current {
                if let Some(prev_value) = prev.get(key) {
                    if !values_match(value, prev_value) {
                        issues.push(format!(
                            "contradiction on `{key}`: current {value} vs previous {prev_value}"
                        ));
                    }
                }
            }
        }

        if let Some(expected) = &context.expected_fields {
            for (key, expected_value) in expected {
                match current.get(key) {
                    Some(actual) if values_match(actual, expected_value) => {}
                    Some(actual) => issues.push(format!(
                        "field `{key}` mismatch: expected {expected_value}, got {actual}"
                    )),
                    None => issues.push(format!("expected field `{key}` missing")),
                }
            }
        }
    }

    if !issues.is_empty() {
        reasoning.push(format!("consistency check found {} issue(s)", issues.len()));
    }
    Consistency {
        consistent: issues.is_empty(),
        issues,
    }
}

fn values_match(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.eq_ignore_ascii_case(y),
        _ => a == b,
    }
}
