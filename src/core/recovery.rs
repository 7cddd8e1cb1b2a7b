//! 错误恢复引擎：失败分类与备援决策
//!
//! 按子串/错误码把任务级错误归入固定分类，再在重试预算、总时长预算与备援链约束下
//! 决定 Retry（指数退避 + 抖动）/ SwitchProvider / GracefulDegrade / Escalate。
//! 本组件从不向外抛错：自身内部失败一律降级为 Escalate。

use std::time::Duration;

use rand::Rng;

use crate::config::RecoverySection;

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Timeout,
    ConnectionError,
    DnsError,
    NetworkError,
    RateLimit,
    ServerError,
    ServiceUnavailable,
    AuthError,
    BadRequest,
    ToolError,
    ValidationError,
    JsonParseError,
    HallucinationDetected,
    UnknownError,
}

impl ErrorCategory {
    /// 可重试集合：瞬时性网络/服务端错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Timeout
                | ErrorCategory::ConnectionError
                | ErrorCategory::DnsError
                | ErrorCategory::NetworkError
                | ErrorCategory::RateLimit
                | ErrorCategory::ServerError
                | ErrorCategory::ServiceUnavailable
        )
    }
}

/// 子串/错误码分类；匹配不到任何模式归 UnknownError
pub fn classify(error: &str) -> ErrorCategory {
    let e = error.to_lowercase();
    if e.contains("timed out") || e.contains("timeout") {
        ErrorCategory::Timeout
    } else if e.contains("dns") || e.contains("name resolution") {
        ErrorCategory::DnsError
    } else if e.contains("connection") || e.contains("econnrefused") || e.contains("connect error")
    {
        ErrorCategory::ConnectionError
    } else if e.contains("network") {
        ErrorCategory::NetworkError
    } else if e.contains("rate limit") || e.contains("429") || e.contains("too many requests") {
        ErrorCategory::RateLimit
    } else if e.contains("503") || e.contains("service unavailable") || e.contains("overloaded") {
        ErrorCategory::ServiceUnavailable
    } else if e.contains("500") || e.contains("502") || e.contains("504") || e.contains("server error")
    {
        ErrorCategory::ServerError
    } else if e.contains("401") || e.contains("403") || e.contains("auth") || e.contains("api key")
    {
        ErrorCategory::AuthError
    } else if e.contains("400") || e.contains("bad request") || e.contains("invalid request") {
        ErrorCategory::BadRequest
    } else if e.contains("hallucinat") {
        ErrorCategory::HallucinationDetected
    } else if e.contains("json") || e.contains("parse error") {
        ErrorCategory::JsonParseError
    } else if e.contains("validation") || e.contains("schema") {
        ErrorCategory::ValidationError
    } else if e.contains("tool") {
        ErrorCategory::ToolError
    } else {
        ErrorCategory::UnknownError
    }
}

/// 恢复决策
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryDecision {
    /// 退避后重试当前 provider
    Retry { category: ErrorCategory, delay: Duration },
    /// 切换到备援链中下一个未试过的 provider
    SwitchProvider { provider: String },
    /// 备援耗尽，退到最简单的可用应答方
    GracefulDegrade,
    /// 恢复逻辑自身失败
    Escalate { reason: String },
}

/// 恢复引擎：持有重试/退避/备援配置
#[derive(Debug, Clone, Default)]
pub struct RecoveryEngine {
    config: RecoverySection,
}

impl RecoveryEngine {
    pub fn new(config: RecoverySection) -> Self {
        Self { config }
    }

    /// 指数退避 + 均匀抖动，封顶 max_delay_ms
    fn backoff(&self, retry_count: u32) -> Duration {
        let base = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << retry_count.min(10));
        let capped = base.min(self.config.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0..=self.config.base_delay_ms.max(1) / 2);
        Duration::from_millis(capped.saturating_add(jitter).min(self.config.max_delay_ms))
    }

    /// 决策入口；从不 panic、从不返回错误
    pub fn decide(
        &self,
        error: &str,
        current_provider: &str,
        retry_count: u32,
        elapsed_ms: u64,
        tried_providers: &[String],
    ) -> RecoveryDecision {
        if current_provider.is_empty() {
            return RecoveryDecision::Escalate {
                reason: "recovery invoked without a current provider".to_string(),
            };
        }

        let category = classify(error);
        tracing::debug!(?category, retry_count, elapsed_ms, "recovery classification");

        if category.is_retryable()
            && retry_count < self.config.max_retries
            && elapsed_ms < self.config.total_timeout_ms
        {
            return RecoveryDecision::Retry {
                category,
                delay: self.backoff(retry_count),
            };
        }

        let next = self
            .config
            .fallback_providers
            .iter()
            .find(|p| p.as_str() != current_provider && !tried_providers.contains(p));
        if let Some(provider) = next {
            return RecoveryDecision::SwitchProvider {
                provider: provider.clone(),
            };
        }

        RecoveryDecision::GracefulDegrade
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(fallbacks: Vec<&str>) -> RecoveryEngine {
        RecoveryEngine::new(RecoverySection {
            max_retries: 2,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            total_timeout_ms: 60_000,
            fallback_providers: fallbacks.into_iter().map(String::from).collect(),
        })
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(classify("request timed out"), ErrorCategory::Timeout);
        assert_eq!(classify("DNS lookup failed"), ErrorCategory::DnsError);
        assert_eq!(classify("connection refused"), ErrorCategory::ConnectionError);
        assert_eq!(classify("rate limit exceeded"), ErrorCategory::RateLimit);
        assert_eq!(
            classify("HTTP 503 service unavailable"),
            ErrorCategory::ServiceUnavailable
        );
        assert_eq!(classify("server error (500)"), ErrorCategory::ServerError);
        assert_eq!(classify("invalid api key"), ErrorCategory::AuthError);
        assert_eq!(classify("bad request"), ErrorCategory::BadRequest);
        assert_eq!(
            classify("hallucinated tool call"),
            ErrorCategory::HallucinationDetected
        );
        assert_eq!(classify("JSON parse error: eof"), ErrorCategory::JsonParseError);
        assert_eq!(classify("schema validation failed"), ErrorCategory::ValidationError);
        assert_eq!(classify("Unknown tool: ghost"), ErrorCategory::ToolError);
        assert_eq!(classify("something odd"), ErrorCategory::UnknownError);
    }

    #[test]
    fn test_retry_within_budget() {
        let engine = engine_with(vec![]);
        let d = engine.decide("timed out", "openai", 0, 0, &[]);
        assert!(matches!(
            d,
            RecoveryDecision::Retry {
                category: ErrorCategory::Timeout,
                ..
            }
        ));
    }

    #[test]
    fn test_switch_provider_after_retries() {
        let engine = engine_with(vec!["backup"]);
        let d = engine.decide("timed out", "openai", 2, 0, &[]);
        assert_eq!(
            d,
            RecoveryDecision::SwitchProvider {
                provider: "backup".to_string()
            }
        );
    }

    #[test]
    fn test_non_retryable_switches_immediately() {
        let engine = engine_with(vec!["backup"]);
        let d = engine.decide("invalid api key", "openai", 0, 0, &[]);
        assert!(matches!(d, RecoveryDecision::SwitchProvider { .. }));
    }

    #[test]
    fn test_degrade_when_providers_exhausted() {
        let engine = engine_with(vec!["backup"]);
        let tried = vec!["backup".to_string()];
        let d = engine.decide("invalid api key", "openai", 0, 0, &tried);
        assert_eq!(d, RecoveryDecision::GracefulDegrade);
    }

    #[test]
    fn test_total_timeout_budget_blocks_retry() {
        let engine = engine_with(vec![]);
        let d = engine.decide("timed out", "openai", 0, 120_000, &[]);
        assert_eq!(d, RecoveryDecision::GracefulDegrade);
    }

    #[test]
    fn test_escalate_on_bad_input() {
        let engine = engine_with(vec![]);
        let d = engine.decide("timed out", "", 0, 0, &[]);
        assert!(matches!(d, RecoveryDecision::Escalate { .. }));
    }

    #[test]
    fn test_backoff_capped() {
        let engine = engine_with(vec![]);
        for retry in 0..8u32 {
            if let RecoveryDecision::Retry { delay, .. } =
                engine.decide("timed out", "openai", retry.min(1), 0, &[])
            {
                assert!(delay.as_millis() <= 1_000, "retry {retry}: {delay:?}");
            }
        }
    }
}
