//! LLM Provider 抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmProvider：complete（非流式）、
//! stream_complete（流式，产出内容增量与最终响应）。核心只依赖此接口，不依赖任何厂商格式。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use crate::llm::types::{CompletionRequest, CompletionResponse, StreamEvent};

/// Provider 错误；Recovery 按类别与消息子串分类
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Request timeout")]
    Timeout,

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Auth error: {0}")]
    Auth(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("LLM error: {0}")]
    Other(String),
}

/// 流式事件流
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// LLM Provider trait：非流式完成与流式完成
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider 名称（用于 Recovery 的备援链与日志）
    fn name(&self) -> &str;

    /// 非流式完成
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// 流式完成：内容增量 + 最终完整响应
    async fn stream_complete(&self, request: CompletionRequest) -> Result<EventStream, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
