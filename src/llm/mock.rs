//! Mock Provider（用于测试，无需 API）
//!
//! 三种行为：Echo（回显最后一条 user 消息，不发工具调用）、AlwaysToolCall（每轮都
//! 返回同一个工具调用，用于迭代上限测试）、Scripted（按队列弹出预置响应，弹空后退回 Echo）。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::traits::{EventStream, LlmError, LlmProvider};
use crate::llm::types::{
    CompletionRequest, CompletionResponse, FinishReason, Role, StreamEvent, Usage,
};
use crate::tools::ToolCall;

enum Fallback {
    Echo,
    AlwaysToolCall { tool: String, args: serde_json::Value },
}

/// Mock Provider：可脚本化的测试替身
pub struct MockProvider {
    name: String,
    scripted: Mutex<VecDeque<CompletionResponse>>,
    fallback: Fallback,
    /// 每次 complete 前注入的错误（剩余次数），用于重试路径测试
    fail_first: Mutex<u32>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Echo 模式：content 回显最后一条 user 消息，无工具调用
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            scripted: Mutex::new(VecDeque::new()),
            fallback: Fallback::Echo,
            fail_first: Mutex::new(0),
        }
    }

    /// 每轮都返回同一个工具调用（迭代上限测试用）
    pub fn always_tool_call(tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            name: "mock".to_string(),
            scripted: Mutex::new(VecDeque::new()),
            fallback: Fallback::AlwaysToolCall {
                tool: tool.into(),
                args,
            },
            fail_first: Mutex::new(0),
        }
    }

    /// 按顺序弹出预置响应；弹空后退回 Echo
    pub fn scripted(responses: Vec<CompletionResponse>) -> Self {
        Self {
            name: "mock".to_string(),
            scripted: Mutex::new(responses.into()),
            fallback: Fallback::Echo,
            fail_first: Mutex::new(0),
        }
    }

    /// 前 n 次调用返回 Err（Connection），之后恢复正常
    pub fn with_failures(self, n: u32) -> Self {
        *self.fail_first.lock().expect("mock lock") = n;
        self
    }

    /// 便捷构造：纯文本响应
    pub fn text_response(content: impl Into<String>) -> CompletionResponse {
        CompletionResponse {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: Some(FinishReason::Stop),
            usage: Usage::default(),
        }
    }

    /// 便捷构造：单个工具调用响应
    pub fn tool_call_response(tool: impl Into<String>, args: serde_json::Value) -> CompletionResponse {
        CompletionResponse {
            content: String::new(),
            tool_calls: vec![ToolCall::new(tool, args)],
            finish_reason: Some(FinishReason::ToolCalls),
            usage: Usage::default(),
        }
    }

    fn next_response(&self, request: &CompletionRequest) -> CompletionResponse {
        if let Some(scripted) = self.scripted.lock().expect("mock lock").pop_front() {
            return scripted;
        }
        match &self.fallback {
            Fallback::Echo => {
                let last_user = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                Self::text_response(format!("Echo from Mock: {last_user}"))
            }
            Fallback::AlwaysToolCall { tool, args } => {
                Self::tool_call_response(tool.clone(), args.clone())
            }
        }
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        {
            let mut failures = self.fail_first.lock().expect("mock lock");
            if *failures > 0 {
                *failures -= 1;
                return Err(LlmError::Connection("mock connection refused".to_string()));
            }
        }
        Ok(self.next_response(&request))
    }

    async fn stream_complete(&self, request: CompletionRequest) -> Result<EventStream, LlmError> {
        let response = self.complete(request).await?;
        let mut events: Vec<Result<StreamEvent, LlmError>> = Vec::new();
        if !response.content.is_empty() {
            events.push(Ok(StreamEvent::ContentDelta {
                text: response.content.clone(),
            }));
        }
        events.push(Ok(StreamEvent::Complete { response }));
        Ok(Box::pin(stream::iter(events)))
    }
}
