//! OpenAI 兼容 API 适配器
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。只做统一形状
//! （CompletionRequest / CompletionResponse / ToolCall）与 API 格式之间的映射，
//! 重试、退避与恢复策略都在核心层。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionTools,
    CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::stream;

use crate::llm::traits::{EventStream, LlmError, LlmProvider};
use crate::llm::types::{
    CompletionRequest, CompletionResponse, FinishReason, Role, StreamEvent, Usage,
};
use crate::tools::{ToolCall, ToolSpec};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容 Provider：持有 Client 与 model 名
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    name: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiProvider {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            name: "openai".to_string(),
            usage: TokenUsage::new(),
        }
    }

    fn to_api_messages(
        &self,
        request: &CompletionRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let mut out = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system_prompt {
            out.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system.clone())
                    .build()
                    .map_err(|e| LlmError::BadRequest(e.to_string()))?,
            ));
        }
        for m in &request.messages {
            let msg = match m.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(|e| LlmError::BadRequest(e.to_string()))?,
                ),
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(|e| LlmError::BadRequest(e.to_string()))?,
                ),
                Role::Assistant => {
                    let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                    args.content(m.content.clone());
                    if !m.tool_calls.is_empty() {
                        args.tool_calls(
                            m.tool_calls
                                .iter()
                                .map(to_api_tool_call)
                                .collect::<Vec<_>>(),
                        );
                    }
                    ChatCompletionRequestMessage::Assistant(
                        args.build()
                            .map_err(|e| LlmError::BadRequest(e.to_string()))?,
                    )
                }
                Role::Tool => ChatCompletionRequestMessage::Tool(
                    ChatCompletionRequestToolMessageArgs::default()
                        .content(m.content.clone())
                        .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                        .build()
                        .map_err(|e| LlmError::BadRequest(e.to_string()))?,
                ),
            };
            out.push(msg);
        }
        Ok(out)
    }

    fn to_api_tools(&self, specs: &[ToolSpec]) -> Result<Vec<ChatCompletionTools>, LlmError> {
        specs
            .iter()
            .map(|spec| {
                let function = FunctionObjectArgs::default()
                    .name(spec.name.clone())
                    .description(spec.description.clone())
                    .parameters(spec.input_schema.clone())
                    .build()
                    .map_err(|e| LlmError::BadRequest(e.to_string()))?;
                Ok(ChatCompletionTools::Function(ChatCompletionTool {
                    function,
                }))
            })
            .collect()
    }
}

fn to_api_tool_call(call: &ToolCall) -> ChatCompletionMessageToolCalls {
    ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
        id: call.id.clone(),
        function: FunctionCall {
            name: call.tool.clone(),
            arguments: call.arguments.to_string(),
        },
    })
}

/// 非 Function 形态的调用（若 API 引入）直接忽略
fn from_api_tool_call(call: &ChatCompletionMessageToolCalls) -> Option<ToolCall> {
    match call {
        ChatCompletionMessageToolCalls::Function(call) => {
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| serde_json::json!({}));
            let mut tool_call = ToolCall {
                id: call.id.clone(),
                tool: call.function.name.clone(),
                arguments,
            };
            crate::tools::normalize_call_id(&mut tool_call);
            Some(tool_call)
        }
        _ => None,
    }
}

fn map_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::ApiError(api) => {
            let message = api.message.clone();
            let kind = api.r#type.clone().unwrap_or_default();
            let lowered = format!("{} {}", kind, message).to_lowercase();
            if lowered.contains("rate limit") || lowered.contains("rate_limit") {
                LlmError::RateLimited { retry_after_ms: 1_000 }
            } else if lowered.contains("auth") || lowered.contains("api key") {
                LlmError::Auth(message)
            } else if lowered.contains("invalid") {
                LlmError::BadRequest(message)
            } else {
                LlmError::Server { status: 500, message }
            }
        }
        OpenAIError::Reqwest(inner) => {
            let s = inner.to_string();
            if s.to_lowercase().contains("timed out") {
                LlmError::Timeout
            } else {
                LlmError::Connection(s)
            }
        }
        other => LlmError::Other(other.to_string()),
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(self.to_api_messages(&request)?);
        if !request.tools.is_empty() {
            args.tools(self.to_api_tools(&request.tools)?);
        }
        if let Some(t) = request.temperature {
            args.temperature(t);
        }
        if let Some(m) = request.max_tokens {
            args.max_tokens(m);
        }
        let api_request = args
            .build()
            .map_err(|e| LlmError::BadRequest(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(api_request)
            .await
            .map_err(map_error)?;

        let mut usage = Usage::default();
        if let Some(u) = &response.usage {
            self.usage.add(u.prompt_tokens as u64, u.completion_tokens as u64);
            usage = Usage {
                prompt_tokens: u.prompt_tokens as u64,
                completion_tokens: u.completion_tokens as u64,
                total_tokens: u.total_tokens as u64,
            };
        }

        let choice = response
            .choices
            .first()
            .ok_or_else(|| LlmError::Parse("empty choices".to_string()))?;
        let content = choice.message.content.clone().unwrap_or_default();
        let tool_calls = choice
            .message
            .tool_calls
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .filter_map(from_api_tool_call)
            .collect::<Vec<_>>();
        let finish_reason = if tool_calls.is_empty() {
            Some(FinishReason::Stop)
        } else {
            Some(FinishReason::ToolCalls)
        };

        Ok(CompletionResponse {
            content,
            tool_calls,
            finish_reason,
            usage,
        })
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
