//! LLM 层：Provider 抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;
pub mod types;

pub use mock::MockProvider;
pub use openai::{OpenAiProvider, TokenUsage};
pub use traits::{EventStream, LlmError, LlmProvider};
pub use types::{
    CompletionRequest, CompletionResponse, FinishReason, Message, Role, StreamEvent, Usage,
};
