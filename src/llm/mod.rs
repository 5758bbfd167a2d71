//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）与模型表

pub mod mock;
pub mod models;
pub mod openai;
pub mod traits;

pub use mock::MockLlmClient;
pub use models::{ModelSpec, DEFAULT_MODEL_KEY};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{
    structured, AssistantReply, ChatChunk, ChatRequest, ChatStream, LlmClient, StructuredRequest,
    ToolSpec,
};
