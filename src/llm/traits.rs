//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式，带工具）、
//! complete_stream（流式 Token + 工具调用）、complete_structured（按 JSON Schema 输出对象）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::ModelSpec;
use crate::memory::{Message, ToolCall};

/// 暴露给模型的工具描述（名称、说明、参数 JSON Schema）
#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 一次对话补全请求
#[derive(Clone, Copy, Debug)]
pub struct ChatRequest<'a> {
    pub model: &'a ModelSpec,
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
}

/// 模型回复：文本 + 零或多个工具调用
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssistantReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn into_message(self) -> Message {
        Message::assistant_with_calls(self.content, self.tool_calls)
    }
}

/// 流式片段
#[derive(Clone, Debug, PartialEq)]
pub enum ChatChunk {
    /// 增量文本
    Token(String),
    /// 一个已组装完整的工具调用
    ToolCall(ToolCall),
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, String>> + Send>>;

/// 结构化输出请求：单条提示 + 目标 schema
#[derive(Clone, Copy, Debug)]
pub struct StructuredRequest<'a> {
    pub model: &'a ModelSpec,
    pub prompt: &'a str,
    pub schema_name: &'a str,
    pub schema: &'a Value,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, request: ChatRequest<'_>) -> Result<AssistantReply, String>;

    /// 流式完成；默认实现把 complete 的结果切成一个 Token + 若干 ToolCall
    async fn complete_stream(&self, request: ChatRequest<'_>) -> Result<ChatStream, String> {
        let reply = self.complete(request).await?;
        let mut chunks = Vec::with_capacity(reply.tool_calls.len() + 1);
        if !reply.content.is_empty() {
            chunks.push(Ok(ChatChunk::Token(reply.content)));
        }
        chunks.extend(reply.tool_calls.into_iter().map(|tc| Ok(ChatChunk::ToolCall(tc))));
        Ok(Box::pin(stream::iter(chunks)))
    }

    /// 结构化输出：返回符合 schema 的 JSON 对象
    async fn complete_structured(&self, request: StructuredRequest<'_>) -> Result<Value, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 以类型 T 的 JSON Schema 请求结构化输出并反序列化
pub async fn structured<T>(
    llm: &dyn LlmClient,
    model: &ModelSpec,
    prompt: &str,
) -> Result<T, AgentError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema_name = T::schema_name();
    let schema = serde_json::to_value(schemars::schema_for!(T))?;
    let value = llm
        .complete_structured(StructuredRequest {
            model,
            prompt,
            schema_name: &schema_name,
            schema: &schema,
        })
        .await
        .map_err(AgentError::LlmError)?;
    serde_json::from_value(value).map_err(|e| AgentError::StructuredOutput {
        schema: schema_name.clone(),
        reason: e.to_string(),
    })
}
