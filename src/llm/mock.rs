//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本依次返回预置回复；脚本耗尽后：若最后一条是工具结果则回复 "Result: ..."，
//! 否则回显最后一条用户消息。结构化输出按 schema 名分别排队，未预置即报错。

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{AssistantReply, ChatRequest, LlmClient, StructuredRequest};
use crate::memory::{Message, Role};

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<AssistantReply>>,
    structured: Mutex<HashMap<String, VecDeque<Value>>>,
    /// 每次 complete 收到的消息，供测试断言
    seen: Mutex<Vec<Vec<Message>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条对话回复
    pub fn push_reply(&self, reply: AssistantReply) -> &Self {
        lock(&self.replies).push_back(reply);
        self
    }

    /// 为指定 schema 名追加一条结构化输出
    pub fn push_structured(&self, schema_name: &str, value: Value) -> &Self {
        lock(&self.structured)
            .entry(schema_name.to_string())
            .or_default()
            .push_back(value);
        self
    }

    pub fn with_replies(self, replies: impl IntoIterator<Item = AssistantReply>) -> Self {
        lock(&self.replies).extend(replies);
        self
    }

    /// 已调用 complete 的次数
    pub fn calls(&self) -> usize {
        lock(&self.seen).len()
    }

    /// 第 n 次调用收到的消息
    pub fn request(&self, n: usize) -> Option<Vec<Message>> {
        lock(&self.seen).get(n).cloned()
    }

    fn fallback(messages: &[Message]) -> AssistantReply {
        if let Some(last) = messages.last() {
            if last.role == Role::Tool {
                return AssistantReply::text(format!("Result: {}", last.content));
            }
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        AssistantReply::text(format!("Echo from Mock: {last_user}"))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: ChatRequest<'_>) -> Result<AssistantReply, String> {
        lock(&self.seen).push(request.messages.to_vec());
        let scripted = lock(&self.replies).pop_front();
        Ok(scripted.unwrap_or_else(|| Self::fallback(request.messages)))
    }

    async fn complete_structured(&self, request: StructuredRequest<'_>) -> Result<Value, String> {
        lock(&self.structured)
            .get_mut(request.schema_name)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| format!("no scripted output for schema {}", request.schema_name))
    }
}
