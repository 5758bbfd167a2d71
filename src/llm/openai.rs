//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 的 BYOT 接口调用任意 OpenAI 兼容端点（可配置 base_url）：
//! 请求/响应使用本模块的 serde 线上类型，工具调用、推理强度、json_schema 输出都走同一条路径。

use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::Client;
use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{
    AssistantReply, ChatChunk, ChatRequest, ChatStream, LlmClient, StructuredRequest, ToolSpec,
};
use crate::memory::{Message, Role, ToolCall};

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

// ---- 线上类型（只声明用到的字段） ----

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    #[serde(default)]
    delta: WireDelta,
}

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

fn parse_arguments(name: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!(tool = %name, error = %e, "tool call arguments are not valid JSON");
        json!({})
    })
}

fn wire_message(m: &Message) -> Value {
    match m.role {
        Role::System => json!({"role": "system", "content": m.content}),
        Role::User => json!({"role": "user", "content": m.content}),
        Role::Tool => json!({
            "role": "tool",
            "content": m.content,
            "tool_call_id": m.tool_call_id.clone().unwrap_or_default(),
        }),
        Role::Assistant if m.tool_calls.is_empty() => {
            json!({"role": "assistant", "content": m.content})
        }
        Role::Assistant => {
            let calls: Vec<Value> = m
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {"name": tc.name, "arguments": tc.args.to_string()},
                    })
                })
                .collect();
            json!({"role": "assistant", "content": m.content, "tool_calls": calls})
        }
    }
}

fn wire_tool(spec: &ToolSpec) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": spec.parameters,
        }
    })
}

/// 流式工具调用的增量拼装
#[derive(Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

struct StreamState {
    inner: Pin<Box<dyn Stream<Item = Result<WireStreamChunk, OpenAIError>> + Send>>,
    partial: BTreeMap<usize, PartialCall>,
    ready: VecDeque<Result<ChatChunk, String>>,
    finished: bool,
    usage: TokenUsage,
}

impl StreamState {
    fn absorb(&mut self, chunk: WireStreamChunk) {
        if let Some(usage) = chunk.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                self.ready.push_back(Ok(ChatChunk::Token(text)));
            }
            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let entry = self.partial.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    entry.id = id;
                }
                if let Some(f) = delta.function {
                    if let Some(name) = f.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(args) = f.arguments {
                        entry.arguments.push_str(&args);
                    }
                }
            }
        }
    }

    /// 流结束：按 index 顺序吐出拼装完成的工具调用
    fn flush_calls(&mut self) {
        for (_, call) in std::mem::take(&mut self.partial) {
            let args = parse_arguments(&call.name, &call.arguments);
            self.ready
                .push_back(Ok(ChatChunk::ToolCall(ToolCall::new(call.id, call.name, args))));
        }
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    request_timeout: Option<Duration>,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, api_key: Option<&str>) -> Self {
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
            request_timeout: None,
            usage: TokenUsage::new(),
        }
    }

    pub fn with_timeout(mut self, secs: Option<u64>) -> Self {
        self.request_timeout = secs.filter(|s| *s > 0).map(Duration::from_secs);
        self
    }

    fn chat_body(&self, request: &ChatRequest<'_>, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model.model,
            "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.iter().map(wire_tool).collect());
        }
        if let Some(effort) = &request.model.reasoning_effort {
            body["reasoning_effort"] = json!(effort);
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }

    async fn with_deadline<T, F>(&self, fut: F) -> Result<T, String>
    where
        F: std::future::Future<Output = Result<T, OpenAIError>>,
    {
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| format!("LLM request timed out after {}s", limit.as_secs()))?
                .map_err(|e| e.to_string()),
            None => fut.await.map_err(|e| e.to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, request: ChatRequest<'_>) -> Result<AssistantReply, String> {
        let body = self.chat_body(&request, false);
        let response: WireResponse = self
            .with_deadline(self.client.chat().create_byot(body))
            .await?;

        if let Some(usage) = &response.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }

        let message = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| "empty choices in completion response".to_string())?;

        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let args = parse_arguments(&tc.function.name, &tc.function.arguments);
                ToolCall::new(tc.id, tc.function.name, args)
            })
            .collect();

        Ok(AssistantReply::with_calls(
            message.content.unwrap_or_default(),
            tool_calls,
        ))
    }

    async fn complete_stream(&self, request: ChatRequest<'_>) -> Result<ChatStream, String> {
        let body = self.chat_body(&request, true);
        let inner = self
            .with_deadline(self.client.chat().create_stream_byot::<Value, WireStreamChunk>(body))
            .await?;

        let state = StreamState {
            inner,
            partial: BTreeMap::new(),
            ready: VecDeque::new(),
            finished: false,
            usage: self.usage.clone(),
        };

        let chunks = stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.ready.pop_front() {
                    return Some((item, st));
                }
                if st.finished {
                    return None;
                }
                match st.inner.next().await {
                    Some(Ok(chunk)) => st.absorb(chunk),
                    Some(Err(e)) => {
                        st.finished = true;
                        st.ready.push_back(Err(e.to_string()));
                    }
                    None => {
                        st.finished = true;
                        st.flush_calls();
                    }
                }
            }
        });
        Ok(Box::pin(chunks))
    }

    async fn complete_structured(&self, request: StructuredRequest<'_>) -> Result<Value, String> {
        let mut body = json!({
            "model": request.model.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "schema": request.schema,
                },
            },
        });
        if let Some(effort) = &request.model.reasoning_effort {
            body["reasoning_effort"] = json!(effort);
        }

        let response: WireResponse = self
            .with_deadline(self.client.chat().create_byot(body))
            .await?;
        if let Some(usage) = &response.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| format!("no content for structured output {}", request.schema_name))?;
        serde_json::from_str(&content)
            .map_err(|e| format!("structured output {} is not JSON: {e}", request.schema_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelSpec;

    #[test]
    fn test_chat_body_shape() {
        let client = OpenAiClient::new(Some("http://localhost:1"), Some("sk-test"));
        let model = ModelSpec::resolve("gpt-5-nano-high");
        let messages = vec![
            Message::user("hi"),
            Message::assistant_with_calls("", vec![ToolCall::new("c1", "calculator", json!({"expression": "1+1"}))]),
            Message::tool("c1", "calculator", "2"),
        ];
        let tools = vec![ToolSpec {
            name: "calculator".into(),
            description: "math".into(),
            parameters: json!({"type": "object"}),
        }];
        let body = client.chat_body(
            &ChatRequest {
                model: &model,
                messages: &messages,
                tools: &tools,
            },
            true,
        );
        assert_eq!(body["model"], "gpt-5-nano");
        assert_eq!(body["reasoning_effort"], "high");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][1]["tool_calls"][0]["function"]["arguments"], "{\"expression\":\"1+1\"}");
        assert_eq!(body["messages"][2]["tool_call_id"], "c1");
        assert_eq!(body["tools"][0]["function"]["name"], "calculator");
    }

    #[test]
    fn test_stream_state_assembles_tool_calls() {
        let mut st = StreamState {
            inner: Box::pin(stream::empty()),
            partial: BTreeMap::new(),
            ready: VecDeque::new(),
            finished: false,
            usage: TokenUsage::new(),
        };
        let chunks: Vec<WireStreamChunk> = serde_json::from_value(json!([
            {"choices": [{"delta": {"content": "Hel"}}]},
            {"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "calculator", "arguments": "{\"expr"}}]}}]},
            {"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "ession\":\"2+2\"}"}}]}}]},
            {"choices": [], "usage": {"prompt_tokens": 10, "completion_tokens": 5}}
        ]))
        .unwrap();
        for c in chunks {
            st.absorb(c);
        }
        st.flush_calls();

        assert_eq!(st.ready.len(), 2);
        match st.ready.pop_back() {
            Some(Ok(ChatChunk::ToolCall(tc))) => {
                assert_eq!(tc.id, "call_1");
                assert_eq!(tc.args["expression"], "2+2");
            }
            other => panic!("unexpected chunk {other:?}"),
        }
        assert_eq!(st.usage.get(), (10, 5, 15));
    }
}
