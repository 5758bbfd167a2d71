//! 网页搜索：WebSearch 抽象、Tavily 后端、Mock 后端，以及 tavily_search 工具
//!
//! 搜索后端返回规范化的 SearchResult 列表；研究流程的 explorer 与 tavily_search 工具共用同一后端。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::schemas::SearchResult;
use crate::tools::{parameters_for, Tool};

pub const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

/// 网页搜索后端
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, String>;
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

/// Tavily 搜索 API 客户端
pub struct TavilySearch {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl TavilySearch {
    pub fn new(api_key: Option<&str>, timeout_secs: u64) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("TAVILY_API_KEY").ok())
            .unwrap_or_default();
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            endpoint: TAVILY_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, String> {
        if self.api_key.is_empty() {
            return Err("TAVILY_API_KEY is not set".to_string());
        }
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "api_key": self.api_key,
                "query": query,
                "max_results": max_results,
            }))
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body: TavilyResponse = resp
            .json()
            .await
            .map_err(|e| format!("Invalid response body: {e}"))?;
        Ok(body.results.into_iter().take(max_results).collect())
    }
}

/// Mock 搜索后端：按查询串生成确定性结果，可指定某些查询失败
#[derive(Debug, Default)]
pub struct MockWebSearch {
    failing: Mutex<HashSet<String>>,
    queries: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockWebSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含该子串的查询返回错误
    pub fn fail_on(self, needle: impl Into<String>) -> Self {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(needle.into());
        self
    }

    /// 每次搜索前等待
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 收到过的查询（按到达顺序）
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl WebSearch for MockWebSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>, String> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(query.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let fails = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|needle| query.contains(needle.as_str()));
        if fails {
            return Err(format!("mock search failure for '{query}'"));
        }
        let slug: String = query
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect();
        Ok((0..max_results.min(5))
            .map(|i| SearchResult {
                url: format!("https://example.com/{slug}/{i}"),
                title: format!("{query} ({})", i + 1),
                content: format!("Mock content about {query}, item {}.", i + 1),
                score: 1.0 - i as f64 * 0.1,
            })
            .collect())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TavilySearchArgs {
    /// The search query to look up on the web.
    query: String,
}

/// tavily_search 工具：快速检索，返回前 N 条结果的 JSON
pub struct TavilySearchTool {
    backend: Arc<dyn WebSearch>,
    max_results: usize,
}

impl TavilySearchTool {
    pub fn new(backend: Arc<dyn WebSearch>, max_results: usize) -> Self {
        Self {
            backend,
            max_results,
        }
    }
}

#[async_trait]
impl Tool for TavilySearchTool {
    fn name(&self) -> &str {
        "tavily_search"
    }

    fn description(&self) -> &str {
        "Search the web using Tavily for up-to-date information."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<TavilySearchArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: TavilySearchArgs = serde_json::from_value(args)
            .map_err(|e| format!("Error performing web search: invalid arguments: {e}"))?;
        tracing::info!(query = %args.query, "web search");
        let results = self
            .backend
            .search(&args.query, self.max_results)
            .await
            .map_err(|e| format!("Error performing web search: {e}"))?;
        serde_json::to_string_pretty(&results)
            .map_err(|e| format!("Error performing web search: {e}"))
    }
}
