//! 文档检索接缝
//!
//! 每轮新运行开始时按最后一条用户消息检索最多 top_k 条文档，拼成 Context 块附在系统提示后。
//! 不实现向量检索：NoopRetriever 为默认；KeywordRetriever 按词重叠打分，适合测试与小规模本地文档。

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TOP_K: usize = 3;

/// 检索到的文档片段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub filename: String,
    pub content: String,
}

/// 文档检索 trait
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedDocument>, String>;
}

/// 空实现：未配置文档库时使用
#[derive(Clone, Debug, Default)]
pub struct NoopRetriever;

#[async_trait]
impl DocumentRetriever for NoopRetriever {
    async fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<RetrievedDocument>, String> {
        Ok(Vec::new())
    }
}

/// 将文本切分为小写词集合，用于简单相似度（词重叠数）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.len() > 1)
        .collect()
}

/// 关键词重叠检索
#[derive(Clone, Debug, Default)]
pub struct KeywordRetriever {
    docs: Vec<(RetrievedDocument, HashSet<String>)>,
}

impl KeywordRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, filename: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let words = tokenize_lower(&content);
        self.docs.push((
            RetrievedDocument {
                filename: filename.into(),
                content,
            },
            words,
        ));
        self
    }
}

#[async_trait]
impl DocumentRetriever for KeywordRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedDocument>, String> {
        let q = tokenize_lower(query);
        let mut scored: Vec<(usize, &RetrievedDocument)> = self
            .docs
            .iter()
            .map(|(doc, words)| (words.intersection(&q).count(), doc))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(top_k).map(|(_, d)| d.clone()).collect())
    }
}

/// 文档列表 → Context 文本；空列表返回空串
pub fn format_context(docs: &[RetrievedDocument]) -> String {
    docs.iter()
        .map(|d| format!("[Source: {}]\n{}", d.filename, d.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
