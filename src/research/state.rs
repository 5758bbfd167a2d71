//! 研究子流程私有状态
//!
//! 每次 deep_research 触发时新建，报告交回父流程后即丢弃。

use serde::{Deserialize, Serialize};

use crate::schemas::{ExplorerInstruction, ResearchReport, SearchResult};

/// 研究深度 → explorer 并发宽度
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    Quick,
    #[default]
    Standard,
    Deep,
}

impl Depth {
    /// 未知取值按 standard 处理
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Depth::Quick,
            "deep" => Depth::Deep,
            _ => Depth::Standard,
        }
    }

    pub fn width(self) -> usize {
        match self {
            Depth::Quick => 3,
            Depth::Standard => 5,
            Depth::Deep => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Depth::Quick => "quick",
            Depth::Standard => "standard",
            Depth::Deep => "deep",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchStatus {
    Clarified,
    Orchestrated,
    Synthesized,
    Approved,
    Redo,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchState {
    pub topic: String,
    pub depth: Depth,
    /// 模型建议的候选子话题（待用户勾选）
    #[serde(default)]
    pub candidate_topics: Vec<String>,
    #[serde(default)]
    pub clarified_topics: Vec<String>,
    #[serde(default)]
    pub explorer_instructions: Vec<ExplorerInstruction>,
    /// 各 explorer 结果拼接（不去重）
    #[serde(default)]
    pub search_results: Vec<SearchResult>,
    #[serde(default)]
    pub report: Option<ResearchReport>,
    #[serde(default)]
    pub status: Option<ResearchStatus>,
    #[serde(default)]
    pub redo_count: u32,
}

impl ResearchState {
    pub fn new(topic: impl Into<String>, depth: Depth) -> Self {
        Self {
            topic: topic.into(),
            depth,
            ..Default::default()
        }
    }

    /// 本轮 explorer 数：min(已确认子话题数, 深度宽度)
    pub fn explorer_count(&self) -> usize {
        self.clarified_topics.len().min(self.depth.width())
    }
}
