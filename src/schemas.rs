//! 结构化输出 Schema
//!
//! 研究流程与 create_plan 工具让模型按这些类型输出 JSON（schemars 生成 JSON Schema），
//! 同时也是研究报告的持久化形状。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 单条网页搜索结果（规范化后）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchResult {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

impl SearchResult {
    /// 搜索失败时的合成结果：一条，标题为查询本身
    pub fn search_error(query: &str, error: impl std::fmt::Display) -> Self {
        Self {
            url: String::new(),
            title: query.to_string(),
            content: format!("Search error: {error}"),
            score: 0.0,
        }
    }
}

/// 报告中的一条关键发现
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResearchFinding {
    /// 洞察
    pub insight: String,
    /// 支撑证据
    #[serde(default)]
    pub evidence: String,
    /// 来源 URL
    #[serde(default)]
    pub sources: Vec<String>,
}

/// 结构化研究报告
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResearchReport {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub key_findings: Vec<ResearchFinding>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub methodology: String,
}

/// clarify 阶段：模型建议的子话题
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct SubTopicList {
    /// 5-8 个可独立检索的子话题
    pub topics: Vec<String>,
}

/// 单个 explorer 的搜索指令
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExplorerInstruction {
    /// 发给网页搜索的查询串
    pub query: String,
    /// 该 explorer 关注什么
    pub search_focus: String,
    /// 可选的补充上下文
    #[serde(default)]
    pub context: String,
}

/// orchestrate 阶段：N 条搜索指令
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct InstructionList {
    pub instructions: Vec<ExplorerInstruction>,
}

/// 任务优先级
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// 计划中的一项任务
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskItem {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
}

/// create_plan 输出
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskPlan {
    pub goal: String,
    pub tasks: Vec<TaskItem>,
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_minimal_defaults() {
        let report: ResearchReport =
            serde_json::from_str(r#"{"title": "Minimal", "summary": "Just a summary"}"#).unwrap();
        assert!(report.key_findings.is_empty());
        assert!(report.sources.is_empty());
        assert!(report.tags.is_empty());
        assert_eq!(report.methodology, "");
    }

    #[test]
    fn test_task_item_default_priority() {
        let item: TaskItem =
            serde_json::from_str(r#"{"title": "Test", "description": "Run tests"}"#).unwrap();
        assert_eq!(item.priority, Priority::Medium);
    }

    #[test]
    fn test_task_item_rejects_unknown_priority() {
        let res: Result<TaskItem, _> = serde_json::from_str(
            r#"{"title": "Bad", "description": "x", "priority": "critical"}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_search_error_result() {
        let r = SearchResult::search_error("rust async", "HTTP 500");
        assert_eq!(r.title, "rust async");
        assert_eq!(r.content, "Search error: HTTP 500");
        assert_eq!(r.url, "");
        assert_eq!(r.score, 0.0);
    }
}
