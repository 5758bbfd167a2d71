//! 路由哨兵：deep_research 与 save_report
//!
//! 哨兵只向模型声明名称与参数 schema，本体从不执行；出现在 assistant 工具调用里即触发分支。
//! 参数解析宽松：缺字段用默认值，只有缺 topic 时研究分支拒绝进入。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{parameters_for, ToolRegistry};

pub const DEEP_RESEARCH: &str = "deep_research";
pub const SAVE_REPORT: &str = "save_report";

/// 哨兵对应的控制流分支
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentinelRoute {
    DeepResearch,
    SaveReport,
}

impl SentinelRoute {
    pub fn tool_name(self) -> &'static str {
        match self {
            SentinelRoute::DeepResearch => DEEP_RESEARCH,
            SentinelRoute::SaveReport => SAVE_REPORT,
        }
    }
}

fn default_depth() -> String {
    "standard".to_string()
}

/// deep_research 参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DeepResearchArgs {
    /// The research topic or question to investigate.
    pub topic: String,
    /// Research depth - 'quick' (3 searches), 'standard' (5), or 'deep' (8).
    #[serde(default = "default_depth")]
    pub depth: String,
}

impl DeepResearchArgs {
    /// 从工具调用参数解析；无法解析时 topic 为空
    pub fn from_args(args: &Value) -> Self {
        let topic = args
            .get("topic")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let depth = args
            .get("depth")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(default_depth);
        Self { topic, depth }
    }

    pub fn topic(&self) -> Option<&str> {
        Some(self.topic.as_str()).filter(|t| !t.is_empty())
    }
}

/// save_report 参数
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SaveReportArgs {
    /// Index of the report to save (0 = most recent). Defaults to 0.
    #[serde(default)]
    pub report_index: usize,
}

impl SaveReportArgs {
    /// 负数或非数字按 0 处理
    pub fn from_args(args: &Value) -> Self {
        let report_index = args
            .get("report_index")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
            .unwrap_or(0) as usize;
        Self { report_index }
    }
}

/// 向注册表登记两个哨兵
pub fn register_sentinels(registry: &mut ToolRegistry) {
    registry.register_sentinel(
        DEEP_RESEARCH,
        "Launch a deep research investigation on a topic. This spawns parallel web searches, \
         synthesizes findings into a structured report, and allows you to review the results.",
        parameters_for::<DeepResearchArgs>(),
        SentinelRoute::DeepResearch,
    );
    registry.register_sentinel(
        SAVE_REPORT,
        "Save a research report from the current conversation to the database.",
        parameters_for::<SaveReportArgs>(),
        SentinelRoute::SaveReport,
    );
}
