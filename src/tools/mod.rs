//! 工具箱：真实工具（时间、计算、网页搜索、任务计划）、路由哨兵、注册表与执行器

pub mod calculator;
pub mod clock;
pub mod executor;
pub mod plan;
pub mod registry;
pub mod schema;
pub mod sentinel;
pub mod web_search;

use std::sync::Arc;

use crate::llm::{LlmClient, ModelSpec};

pub use calculator::CalculatorTool;
pub use clock::ClockTool;
pub use executor::ToolExecutor;
pub use plan::CreatePlanTool;
pub use registry::{Tool, ToolKind, ToolRegistry};
pub use schema::parameters_for;
pub use sentinel::{
    register_sentinels, DeepResearchArgs, SaveReportArgs, SentinelRoute, DEEP_RESEARCH,
    SAVE_REPORT,
};
pub use web_search::{MockWebSearch, TavilySearch, TavilySearchTool, WebSearch};

/// 标准工具集：四个真实工具 + 两个哨兵，顺序即暴露给模型的顺序
pub fn standard_registry(
    llm: Arc<dyn LlmClient>,
    structured_model: ModelSpec,
    search: Arc<dyn WebSearch>,
    max_results: usize,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ClockTool);
    registry.register(CalculatorTool);
    registry.register(TavilySearchTool::new(search, max_results));
    registry.register(CreatePlanTool::new(llm, structured_model));
    register_sentinels(&mut registry);
    registry
}
