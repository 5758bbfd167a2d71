//! 父流程状态机：节点、事件、纯转移函数与工具调用路由
//!
//! ```text
//! Retrieve → Agent ─┬─ Research 哨兵 → PrepareResearch → Research(..) → ProcessResearchResult ─┐
//!                   ├─ Save 哨兵     → SaveConfirm(挂起) → SaveToDb ─────────────────────────┤
//!                   ├─ 其他工具      → Tools ─────────────────────────────────────────────────┤
//!                   └─ 无工具调用    → End                                                    │
//!        ↑──────────────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::ToolCall;
use crate::research::{self, ResearchEvent, ResearchNode, ResearchTransition};
use crate::tools::SentinelRoute;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Retrieve,
    Agent,
    Tools,
    PrepareResearch,
    Research(ResearchNode),
    ProcessResearchResult,
    SaveConfirm,
    SaveToDb,
    End,
}

impl Node {
    pub fn name(self) -> &'static str {
        match self {
            Node::Retrieve => "retrieve",
            Node::Agent => "agent",
            Node::Tools => "tools",
            Node::PrepareResearch => "prepare_research",
            Node::Research(n) => n.name(),
            Node::ProcessResearchResult => "process_research_result",
            Node::SaveConfirm => "save_confirm",
            Node::SaveToDb => "save_to_db",
            Node::End => "end",
        }
    }

    /// 是否属于研究子流程
    pub fn is_subgraph(self) -> bool {
        matches!(self, Node::Research(_))
    }
}

/// Agent 之后的去向
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Research,
    SaveConfirm,
    Tools,
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphEvent {
    Retrieved,
    Replied(Route),
    ToolsExecuted,
    ResearchPrepared,
    /// 缺少 topic，未进入研究
    ResearchSkipped,
    Research(ResearchEvent),
    ResearchProcessed,
    SaveStaged,
    SaveDeclined,
    Saved,
}

/// 路由优先级：研究哨兵 > 保存哨兵 > 其他工具 > 结束
pub fn route_tool_calls<F>(calls: &[ToolCall], sentinel: F) -> Route
where
    F: Fn(&str) -> Option<SentinelRoute>,
{
    if calls.is_empty() {
        return Route::End;
    }
    let routes: Vec<Option<SentinelRoute>> = calls.iter().map(|c| sentinel(&c.name)).collect();
    if routes.contains(&Some(SentinelRoute::DeepResearch)) {
        Route::Research
    } else if routes.contains(&Some(SentinelRoute::SaveReport)) {
        Route::SaveConfirm
    } else {
        Route::Tools
    }
}

pub fn transition(node: Node, event: GraphEvent) -> Result<Node, AgentError> {
    use GraphEvent as E;

    let next = match (node, event) {
        (Node::Retrieve, E::Retrieved) => Node::Agent,
        (Node::Agent, E::Replied(Route::Research)) => Node::PrepareResearch,
        (Node::Agent, E::Replied(Route::SaveConfirm)) => Node::SaveConfirm,
        (Node::Agent, E::Replied(Route::Tools)) => Node::Tools,
        (Node::Agent, E::Replied(Route::End)) => Node::End,
        (Node::Tools, E::ToolsExecuted) => Node::Agent,
        (Node::PrepareResearch, E::ResearchPrepared) => Node::Research(research::machine::START),
        (Node::PrepareResearch, E::ResearchSkipped) => Node::Agent,
        (Node::Research(n), E::Research(ev)) => match research::transition(n, ev)? {
            ResearchTransition::Next(m) => Node::Research(m),
            ResearchTransition::Finished => Node::ProcessResearchResult,
        },
        (Node::ProcessResearchResult, E::ResearchProcessed) => Node::Agent,
        (Node::SaveConfirm, E::SaveStaged) => Node::SaveToDb,
        (Node::SaveConfirm, E::SaveDeclined) => Node::Agent,
        (Node::SaveToDb, E::Saved) => Node::Agent,
        (node, event) => {
            return Err(AgentError::InvalidTransition {
                node: node.name().to_string(),
                event: format!("{event:?}"),
            })
        }
    };
    Ok(next)
}
