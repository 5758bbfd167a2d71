//! 对话编排图：状态、节点与路由、节点执行体、驱动循环与事件流

pub mod events;
pub mod node;
pub mod nodes;
pub mod runner;
pub mod state;

pub use events::{FinishKind, NodeStatus, RunEvent, RunHooks};
pub use node::{route_tool_calls, transition, GraphEvent, Node, Route};
pub use nodes::{format_report, select_report, GraphDeps, SKIPPED_RESULT, SYSTEM_PROMPT};
pub use runner::{GraphRunner, RunOutcome, DEFAULT_MAX_STEPS};
pub use state::ConversationState;
