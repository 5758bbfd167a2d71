//! 运行过程事件：用于流式/SSE 展示节点进度、模型输出片段与中断

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::hitl::Interrupt;
use crate::memory::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Completed,
}

/// 运行以何种方式结束
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishKind {
    Completed,
    Suspended,
}

/// 单个运行事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted { thread_id: String, resumed: bool },
    /// 节点开始 / 完成；subgraph 标记研究子流程内的节点
    NodeStatus {
        node: String,
        status: NodeStatus,
        subgraph: bool,
    },
    /// 模型回复的一小段（仅 agent 节点）
    MessageChunk { node: String, text: String },
    /// 一条完整的 assistant 消息
    MessageComplete { message: Message },
    Interrupt { interrupt: Interrupt },
    /// 致命错误；之后不会再有 run_finished
    Error { text: String },
    RunFinished { thread_id: String, outcome: FinishKind },
}

/// 单次 invoke / resume 的可选钩子
#[derive(Debug, Clone, Copy, Default)]
pub struct RunHooks<'a> {
    pub events: Option<&'a UnboundedSender<RunEvent>>,
    pub cancel: Option<&'a CancellationToken>,
}

impl<'a> RunHooks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, tx: &'a UnboundedSender<RunEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_cancel(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|t| t.is_cancelled())
    }
}

pub(crate) fn send_event(tx: &Option<&UnboundedSender<RunEvent>>, ev: RunEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let ev = RunEvent::NodeStatus {
            node: "explore".into(),
            status: NodeStatus::Active,
            subgraph: true,
        };
        assert_eq!(
            serde_json::to_value(&ev).unwrap(),
            json!({"type": "node_status", "node": "explore", "status": "active", "subgraph": true})
        );
        let done = RunEvent::RunFinished {
            thread_id: "t".into(),
            outcome: FinishKind::Suspended,
        };
        assert_eq!(serde_json::to_value(&done).unwrap()["outcome"], "suspended");
    }

    #[test]
    fn test_hooks_cancel_flag() {
        let token = CancellationToken::new();
        let hooks = RunHooks::new().with_cancel(&token);
        assert!(!hooks.is_cancelled());
        token.cancel();
        assert!(hooks.is_cancelled());
        assert!(!RunHooks::new().is_cancelled());
    }
}
