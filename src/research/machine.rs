//! 研究子流程状态机（纯函数，无 I/O）
//!
//! ```text
//! Clarify → SelectTopics(挂起) → Orchestrate → Explore → Synthesize → Review(挂起)
//!                                     ↑                                   │
//!                                     └──────────── redo ─────────────────┘
//! ```
//! Review 通过（approve / edit）即 Finished，把报告交回父流程。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchNode {
    Clarify,
    SelectTopics,
    Orchestrate,
    Explore,
    Synthesize,
    Review,
}

impl ResearchNode {
    pub fn name(self) -> &'static str {
        match self {
            ResearchNode::Clarify => "clarify",
            ResearchNode::SelectTopics => "select_topics",
            ResearchNode::Orchestrate => "orchestrate",
            ResearchNode::Explore => "explore",
            ResearchNode::Synthesize => "synthesize",
            ResearchNode::Review => "review",
        }
    }
}

/// review 的去向
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Approved,
    Redo,
}

/// 节点执行完成后产生的事件
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchEvent {
    TopicsSuggested,
    TopicsSelected,
    Orchestrated,
    Explored,
    Synthesized,
    Reviewed(ReviewOutcome),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResearchTransition {
    Next(ResearchNode),
    Finished,
}

pub const START: ResearchNode = ResearchNode::Clarify;

pub fn transition(node: ResearchNode, event: ResearchEvent) -> Result<ResearchTransition, AgentError> {
    use ResearchEvent as E;
    use ResearchNode as N;
    use ResearchTransition::{Finished, Next};

    match (node, event) {
        (N::Clarify, E::TopicsSuggested) => Ok(Next(N::SelectTopics)),
        (N::SelectTopics, E::TopicsSelected) => Ok(Next(N::Orchestrate)),
        (N::Orchestrate, E::Orchestrated) => Ok(Next(N::Explore)),
        (N::Explore, E::Explored) => Ok(Next(N::Synthesize)),
        (N::Synthesize, E::Synthesized) => Ok(Next(N::Review)),
        (N::Review, E::Reviewed(ReviewOutcome::Approved)) => Ok(Finished),
        // redo 不重新询问子话题
        (N::Review, E::Reviewed(ReviewOutcome::Redo)) => Ok(Next(N::Orchestrate)),
        (node, event) => Err(AgentError::InvalidTransition {
            node: node.name().to_string(),
            event: format!("{event:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut node = START;
        let events = [
            ResearchEvent::TopicsSuggested,
            ResearchEvent::TopicsSelected,
            ResearchEvent::Orchestrated,
            ResearchEvent::Explored,
            ResearchEvent::Synthesized,
        ];
        for ev in events {
            match transition(node, ev).unwrap() {
                ResearchTransition::Next(n) => node = n,
                ResearchTransition::Finished => panic!("finished early"),
            }
        }
        assert_eq!(node, ResearchNode::Review);
        assert_eq!(
            transition(node, ResearchEvent::Reviewed(ReviewOutcome::Approved)).unwrap(),
            ResearchTransition::Finished
        );
    }

    #[test]
    fn test_redo_loops_to_orchestrate() {
        assert_eq!(
            transition(ResearchNode::Review, ResearchEvent::Reviewed(ReviewOutcome::Redo)).unwrap(),
            ResearchTransition::Next(ResearchNode::Orchestrate)
        );
    }

    #[test]
    fn test_mismatched_event_rejected() {
        assert!(matches!(
            transition(ResearchNode::Clarify, ResearchEvent::Explored),
            Err(AgentError::InvalidTransition { .. })
        ));
    }
}
