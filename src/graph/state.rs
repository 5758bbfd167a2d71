//! 对话状态：线程内贯穿所有节点的唯一事实来源
//!
//! 消息历史只追加：只能通过 push_* / append_tool_result 写入，不提供改写或删除接口。
//! 工具结果必须回连到某条更早的 assistant 工具调用（tool_call_id 是连接键）。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::{AssistantReply, DEFAULT_MODEL_KEY};
use crate::memory::{Message, Role, ToolCall};
use crate::research::ResearchState;
use crate::schemas::ResearchReport;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
    /// 运行级模型键（见 llm::models）
    pub model: String,
    /// 已完成的研究报告，只增不减
    #[serde(default)]
    pub research_reports: Vec<ResearchReport>,
    /// 仅在 save 确认后、写库完成前非空
    #[serde(default)]
    pub pending_save: Option<ResearchReport>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub depth: Option<String>,
    /// 最近一次研究交回的报告
    #[serde(default)]
    pub report: Option<ResearchReport>,
    /// 研究子流程进行中时的私有状态
    #[serde(default)]
    pub research: Option<ResearchState>,
    /// 本轮检索到的文档上下文（不进入消息历史）
    #[serde(default)]
    pub rag_context: Option<String>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL_KEY)
    }
}

impl ConversationState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            model: model.into(),
            research_reports: Vec::new(),
            pending_save: None,
            topic: None,
            depth: None,
            report: None,
            research: None,
            rag_context: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn has_system_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::System)
    }

    pub fn last_human_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> &Message {
        self.push(Message::user(content))
    }

    pub fn push_system(&mut self, content: impl Into<String>) -> &Message {
        self.push(Message::system(content))
    }

    pub fn push_assistant(&mut self, reply: AssistantReply) -> &Message {
        self.push(reply.into_message())
    }

    fn push(&mut self, message: Message) -> &Message {
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// 追加工具结果；tool_call_id 找不到对应的 assistant 工具调用时报 OrphanToolResult
    pub fn append_tool_result(
        &mut self,
        call_id: &str,
        name: &str,
        content: impl Into<String>,
    ) -> Result<&Message, AgentError> {
        let known = self
            .messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .any(|m| m.tool_calls.iter().any(|tc| tc.id == call_id));
        if !known {
            return Err(AgentError::OrphanToolResult(call_id.to_string()));
        }
        Ok(self.push(Message::tool(call_id, name, content)))
    }

    /// 最近一条带工具调用的 assistant 消息的调用列表
    pub fn last_tool_calls(&self) -> &[ToolCall] {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && m.has_tool_calls())
            .map(|m| m.tool_calls.as_slice())
            .unwrap_or(&[])
    }

    /// 最近一轮中名为 name 的工具调用
    pub fn find_call(&self, name: &str) -> Option<&ToolCall> {
        self.last_tool_calls().iter().find(|tc| tc.name == name)
    }

    pub fn is_answered(&self, call_id: &str) -> bool {
        self.messages
            .iter()
            .any(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call_id))
    }

    /// 最近一轮中尚无工具结果的调用
    pub fn unanswered_calls(&self) -> Vec<ToolCall> {
        self.last_tool_calls()
            .iter()
            .filter(|tc| !self.is_answered(&tc.id))
            .cloned()
            .collect()
    }

    /// 给最近一轮里除 keep_id 以外所有未回答的调用补一条结果
    pub fn answer_unanswered(
        &mut self,
        keep_id: Option<&str>,
        content: &str,
    ) -> Result<usize, AgentError> {
        let pending: Vec<ToolCall> = self
            .unanswered_calls()
            .into_iter()
            .filter(|tc| Some(tc.id.as_str()) != keep_id)
            .collect();
        for tc in &pending {
            self.append_tool_result(&tc.id, &tc.name, content)?;
        }
        Ok(pending.len())
    }

    /// 最后一条 assistant 消息的文本
    pub fn final_reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_calls() -> ConversationState {
        let mut st = ConversationState::default();
        st.push_user("hi");
        st.push_assistant(AssistantReply::with_calls(
            "",
            vec![
                ToolCall::new("c1", "calculator", json!({"expression": "1+1"})),
                ToolCall::new("c2", "deep_research", json!({"topic": "x"})),
            ],
        ));
        st
    }

    #[test]
    fn test_orphan_tool_result_rejected() {
        let mut st = with_calls();
        assert!(st.append_tool_result("c1", "calculator", "2").is_ok());
        assert!(matches!(
            st.append_tool_result("nope", "calculator", "2"),
            Err(AgentError::OrphanToolResult(_))
        ));
        assert_eq!(st.messages().len(), 3);
    }

    #[test]
    fn test_unanswered_tracking() {
        let mut st = with_calls();
        assert_eq!(st.unanswered_calls().len(), 2);
        let n = st.answer_unanswered(Some("c2"), "skipped").unwrap();
        assert_eq!(n, 1);
        assert!(st.is_answered("c1"));
        assert!(!st.is_answered("c2"));
        assert_eq!(st.find_call("deep_research").map(|c| c.id.as_str()), Some("c2"));
    }

    #[test]
    fn test_serde_keeps_history() {
        let st = with_calls();
        let back: ConversationState =
            serde_json::from_str(&serde_json::to_string(&st).unwrap()).unwrap();
        assert_eq!(back, st);
        assert_eq!(back.final_reply(), Some(""));
    }
}
