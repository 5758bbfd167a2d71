//! 父流程各节点的执行体
//!
//! 每个节点在状态草稿上工作，返回 StepOutcome：Continue(事件) 交给 node::transition；
//! Suspended(载荷) 由驱动循环落检查点。save_confirm 是父流程唯一的挂起节点，
//! 研究子流程的挂起由 ResearchPipeline 产生。

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::core::AgentError;
use crate::graph::events::{send_event, RunEvent};
use crate::graph::node::{route_tool_calls, GraphEvent, Node};
use crate::graph::state::ConversationState;
use crate::hitl::{ConfirmAction, HitlOption, HitlPayload, StepOutcome};
use crate::llm::{AssistantReply, ChatChunk, ChatRequest, LlmClient, ModelSpec};
use crate::memory::{Message, ThreadStore, ToolCall};
use crate::research::{pipeline, ResearchNode, ResearchPipeline};
use crate::retrieval::{format_context, DocumentRetriever, DEFAULT_TOP_K};
use crate::schemas::ResearchReport;
use crate::tools::{DeepResearchArgs, SaveReportArgs, ToolExecutor, DEEP_RESEARCH, SAVE_REPORT};

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant with advanced research capabilities. \
You can:\n\
- Answer questions and have conversations\n\
- Get the current time and do calculations\n\
- Search the web with tavily_search for quick lookups\n\
- Create structured task plans with create_plan\n\
- Launch deep research investigations with deep_research (spawns parallel searches, produces structured reports)\n\
- Save research reports to the database with save_report\n\n\
When a user asks for in-depth research on a topic, use the deep_research tool. \
For quick factual lookups, use tavily_search. \
Be concise and helpful in your responses.";

/// 哨兵胜出时，同一轮其余工具调用收到的结果
pub const SKIPPED_RESULT: &str = "Skipped: another tool call in this turn took priority.";
/// 上一次运行中断后残留的未回答调用
pub const ABANDONED_RESULT: &str = "Tool call was not completed.";

const NO_TOPIC: &str = "No research topic provided.";
const NO_REPORT: &str = "Research completed but no report was generated.";
const NO_REPORTS_TO_SAVE: &str = "No research reports available to save. Run a deep research first.";
const SAVE_CANCELLED: &str = "Report save cancelled by user.";
const NOTHING_PENDING: &str = "No report to save.";

/// 节点执行所需的协作者
pub struct GraphDeps {
    pub llm: Arc<dyn LlmClient>,
    pub tools: ToolExecutor,
    pub research: ResearchPipeline,
    pub retriever: Arc<dyn DocumentRetriever>,
    pub threads: Arc<dyn ThreadStore>,
    pub system_prompt: String,
}

/// 单步上下文
pub(crate) struct StepCtx<'a> {
    pub thread_id: &'a str,
    pub events: Option<&'a UnboundedSender<RunEvent>>,
}

impl GraphDeps {
    pub(crate) async fn step(
        &self,
        node: Node,
        state: &mut ConversationState,
        resume: Option<Value>,
        ctx: &StepCtx<'_>,
    ) -> Result<StepOutcome<GraphEvent>, AgentError> {
        let event = match node {
            Node::Retrieve => self.retrieve(state).await,
            Node::Agent => self.agent(state, ctx).await?,
            Node::Tools => self.run_tools(state).await?,
            Node::PrepareResearch => prepare_research(state)?,
            Node::Research(n) => return self.research_step(n, state, resume).await,
            Node::ProcessResearchResult => process_research_result(state)?,
            Node::SaveConfirm => return save_confirm(state, resume),
            Node::SaveToDb => self.save_to_db(state, ctx.thread_id).await?,
            Node::End => {
                return Err(AgentError::InvalidTransition {
                    node: Node::End.name().to_string(),
                    event: "step".to_string(),
                })
            }
        };
        Ok(StepOutcome::Continue(event))
    }

    async fn retrieve(&self, state: &mut ConversationState) -> GraphEvent {
        state.rag_context = None;
        let Some(query) = state.last_human_message().map(|m| m.content.clone()) else {
            return GraphEvent::Retrieved;
        };
        if query.trim().is_empty() {
            return GraphEvent::Retrieved;
        }
        match self.retriever.retrieve(&query, DEFAULT_TOP_K).await {
            Ok(docs) if !docs.is_empty() => {
                debug!(documents = docs.len(), "retrieved document context");
                state.rag_context = Some(format_context(&docs));
            }
            Ok(_) => {}
            Err(e) => warn!("document retrieval failed, continuing without context: {e}"),
        }
        GraphEvent::Retrieved
    }

    fn system_message(&self, state: &ConversationState) -> Message {
        match &state.rag_context {
            Some(ctx) => Message::system(format!(
                "{}\n\nUse the following context from uploaded documents to help answer the user's question. \
                 If the context is not relevant, you can ignore it.\n\nContext:\n{ctx}",
                self.system_prompt
            )),
            None => Message::system(self.system_prompt.clone()),
        }
    }

    async fn agent(
        &self,
        state: &mut ConversationState,
        ctx: &StepCtx<'_>,
    ) -> Result<GraphEvent, AgentError> {
        let model = ModelSpec::resolve(&state.model);
        let mut messages = Vec::with_capacity(state.messages().len() + 1);
        if !state.has_system_message() {
            messages.push(self.system_message(state));
        }
        messages.extend_from_slice(state.messages());
        let tools = self.tools.specs();

        let mut stream = self
            .llm
            .complete_stream(ChatRequest {
                model: &model,
                messages: &messages,
                tools: &tools,
            })
            .await
            .map_err(AgentError::LlmError)?;

        let mut content = String::new();
        let mut calls = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(AgentError::LlmError)? {
                ChatChunk::Token(text) => {
                    send_event(
                        &ctx.events,
                        RunEvent::MessageChunk {
                            node: Node::Agent.name().to_string(),
                            text: text.clone(),
                        },
                    );
                    content.push_str(&text);
                }
                ChatChunk::ToolCall(tc) => calls.push(tc),
            }
        }

        let calls = unique_call_ids(state, calls);
        let route = route_tool_calls(&calls, |name| self.tools.sentinel(name));
        info!(
            thread_id = %ctx.thread_id,
            tool_calls = calls.len(),
            route = ?route,
            "agent replied"
        );
        state.push_assistant(AssistantReply::with_calls(content, calls));
        Ok(GraphEvent::Replied(route))
    }

    async fn run_tools(&self, state: &mut ConversationState) -> Result<GraphEvent, AgentError> {
        let calls = state.unanswered_calls();
        let results = join_all(
            calls
                .iter()
                .map(|tc| self.tools.execute_to_text(&tc.name, tc.args.clone())),
        )
        .await;
        for (tc, text) in calls.iter().zip(results) {
            state.append_tool_result(&tc.id, &tc.name, text)?;
        }
        Ok(GraphEvent::ToolsExecuted)
    }

    async fn research_step(
        &self,
        node: ResearchNode,
        state: &mut ConversationState,
        resume: Option<Value>,
    ) -> Result<StepOutcome<GraphEvent>, AgentError> {
        let mut rs = match state.research.take() {
            Some(rs) => rs,
            None => pipeline::initial_state(
                state.topic.as_deref().unwrap_or_default(),
                state.depth.as_deref().unwrap_or("standard"),
            ),
        };
        let outcome = self.research.step(node, &mut rs, resume).await;
        state.research = Some(rs);
        Ok(match outcome? {
            StepOutcome::Continue(ev) => StepOutcome::Continue(GraphEvent::Research(ev)),
            StepOutcome::Suspended(payload) => StepOutcome::Suspended(payload),
        })
    }

    async fn save_to_db(
        &self,
        state: &mut ConversationState,
        thread_id: &str,
    ) -> Result<GraphEvent, AgentError> {
        let call = sentinel_call(state, SAVE_REPORT)?;
        let content = match state.pending_save.take() {
            None => NOTHING_PENDING.to_string(),
            Some(report) => match self.threads.save_report(thread_id, &report).await {
                Ok(id) => {
                    info!(thread_id = %thread_id, report_id = %id, title = %report.title, "research report saved");
                    serde_json::json!({
                        "status": "saved",
                        "title": &report.title,
                        "message": format!("Research report '{}' has been saved to the database.", report.title),
                    })
                    .to_string()
                }
                Err(e) => {
                    warn!(thread_id = %thread_id, "failed to save research report: {e}");
                    format!("Error saving report: {e}")
                }
            },
        };
        state.append_tool_result(&call.id, &call.name, content)?;
        Ok(GraphEvent::Saved)
    }
}

/// 空 id 或与历史重复的 id 重新生成，保证 tool_call_id 能唯一回连
fn unique_call_ids(state: &ConversationState, calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen: HashSet<String> = state
        .messages()
        .iter()
        .flat_map(|m| m.tool_calls.iter().map(|tc| tc.id.clone()))
        .collect();
    calls
        .into_iter()
        .map(|mut tc| {
            if tc.id.is_empty() || seen.contains(&tc.id) {
                let fresh = format!("call_{}", uuid::Uuid::new_v4().simple());
                debug!(old = %tc.id, new = %fresh, "reassigned tool call id");
                tc.id = fresh;
            }
            seen.insert(tc.id.clone());
            tc
        })
        .collect()
}

fn sentinel_call(state: &ConversationState, name: &str) -> Result<ToolCall, AgentError> {
    state
        .find_call(name)
        .cloned()
        .ok_or_else(|| AgentError::InvalidTransition {
            node: name.to_string(),
            event: "missing tool call".to_string(),
        })
}

fn prepare_research(state: &mut ConversationState) -> Result<GraphEvent, AgentError> {
    let call = sentinel_call(state, DEEP_RESEARCH)?;
    let skipped = state.answer_unanswered(Some(&call.id), SKIPPED_RESULT)?;
    if skipped > 0 {
        debug!(skipped, "answered sibling tool calls");
    }

    let args = DeepResearchArgs::from_args(&call.args);
    let Some(topic) = args.topic().map(String::from) else {
        warn!("deep_research called without a topic");
        state.append_tool_result(&call.id, &call.name, NO_TOPIC)?;
        state.topic = None;
        state.depth = None;
        return Ok(GraphEvent::ResearchSkipped);
    };

    info!(topic = %topic, depth = %args.depth, "starting deep research");
    state.research = Some(pipeline::initial_state(&topic, &args.depth));
    state.topic = Some(topic);
    state.depth = Some(args.depth);
    state.report = None;
    Ok(GraphEvent::ResearchPrepared)
}

/// 研究报告转成交给模型的工具结果文本
pub fn format_report(report: &ResearchReport) -> String {
    let mut out = format!(
        "**Research Report: {}**\n\n{}\n\n**Key Findings:**\n",
        report.title, report.summary
    );
    let findings: Vec<String> = report
        .key_findings
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{}. {}", i + 1, f.insight))
        .collect();
    out.push_str(&findings.join("\n"));
    if !report.sources.is_empty() {
        out.push_str(&format!(
            "\n\n**Sources:** {} sources referenced",
            report.sources.len()
        ));
    }
    out
}

fn process_research_result(state: &mut ConversationState) -> Result<GraphEvent, AgentError> {
    let call = sentinel_call(state, DEEP_RESEARCH)?;
    let report = state.research.take().and_then(|rs| rs.report);
    let content = match &report {
        Some(r) => format_report(r),
        None => NO_REPORT.to_string(),
    };
    state.append_tool_result(&call.id, &call.name, content)?;
    if let Some(r) = &report {
        state.research_reports.push(r.clone());
    }
    state.report = report;
    state.topic = None;
    state.depth = None;
    Ok(GraphEvent::ResearchProcessed)
}

/// 0 = 最近一份；越界时取最早的一份
pub fn select_report(reports: &[ResearchReport], index: usize) -> Option<&ResearchReport> {
    let last = reports.len().checked_sub(1)?;
    reports.get(last - index.min(last))
}

fn save_confirm(
    state: &mut ConversationState,
    resume: Option<Value>,
) -> Result<StepOutcome<GraphEvent>, AgentError> {
    let call = sentinel_call(state, SAVE_REPORT)?;
    state.answer_unanswered(Some(&call.id), SKIPPED_RESULT)?;

    let index = SaveReportArgs::from_args(&call.args).report_index;
    let Some(report) = select_report(&state.research_reports, index).cloned() else {
        state.append_tool_result(&call.id, &call.name, NO_REPORTS_TO_SAVE)?;
        state.pending_save = None;
        return Ok(StepOutcome::Continue(GraphEvent::SaveDeclined));
    };

    let Some(value) = resume else {
        return Ok(StepOutcome::Suspended(HitlPayload::confirm(
            "Save Research Report",
            "Do you want to save this research report to the database?",
            report,
            vec![
                HitlOption::new("save", "Save").description("Save report to database"),
                HitlOption::new("cancel", "Cancel").description("Don't save"),
            ],
        )));
    };

    match ConfirmAction::from_resume(&value) {
        ConfirmAction::Save => {
            state.pending_save = Some(report);
            Ok(StepOutcome::Continue(GraphEvent::SaveStaged))
        }
        ConfirmAction::Cancel => {
            state.append_tool_result(&call.id, &call.name, SAVE_CANCELLED)?;
            state.pending_save = None;
            Ok(StepOutcome::Continue(GraphEvent::SaveDeclined))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hitl::HitlType;
    use crate::schemas::ResearchFinding;
    use serde_json::json;

    fn report(title: &str) -> ResearchReport {
        ResearchReport {
            title: title.into(),
            summary: format!("{title} summary"),
            key_findings: vec![
                ResearchFinding {
                    insight: "first".into(),
                    ..Default::default()
                },
                ResearchFinding {
                    insight: "second".into(),
                    ..Default::default()
                },
            ],
            sources: vec!["https://a".into(), "https://b".into(), "https://c".into()],
            ..Default::default()
        }
    }

    fn state_with_calls(calls: Vec<ToolCall>) -> ConversationState {
        let mut st = ConversationState::default();
        st.push_user("go");
        st.push_assistant(AssistantReply::with_calls("", calls));
        st
    }

    #[test]
    fn test_select_report_clamps() {
        let reports = vec![report("A"), report("B"), report("C")];
        assert_eq!(select_report(&reports, 0).unwrap().title, "C");
        assert_eq!(select_report(&reports, 1).unwrap().title, "B");
        assert_eq!(select_report(&reports, 7).unwrap().title, "A");
        assert!(select_report(&[], 0).is_none());
    }

    #[test]
    fn test_format_report() {
        let text = format_report(&report("AI safety"));
        assert_eq!(
            text,
            "**Research Report: AI safety**\n\nAI safety summary\n\n**Key Findings:**\n1. first\n2. second\n\n**Sources:** 3 sources referenced"
        );
    }

    #[test]
    fn test_format_report_without_sources() {
        let mut r = report("AI safety");
        r.sources.clear();
        let text = format_report(&r);
        assert!(text.ends_with("1. first\n2. second"));
        assert!(!text.contains("**Sources:**"));
    }

    #[test]
    fn test_prepare_research_skips_siblings() {
        let mut st = state_with_calls(vec![
            ToolCall::new("a", "calculator", json!({"expression": "1+1"})),
            ToolCall::new("b", DEEP_RESEARCH, json!({"topic": "AI safety", "depth": "quick"})),
        ]);
        assert_eq!(prepare_research(&mut st).unwrap(), GraphEvent::ResearchPrepared);
        assert!(st.is_answered("a"));
        assert!(!st.is_answered("b"));
        assert_eq!(st.topic.as_deref(), Some("AI safety"));
        assert_eq!(st.research.as_ref().unwrap().depth.width(), 3);
    }

    #[test]
    fn test_prepare_research_without_topic() {
        let mut st = state_with_calls(vec![ToolCall::new("b", DEEP_RESEARCH, json!({}))]);
        assert_eq!(prepare_research(&mut st).unwrap(), GraphEvent::ResearchSkipped);
        assert_eq!(st.last_message().unwrap().content, NO_TOPIC);
        assert!(st.research.is_none());
    }

    #[test]
    fn test_process_result_without_report() {
        let mut st = state_with_calls(vec![ToolCall::new("b", DEEP_RESEARCH, json!({"topic": "x"}))]);
        st.research = Some(pipeline::initial_state("x", "quick"));
        process_research_result(&mut st).unwrap();
        assert_eq!(st.last_message().unwrap().content, NO_REPORT);
        assert!(st.research_reports.is_empty());
        assert!(st.research.is_none());
    }

    #[test]
    fn test_save_confirm_without_reports_does_not_suspend() {
        let mut st = state_with_calls(vec![ToolCall::new("s", SAVE_REPORT, json!({}))]);
        let out = save_confirm(&mut st, None).unwrap();
        assert_eq!(out, StepOutcome::Continue(GraphEvent::SaveDeclined));
        assert_eq!(st.last_message().unwrap().content, NO_REPORTS_TO_SAVE);
    }

    #[test]
    fn test_save_confirm_suspends_then_applies() {
        let mut st = state_with_calls(vec![ToolCall::new("s", SAVE_REPORT, json!({"report_index": 5}))]);
        st.research_reports = vec![report("old"), report("new")];

        let StepOutcome::Suspended(payload) = save_confirm(&mut st, None).unwrap() else {
            panic!("expected suspension");
        };
        assert_eq!(payload.hitl_type(), HitlType::Confirm);
        assert_eq!(payload.report().unwrap().title, "old");
        assert_eq!(payload.options().len(), 2);

        let mut cancelled = st.clone();
        assert_eq!(
            save_confirm(&mut cancelled, Some(json!({"action": "cancel"}))).unwrap(),
            StepOutcome::Continue(GraphEvent::SaveDeclined)
        );
        assert_eq!(cancelled.last_message().unwrap().content, SAVE_CANCELLED);

        assert_eq!(
            save_confirm(&mut st, Some(json!({"action": "save"}))).unwrap(),
            StepOutcome::Continue(GraphEvent::SaveStaged)
        );
        assert_eq!(st.pending_save.as_ref().unwrap().title, "old");
    }

    #[test]
    fn test_unique_call_ids() {
        let st = state_with_calls(vec![ToolCall::new("dup", "calculator", json!({}))]);
        let calls = unique_call_ids(
            &st,
            vec![
                ToolCall::new("dup", "calculator", json!({})),
                ToolCall::new("", "calculator", json!({})),
                ToolCall::new("ok", "calculator", json!({})),
                ToolCall::new("ok", "calculator", json!({})),
            ],
        );
        let ids: HashSet<&str> = calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), 4);
        assert!(ids.contains("ok"));
        assert!(!ids.contains("dup"));
    }
}
