//! 研究子流程各阶段的执行体
//!
//! ResearchPipeline::step 对单个节点做有副作用的工作（结构化输出调用、并行搜索），
//! 返回 StepOutcome：Continue(事件) 交给 machine::transition，Suspended(载荷) 交给驱动循环落检查点。
//! 挂起节点（SelectTopics / Review）第一次进入时只构造载荷；带 resume 值再次进入时应用人工输入。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::core::AgentError;
use crate::hitl::{self, HitlOption, HitlPayload, ReviewDecision, StepOutcome};
use crate::llm::{structured, LlmClient, ModelSpec};
use crate::research::{
    Depth, ResearchEvent, ResearchNode, ResearchState, ResearchStatus, ReviewOutcome,
};
use crate::schemas::{ExplorerInstruction, InstructionList, ResearchReport, SearchResult, SubTopicList};
use crate::tools::WebSearch;

/// 候选子话题上限
pub const MAX_SUBTOPICS: usize = 8;
/// 每个 explorer 保留的搜索结果数
pub const EXPLORER_RESULTS: usize = 3;

/// 研究流程运行参数
#[derive(Clone, Debug, Default)]
pub struct ResearchSettings {
    /// 每个 explorer 的超时；None 表示一直等待
    pub explorer_timeout: Option<Duration>,
    /// redo 次数上限；None 表示不限
    pub max_redo: Option<u32>,
}

pub struct ResearchPipeline {
    llm: Arc<dyn LlmClient>,
    model: ModelSpec,
    search: Arc<dyn WebSearch>,
    settings: ResearchSettings,
}

impl ResearchPipeline {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: ModelSpec,
        search: Arc<dyn WebSearch>,
        settings: ResearchSettings,
    ) -> Self {
        Self {
            llm,
            model,
            search,
            settings,
        }
    }

    /// 执行单个研究节点
    pub async fn step(
        &self,
        node: ResearchNode,
        state: &mut ResearchState,
        resume: Option<Value>,
    ) -> Result<StepOutcome<ResearchEvent>, AgentError> {
        match node {
            ResearchNode::Clarify => self.clarify(state).await,
            ResearchNode::SelectTopics => Ok(select_topics(state, resume)),
            ResearchNode::Orchestrate => self.orchestrate(state).await,
            ResearchNode::Explore => Ok(self.explore(state).await),
            ResearchNode::Synthesize => self.synthesize(state).await,
            ResearchNode::Review => review(state, resume, self.settings.max_redo),
        }
    }

    async fn clarify(&self, state: &mut ResearchState) -> Result<StepOutcome<ResearchEvent>, AgentError> {
        let prompt = format!(
            "Given the research topic: '{}'\n\nSuggest 5-8 specific sub-topics or angles to investigate.",
            state.topic
        );
        let list: SubTopicList = structured(self.llm.as_ref(), &self.model, &prompt).await?;
        let mut topics: Vec<String> = list
            .topics
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        topics.truncate(MAX_SUBTOPICS);
        if topics.is_empty() {
            warn!(topic = %state.topic, "no sub-topics suggested, falling back to the topic itself");
            topics.push(state.topic.clone());
        }
        debug!(count = topics.len(), "sub-topics suggested");
        state.candidate_topics = topics;
        Ok(StepOutcome::Continue(ResearchEvent::TopicsSuggested))
    }

    async fn orchestrate(&self, state: &mut ResearchState) -> Result<StepOutcome<ResearchEvent>, AgentError> {
        let n = state.explorer_count();
        let topic_lines = state
            .clarified_topics
            .iter()
            .map(|t| format!("- {t}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "You are creating search instructions for {n} parallel web researchers.\n\n\
             Research topics to cover:\n{topic_lines}\n\n\
             Create exactly {n} search instructions. Each should have:\n\
             - A specific, well-crafted search query for Tavily web search\n\
             - A clear search focus describing what to look for\n\
             - Optional context for the researcher"
        );
        let list: InstructionList = structured(self.llm.as_ref(), &self.model, &prompt).await?;
        let got = list.instructions.len();
        let mut instructions: Vec<ExplorerInstruction> =
            list.instructions.into_iter().take(n).collect();
        if instructions.len() < n {
            warn!(expected = n, got, "too few instructions, padding from clarified topics");
            let missing = state.clarified_topics[instructions.len()..n].to_vec();
            instructions.extend(missing.into_iter().map(|t| ExplorerInstruction {
                query: t.clone(),
                search_focus: t,
                context: String::new(),
            }));
        }

        state.explorer_instructions = instructions;
        // redo 丢弃上一轮 explorer 的全部输出
        state.search_results.clear();
        state.status = Some(ResearchStatus::Orchestrated);
        info!(explorers = n, depth = state.depth.as_str(), "research orchestrated");
        Ok(StepOutcome::Continue(ResearchEvent::Orchestrated))
    }

    /// 并行 fan-out：所有 explorer 完成后才继续（join barrier）；单个失败只产生一条错误结果
    async fn explore(&self, state: &mut ResearchState) -> StepOutcome<ResearchEvent> {
        let mut tasks = JoinSet::new();
        for (i, inst) in state.explorer_instructions.iter().cloned().enumerate() {
            let search = self.search.clone();
            let limit = self.settings.explorer_timeout;
            tasks.spawn(async move { (i, run_explorer(search, inst, limit).await) });
        }

        let mut by_index: HashMap<usize, Vec<SearchResult>> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, results)) => {
                    by_index.insert(i, results);
                }
                Err(e) => warn!("explorer task panicked: {e}"),
            }
        }

        let mut merged = Vec::new();
        for (i, inst) in state.explorer_instructions.iter().enumerate() {
            match by_index.remove(&i) {
                Some(results) => merged.extend(results),
                None => merged.push(SearchResult::search_error(&inst.query, "explorer task failed")),
            }
        }
        info!(explorers = state.explorer_instructions.len(), results = merged.len(), "exploration finished");
        state.search_results.extend(merged);
        StepOutcome::Continue(ResearchEvent::Explored)
    }

    async fn synthesize(&self, state: &mut ResearchState) -> Result<StepOutcome<ResearchEvent>, AgentError> {
        let results_text: String = state
            .search_results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                format!(
                    "\n--- Result {} ---\nTitle: {}\nURL: {}\nContent: {}\n",
                    i + 1,
                    or_na(&r.title),
                    or_na(&r.url),
                    or_na(&r.content)
                )
            })
            .collect();
        let prompt = format!(
            "Synthesize the following search results into a comprehensive research report.\n\n\
             Original topic: {}\n\
             Sub-topics investigated: {}\n\n\
             Search Results:\n{}\n\n\
             Create a well-structured report with:\n\
             - A clear title\n\
             - Executive summary\n\
             - Key findings with evidence and source URLs\n\
             - List of all source URLs\n\
             - Relevant tags\n\
             - Brief methodology description",
            state.topic,
            state.clarified_topics.join(", "),
            results_text
        );
        let report: ResearchReport = structured(self.llm.as_ref(), &self.model, &prompt).await?;
        state.report = Some(report);
        state.status = Some(ResearchStatus::Synthesized);
        Ok(StepOutcome::Continue(ResearchEvent::Synthesized))
    }
}

fn or_na(s: &str) -> &str {
    if s.is_empty() {
        "N/A"
    } else {
        s
    }
}

async fn run_explorer(
    search: Arc<dyn WebSearch>,
    inst: ExplorerInstruction,
    limit: Option<Duration>,
) -> Vec<SearchResult> {
    debug!(query = %inst.query, focus = %inst.search_focus, "explorer started");
    let fut = search.search(&inst.query, EXPLORER_RESULTS);
    let outcome = match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(r) => r,
            Err(_) => Err(format!("timed out after {limit:?}")),
        },
        None => fut.await,
    };
    match outcome {
        Ok(mut results) => {
            results.truncate(EXPLORER_RESULTS);
            results
        }
        Err(e) => {
            warn!(query = %inst.query, error = %e, "explorer search failed");
            vec![SearchResult::search_error(&inst.query, e)]
        }
    }
}

fn topic_options(state: &ResearchState) -> Vec<HitlOption> {
    state
        .candidate_topics
        .iter()
        .enumerate()
        .map(|(i, t)| HitlOption::new(format!("topic_{i}"), t.clone()).selected(true))
        .collect()
}

/// 子话题勾选：无 resume 时挂起；空选择视为全选，未知 id 忽略
fn select_topics(state: &mut ResearchState, resume: Option<Value>) -> StepOutcome<ResearchEvent> {
    let options = topic_options(state);
    let Some(value) = resume else {
        return StepOutcome::Suspended(HitlPayload::checkbox(
            "Select Research Topics",
            format!(
                "The following sub-topics were identified for '{}'. Select the ones you'd like to research:",
                state.topic
            ),
            options,
        ));
    };

    let ids = hitl::selected_ids(&value);
    let mut selected: Vec<String> = options
        .iter()
        .filter(|o| ids.contains(&o.id))
        .map(|o| o.label.clone())
        .collect();
    if selected.is_empty() {
        selected = state.candidate_topics.clone();
    }
    info!(selected = selected.len(), of = options.len(), "research topics selected");
    state.clarified_topics = selected;
    state.status = Some(ResearchStatus::Clarified);
    StepOutcome::Continue(ResearchEvent::TopicsSelected)
}

/// 报告审阅：approve / edit（浅合并字段）/ redo
fn review(
    state: &mut ResearchState,
    resume: Option<Value>,
    max_redo: Option<u32>,
) -> Result<StepOutcome<ResearchEvent>, AgentError> {
    let Some(value) = resume else {
        let report = state.report.clone().unwrap_or_default();
        return Ok(StepOutcome::Suspended(HitlPayload::review(
            "Review Research Report",
            "Please review the research report below. You can approve it, edit it, or request a redo.",
            report,
            vec![
                HitlOption::new("approve", "Approve").description("Accept this report"),
                HitlOption::new("edit", "Edit").description("Modify the report"),
                HitlOption::new("redo", "Redo").description("Re-run the research"),
            ],
        )));
    };

    match ReviewDecision::from_resume(&value) {
        ReviewDecision::Redo if max_redo.is_some_and(|cap| state.redo_count >= cap) => {
            warn!(redo_count = state.redo_count, "redo limit reached, approving current report");
        }
        ReviewDecision::Redo => {
            state.redo_count += 1;
            state.status = Some(ResearchStatus::Redo);
            info!(redo_count = state.redo_count, "research redo requested");
            return Ok(StepOutcome::Continue(ResearchEvent::Reviewed(ReviewOutcome::Redo)));
        }
        ReviewDecision::Edit(edits) => {
            if let Some(report) = state.report.take() {
                state.report = Some(apply_edits(report, &edits));
            }
        }
        ReviewDecision::Approve => {}
    }
    state.status = Some(ResearchStatus::Approved);
    Ok(StepOutcome::Continue(ResearchEvent::Reviewed(ReviewOutcome::Approved)))
}

/// 浅合并：用户提供的顶层字段覆盖报告同名字段；合并结果不合 schema 时保留原报告
pub fn apply_edits(report: ResearchReport, edits: &serde_json::Map<String, Value>) -> ResearchReport {
    let mut value = match serde_json::to_value(&report) {
        Ok(v) => v,
        Err(e) => {
            warn!("failed to serialize report for edit: {e}");
            return report;
        }
    };
    if let Some(obj) = value.as_object_mut() {
        for (k, v) in edits {
            obj.insert(k.clone(), v.clone());
        }
    }
    match serde_json::from_value(value) {
        Ok(edited) => edited,
        Err(e) => {
            warn!("report edits rejected, keeping original: {e}");
            report
        }
    }
}

/// 研究入口参数解析后的初始状态
pub fn initial_state(topic: &str, depth: &str) -> ResearchState {
    ResearchState::new(topic, Depth::parse(depth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hitl::HitlType;
    use crate::llm::MockLlmClient;
    use crate::schemas::ResearchFinding;
    use crate::tools::MockWebSearch;
    use serde_json::json;

    fn sample_report() -> ResearchReport {
        ResearchReport {
            title: "Original".into(),
            summary: "Summary".into(),
            key_findings: vec![ResearchFinding {
                insight: "i1".into(),
                evidence: "e1".into(),
                sources: vec!["https://a".into()],
            }],
            sources: vec!["https://a".into()],
            tags: vec!["t".into()],
            methodology: "m".into(),
        }
    }

    fn pipeline(mock: MockLlmClient, search: MockWebSearch, settings: ResearchSettings) -> ResearchPipeline {
        ResearchPipeline::new(Arc::new(mock), ModelSpec::default(), Arc::new(search), settings)
    }

    #[tokio::test]
    async fn test_clarify_truncates_and_falls_back() {
        let mock = MockLlmClient::new();
        mock.push_structured("SubTopicList", json!({"topics": (0..10).map(|i| format!("t{i}")).collect::<Vec<_>>()}));
        mock.push_structured("SubTopicList", json!({"topics": []}));
        let p = pipeline(mock, MockWebSearch::new(), ResearchSettings::default());

        let mut st = initial_state("AI safety", "quick");
        p.step(ResearchNode::Clarify, &mut st, None).await.unwrap();
        assert_eq!(st.candidate_topics.len(), MAX_SUBTOPICS);

        let mut st = initial_state("AI safety", "quick");
        p.step(ResearchNode::Clarify, &mut st, None).await.unwrap();
        assert_eq!(st.candidate_topics, vec!["AI safety"]);
    }

    #[test]
    fn test_select_topics_suspends_then_applies() {
        let mut st = initial_state("AI safety", "quick");
        st.candidate_topics = vec!["a".into(), "b".into(), "c".into()];

        match select_topics(&mut st, None) {
            StepOutcome::Suspended(p) => {
                assert_eq!(p.hitl_type(), HitlType::Checkbox);
                assert_eq!(p.options().len(), 3);
                assert!(p.options().iter().all(|o| o.selected));
                assert_eq!(p.options()[2].id, "topic_2");
            }
            other => panic!("expected suspension, got {other:?}"),
        }

        select_topics(&mut st, Some(json!(["topic_2", "topic_0", "bogus"])));
        assert_eq!(st.clarified_topics, vec!["a", "c"]);

        select_topics(&mut st, Some(json!([])));
        assert_eq!(st.clarified_topics, vec!["a", "b", "c"]);

        select_topics(&mut st, Some(json!({"ids": ["topic_1"]})));
        assert_eq!(st.clarified_topics.len(), 3);
    }

    #[tokio::test]
    async fn test_orchestrate_caps_and_pads() {
        let mock = MockLlmClient::new();
        let many: Vec<_> = (0..6)
            .map(|i| json!({"query": format!("q{i}"), "search_focus": "f"}))
            .collect();
        mock.push_structured("InstructionList", json!({"instructions": many}));
        mock.push_structured("InstructionList", json!({"instructions": [{"query": "only", "search_focus": "f"}]}));
        let p = pipeline(mock, MockWebSearch::new(), ResearchSettings::default());

        let mut st = initial_state("x", "quick");
        st.clarified_topics = (0..5).map(|i| format!("topic {i}")).collect();
        st.search_results = vec![SearchResult::default()];
        p.step(ResearchNode::Orchestrate, &mut st, None).await.unwrap();
        assert_eq!(st.explorer_instructions.len(), 3);
        assert!(st.search_results.is_empty());

        p.step(ResearchNode::Orchestrate, &mut st, None).await.unwrap();
        assert_eq!(st.explorer_instructions.len(), 3);
        assert_eq!(st.explorer_instructions[0].query, "only");
        assert_eq!(st.explorer_instructions[1].query, "topic 1");
        assert_eq!(st.explorer_instructions[2].search_focus, "topic 2");
    }

    #[tokio::test]
    async fn test_explore_collects_all_and_degrades_failures() {
        let search = MockWebSearch::new().fail_on("bad");
        let p = pipeline(MockLlmClient::new(), search, ResearchSettings::default());
        let mut st = initial_state("x", "quick");
        st.explorer_instructions = vec![
            ExplorerInstruction { query: "good one".into(), search_focus: "f".into(), context: String::new() },
            ExplorerInstruction { query: "bad one".into(), search_focus: "f".into(), context: String::new() },
            ExplorerInstruction { query: "good two".into(), search_focus: "f".into(), context: String::new() },
        ];
        p.step(ResearchNode::Explore, &mut st, None).await.unwrap();
        assert_eq!(st.search_results.len(), EXPLORER_RESULTS * 2 + 1);
        let errors: Vec<_> = st
            .search_results
            .iter()
            .filter(|r| r.content.starts_with("Search error:"))
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].title, "bad one");
    }

    #[tokio::test]
    async fn test_explorer_timeout_becomes_error_result() {
        let search = MockWebSearch::new().with_delay(Duration::from_secs(5));
        let settings = ResearchSettings {
            explorer_timeout: Some(Duration::from_millis(50)),
            max_redo: None,
        };
        let p = pipeline(MockLlmClient::new(), search, settings);
        let mut st = initial_state("x", "quick");
        st.explorer_instructions = vec![ExplorerInstruction {
            query: "slow".into(),
            search_focus: "f".into(),
            context: String::new(),
        }];
        p.step(ResearchNode::Explore, &mut st, None).await.unwrap();
        assert_eq!(st.search_results.len(), 1);
        assert!(st.search_results[0].content.contains("timed out"));
    }

    #[test]
    fn test_edit_changes_only_given_fields() {
        let original = sample_report();
        let edits = json!({"title": "X"});
        let edited = apply_edits(original.clone(), edits.as_object().unwrap());
        assert_eq!(edited.title, "X");
        assert_eq!(ResearchReport { title: "Original".into(), ..edited }, original);
    }

    #[test]
    fn test_bad_edit_keeps_original() {
        let original = sample_report();
        let edits = json!({"key_findings": "not a list"});
        assert_eq!(apply_edits(original.clone(), edits.as_object().unwrap()), original);
    }

    #[test]
    fn test_review_branches() {
        let mut st = initial_state("x", "quick");
        st.report = Some(sample_report());

        match review(&mut st, None, None).unwrap() {
            StepOutcome::Suspended(p) => {
                assert_eq!(p.hitl_type(), HitlType::Review);
                assert!(p.validate().is_ok());
                let ids: Vec<_> = p.options().iter().map(|o| o.id.as_str()).collect();
                assert_eq!(ids, vec!["approve", "edit", "redo"]);
            }
            other => panic!("expected suspension, got {other:?}"),
        }

        let out = review(&mut st, Some(json!({"action": "redo"})), None).unwrap();
        assert_eq!(out, StepOutcome::Continue(ResearchEvent::Reviewed(ReviewOutcome::Redo)));
        assert_eq!(st.status, Some(ResearchStatus::Redo));

        let out = review(&mut st, Some(json!("whatever")), None).unwrap();
        assert_eq!(out, StepOutcome::Continue(ResearchEvent::Reviewed(ReviewOutcome::Approved)));
        assert_eq!(st.status, Some(ResearchStatus::Approved));
    }

    #[test]
    fn test_redo_cap_approves() {
        let mut st = initial_state("x", "quick");
        st.report = Some(sample_report());
        st.redo_count = 2;
        let out = review(&mut st, Some(json!({"action": "redo"})), Some(2)).unwrap();
        assert_eq!(out, StepOutcome::Continue(ResearchEvent::Reviewed(ReviewOutcome::Approved)));
    }
}
