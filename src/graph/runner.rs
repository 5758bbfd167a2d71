//! 驱动循环：invoke / resume
//!
//! 每一步在状态草稿上执行节点；成功后一次 put 提交（状态、下一节点、挂起中断）。
//! 失败的一步不写检查点，线程停在上一次成功提交的位置。
//! 挂起时检查点的 next 仍指向挂起节点，resume 带着人工输入重新进入该节点。
//! 失败或取消后停在中途的线程用 continue_run 从检查点的 next 接着跑，或用 abandon_run 收尾。

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::core::AgentError;
use crate::graph::events::{send_event, FinishKind, NodeStatus, RunEvent, RunHooks};
use crate::graph::node::{transition, Node};
use crate::graph::nodes::{GraphDeps, StepCtx, ABANDONED_RESULT};
use crate::graph::state::ConversationState;
use crate::hitl::{Interrupt, StepOutcome};
use crate::llm::DEFAULT_MODEL_KEY;
use crate::memory::{Checkpoint, CheckpointStore, Message, Role};

/// 单次 invoke / resume 的最大步数
pub const DEFAULT_MAX_STEPS: usize = 50;

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Completed(ConversationState),
    Suspended(Interrupt),
}

impl RunOutcome {
    pub fn interrupt(&self) -> Option<&Interrupt> {
        match self {
            RunOutcome::Suspended(i) => Some(i),
            RunOutcome::Completed(_) => None,
        }
    }

    pub fn state(&self) -> Option<&ConversationState> {
        match self {
            RunOutcome::Completed(s) => Some(s),
            RunOutcome::Suspended(_) => None,
        }
    }

    /// 完成时最后一条 assistant 回复
    pub fn final_reply(&self) -> Option<&str> {
        self.state().and_then(|s| s.final_reply())
    }
}

pub struct GraphRunner {
    deps: GraphDeps,
    checkpoints: Arc<dyn CheckpointStore>,
    max_steps: usize,
    default_model: String,
}

impl GraphRunner {
    pub fn new(deps: GraphDeps, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            deps,
            checkpoints,
            max_steps: DEFAULT_MAX_STEPS,
            default_model: DEFAULT_MODEL_KEY.to_string(),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// 新线程在 invoke 未指定模型时使用的模型 key
    pub fn with_default_model(mut self, key: impl Into<String>) -> Self {
        self.default_model = key.into();
        self
    }

    pub fn deps(&self) -> &GraphDeps {
        &self.deps
    }

    /// 线程当前的对话状态
    pub async fn state(&self, thread_id: &str) -> Result<Option<ConversationState>, AgentError> {
        Ok(self.checkpoints.get(thread_id).await?.map(|cp| cp.state))
    }

    pub async fn pending_interrupt(&self, thread_id: &str) -> Result<Option<Interrupt>, AgentError> {
        Ok(self.checkpoints.get(thread_id).await?.and_then(|cp| cp.interrupt))
    }

    /// 丢弃线程检查点（放弃挂起中的运行或清理线程）
    pub async fn discard(&self, thread_id: &str) -> Result<(), AgentError> {
        info!(thread_id = %thread_id, "discarding checkpoint");
        self.checkpoints.delete(thread_id).await
    }

    /// 以一条新的用户消息开始一次运行；model_key 为 None 时沿用线程上次的模型，新线程用默认模型
    pub async fn invoke(
        &self,
        thread_id: &str,
        input: &str,
        model_key: Option<&str>,
        hooks: RunHooks<'_>,
    ) -> Result<RunOutcome, AgentError> {
        let previous = self.checkpoints.get(thread_id).await?;
        if let Some(cp) = &previous {
            if cp.is_suspended() {
                return Err(AgentError::RunSuspended(thread_id.to_string()));
            }
            if cp.is_unfinished() {
                return Err(AgentError::RunUnfinished(thread_id.to_string()));
            }
        }
        let (mut state, step) = match previous {
            Some(cp) => (cp.state, cp.step),
            None => (ConversationState::new(self.default_model.as_str()), 0),
        };
        let persisted = state.messages().len();
        if let Some(key) = model_key {
            state.model = key.to_string();
        }
        state.push_user(input);

        let title = state
            .messages()
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone());
        if let Err(e) = self.deps.threads.ensure_thread(thread_id, title.as_deref()).await {
            warn!(thread_id = %thread_id, "failed to record thread: {e}");
        }

        info!(thread_id = %thread_id, model = %state.model, "run started");
        send_event(
            &hooks.events,
            RunEvent::RunStarted {
                thread_id: thread_id.to_string(),
                resumed: false,
            },
        );
        self.drive(thread_id, state, Node::Retrieve, step, persisted, None, hooks)
            .await
    }

    /// 从检查点记录的 next 节点接着执行一次失败或被取消的运行
    pub async fn continue_run(
        &self,
        thread_id: &str,
        hooks: RunHooks<'_>,
    ) -> Result<RunOutcome, AgentError> {
        let cp = self
            .checkpoints
            .get(thread_id)
            .await?
            .ok_or_else(|| AgentError::NoUnfinishedRun(thread_id.to_string()))?;
        if cp.is_suspended() {
            return Err(AgentError::RunSuspended(thread_id.to_string()));
        }
        if !cp.is_unfinished() {
            return Err(AgentError::NoUnfinishedRun(thread_id.to_string()));
        }

        info!(thread_id = %thread_id, node = %cp.next.name(), step = cp.step, "continuing run");
        send_event(
            &hooks.events,
            RunEvent::RunStarted {
                thread_id: thread_id.to_string(),
                resumed: true,
            },
        );
        let persisted = cp.state.messages().len();
        self.drive(thread_id, cp.state, cp.next, cp.step, persisted, None, hooks)
            .await
    }

    /// 放弃挂起中或停在中途的运行，保留对话历史：
    /// 未回答的工具调用补上固定结果，清空研究与待保存状态，检查点指向 End。返回补上的结果数。
    pub async fn abandon_run(&self, thread_id: &str) -> Result<usize, AgentError> {
        let cp = self
            .checkpoints
            .get(thread_id)
            .await?
            .ok_or_else(|| AgentError::NoUnfinishedRun(thread_id.to_string()))?;
        if !cp.is_suspended() && !cp.is_unfinished() {
            return Err(AgentError::NoUnfinishedRun(thread_id.to_string()));
        }

        let mut state = cp.state;
        let persisted = state.messages().len();
        let closed = state.answer_unanswered(None, ABANDONED_RESULT)?;
        state.research = None;
        state.pending_save = None;
        state.topic = None;
        state.depth = None;
        self.checkpoints
            .put(&Checkpoint::new(thread_id, cp.step, state.clone(), Node::End, None))
            .await?;
        self.mirror_messages(thread_id, &state, persisted).await;
        warn!(thread_id = %thread_id, node = %cp.next.name(), closed, "run abandoned");
        Ok(closed)
    }

    /// 用人工输入恢复当前挂起的中断
    pub async fn resume(
        &self,
        thread_id: &str,
        value: Value,
        hooks: RunHooks<'_>,
    ) -> Result<RunOutcome, AgentError> {
        self.resume_checked(thread_id, None, value, hooks).await
    }

    /// 同 resume，但只接受指定 id 的中断；重试的 resume 落到后续中断上时返回 StaleInterrupt
    pub async fn resume_interrupt(
        &self,
        thread_id: &str,
        interrupt_id: &str,
        value: Value,
        hooks: RunHooks<'_>,
    ) -> Result<RunOutcome, AgentError> {
        self.resume_checked(thread_id, Some(interrupt_id), value, hooks)
            .await
    }

    async fn resume_checked(
        &self,
        thread_id: &str,
        interrupt_id: Option<&str>,
        value: Value,
        hooks: RunHooks<'_>,
    ) -> Result<RunOutcome, AgentError> {
        let cp = self
            .checkpoints
            .get(thread_id)
            .await?
            .ok_or_else(|| AgentError::NoPendingInterrupt(thread_id.to_string()))?;
        let Some(pending) = &cp.interrupt else {
            return Err(AgentError::NoPendingInterrupt(thread_id.to_string()));
        };
        if let Some(expected) = interrupt_id {
            if pending.id != expected {
                return Err(AgentError::StaleInterrupt {
                    expected: pending.id.clone(),
                    got: expected.to_string(),
                });
            }
        }

        info!(thread_id = %thread_id, node = %cp.next.name(), interrupt = %pending.id, "resuming");
        send_event(
            &hooks.events,
            RunEvent::RunStarted {
                thread_id: thread_id.to_string(),
                resumed: true,
            },
        );
        let persisted = cp.state.messages().len();
        self.drive(thread_id, cp.state, cp.next, cp.step, persisted, Some(value), hooks)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        thread_id: &str,
        state: ConversationState,
        node: Node,
        step: u64,
        persisted: usize,
        resume: Option<Value>,
        hooks: RunHooks<'_>,
    ) -> Result<RunOutcome, AgentError> {
        let result = self
            .run_loop(thread_id, state, node, step, persisted, resume, hooks)
            .await;
        match &result {
            Ok(outcome) => {
                let kind = match outcome {
                    RunOutcome::Completed(_) => FinishKind::Completed,
                    RunOutcome::Suspended(_) => FinishKind::Suspended,
                };
                send_event(
                    &hooks.events,
                    RunEvent::RunFinished {
                        thread_id: thread_id.to_string(),
                        outcome: kind,
                    },
                );
            }
            Err(e) => {
                warn!(thread_id = %thread_id, "run failed: {e}");
                send_event(&hooks.events, RunEvent::Error { text: e.to_string() });
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        &self,
        thread_id: &str,
        mut state: ConversationState,
        mut node: Node,
        mut step: u64,
        mut persisted: usize,
        mut resume: Option<Value>,
        hooks: RunHooks<'_>,
    ) -> Result<RunOutcome, AgentError> {
        let ctx = StepCtx {
            thread_id,
            events: hooks.events,
        };
        let mut taken = 0usize;

        while node != Node::End {
            if hooks.is_cancelled() {
                info!(thread_id = %thread_id, node = %node.name(), "run cancelled");
                return Err(AgentError::Cancelled);
            }
            if taken >= self.max_steps {
                return Err(AgentError::StepLimitExceeded(self.max_steps));
            }
            taken += 1;

            send_event(
                &hooks.events,
                RunEvent::NodeStatus {
                    node: node.name().to_string(),
                    status: NodeStatus::Active,
                    subgraph: node.is_subgraph(),
                },
            );
            debug!(thread_id = %thread_id, node = %node.name(), step, "step");

            let mut draft = state.clone();
            match self.deps.step(node, &mut draft, resume.take(), &ctx).await? {
                StepOutcome::Continue(event) => {
                    let next = transition(node, event)?;
                    step += 1;
                    self.checkpoints
                        .put(&Checkpoint::new(thread_id, step, draft.clone(), next, None))
                        .await?;
                    persisted = self.mirror_messages(thread_id, &draft, persisted).await;
                    emit_completed(&hooks, &draft.messages()[state.messages().len()..]);
                    send_event(
                        &hooks.events,
                        RunEvent::NodeStatus {
                            node: node.name().to_string(),
                            status: NodeStatus::Completed,
                            subgraph: node.is_subgraph(),
                        },
                    );
                    state = draft;
                    node = next;
                }
                StepOutcome::Suspended(payload) => {
                    let interrupt = Interrupt::new(node.name(), payload);
                    self.checkpoints
                        .put(&Checkpoint::new(
                            thread_id,
                            step,
                            draft.clone(),
                            node,
                            Some(interrupt.clone()),
                        ))
                        .await?;
                    self.mirror_messages(thread_id, &draft, persisted).await;
                    emit_completed(&hooks, &draft.messages()[state.messages().len()..]);
                    info!(
                        thread_id = %thread_id,
                        node = %node.name(),
                        interrupt = %interrupt.id,
                        "run suspended"
                    );
                    send_event(
                        &hooks.events,
                        RunEvent::Interrupt {
                            interrupt: interrupt.clone(),
                        },
                    );
                    return Ok(RunOutcome::Suspended(interrupt));
                }
            }
        }

        info!(thread_id = %thread_id, step, "run completed");
        Ok(RunOutcome::Completed(state))
    }

    /// 把检查点中新增的消息同步到线程存储；检查点已提交，同步失败只记日志
    async fn mirror_messages(
        &self,
        thread_id: &str,
        state: &ConversationState,
        persisted: usize,
    ) -> usize {
        let all = state.messages();
        if all.len() <= persisted {
            return persisted;
        }
        match self
            .deps
            .threads
            .append_messages(thread_id, &all[persisted..])
            .await
        {
            Ok(()) => all.len(),
            Err(e) => {
                warn!(thread_id = %thread_id, "failed to persist messages: {e}");
                persisted
            }
        }
    }
}

/// 本步新增的每条消息发一个 MessageComplete
fn emit_completed(hooks: &RunHooks<'_>, messages: &[Message]) {
    for message in messages {
        send_event(
            &hooks.events,
            RunEvent::MessageComplete {
                message: message.clone(),
            },
        );
    }
}
