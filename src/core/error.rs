//! 运行错误类型
//!
//! 只有致命错误以 `Err(AgentError)` 离开驱动循环；工具失败在执行器边界转成文本，
//! 中断（HITL）是正常返回 `RunOutcome::Suspended`，不是错误。

use thiserror::Error;

/// 一次运行中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(String),

    /// 结构化输出无法解析为目标 schema
    #[error("Structured output error ({schema}): {reason}")]
    StructuredOutput { schema: String, reason: String },

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 检查点或持久化后端失败
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No pending interrupt for thread {0}")]
    NoPendingInterrupt(String),

    /// resume 指向的中断已不是当前挂起的那一个（重试的 resume 落到了后续中断上）
    #[error("Interrupt {got} is not pending (pending: {expected})")]
    StaleInterrupt { expected: String, got: String },

    /// 线程正挂起等待 resume，不能开启新的运行
    #[error("Thread {0} is suspended awaiting resume")]
    RunSuspended(String),

    /// 线程停在一次失败或被取消的运行中途，需要 continue_run 或 abandon_run
    #[error("Thread {0} has an unfinished run; continue or abandon it")]
    RunUnfinished(String),

    #[error("Thread {0} has no run to continue or abandon")]
    NoUnfinishedRun(String),

    #[error("Invalid transition: {event} at node {node}")]
    InvalidTransition { node: String, event: String },

    #[error("Step limit exceeded ({0})")]
    StepLimitExceeded(usize),

    /// 工具结果消息的 tool_call_id 找不到对应的 assistant 工具调用
    #[error("Tool result has no matching tool call: {0}")]
    OrphanToolResult(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Storage(format!("serde: {e}"))
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Storage(format!("sqlite: {e}"))
    }
}
