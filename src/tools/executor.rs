//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，execute(tool_name, args) 在超时内调用 registry.execute，
//! 超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed）；每次调用输出结构化审计日志（JSON）。
//! execute_to_text 在执行器边界把错误转成工具结果文本，运行不会因工具失败而中止。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::llm::ToolSpec;
use crate::tools::{SentinelRoute, ToolRegistry};

/// 工具执行器：对每次调用施加超时，并将结果映射为 AgentError
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 执行指定工具；超时返回 ToolTimeout，工具返回 Err 则转为 ToolExecutionFailed；输出 JSON 审计日志
    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<String, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.execute(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
        }
    }

    /// 执行并总是返回文本：工具失败文本原样返回，超时等转为 "Error: ..."
    pub async fn execute_to_text(&self, tool_name: &str, args: serde_json::Value) -> String {
        match self.execute(tool_name, args).await {
            Ok(content) => content,
            Err(AgentError::ToolExecutionFailed(text)) => text,
            Err(e) => format!("Error: {e}"),
        }
    }

    pub fn sentinel(&self, name: &str) -> Option<SentinelRoute> {
        self.registry.sentinel(name)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("Error: boom".into())
        }
    }

    #[tokio::test]
    async fn test_timeout_becomes_text() {
        let mut r = ToolRegistry::new();
        r.register(Slow);
        let exec = ToolExecutor::new(r, 1);
        assert!(matches!(
            exec.execute("slow", json!({})).await,
            Err(AgentError::ToolTimeout(_))
        ));
        let text = exec.execute_to_text("slow", json!({})).await;
        assert!(text.starts_with("Error: Tool timeout"));
    }

    #[tokio::test]
    async fn test_failure_text_passes_through() {
        let mut r = ToolRegistry::new();
        r.register(Failing);
        let exec = ToolExecutor::new(r, 5);
        assert_eq!(exec.execute_to_text("failing", json!({})).await, "Error: boom");
        assert_eq!(
            exec.execute_to_text("missing", json!({})).await,
            "Error: Unknown tool: missing"
        );
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = json!({"text": "x".repeat(500)});
        let p = args_preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 203);
    }
}
