//! create_plan 工具：让模型按 TaskPlan schema 输出结构化任务计划

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::llm::{structured, LlmClient, ModelSpec};
use crate::schemas::TaskPlan;
use crate::tools::{parameters_for, Tool};

#[derive(Debug, Deserialize, JsonSchema)]
struct CreatePlanArgs {
    /// The high-level goal or objective to plan for.
    goal: String,
}

pub struct CreatePlanTool {
    llm: Arc<dyn LlmClient>,
    model: ModelSpec,
}

impl CreatePlanTool {
    pub fn new(llm: Arc<dyn LlmClient>, model: ModelSpec) -> Self {
        Self { llm, model }
    }
}

fn plan_prompt(goal: &str) -> String {
    format!(
        "Create a detailed, actionable task plan for the following goal:\n\n{goal}\n\n\
         Break it down into concrete steps with priorities."
    )
}

#[async_trait]
impl Tool for CreatePlanTool {
    fn name(&self) -> &str {
        "create_plan"
    }

    fn description(&self) -> &str {
        "Create a structured task plan for achieving a goal. Returns a JSON plan with ordered tasks."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<CreatePlanArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: CreatePlanArgs = serde_json::from_value(args)
            .map_err(|e| format!("Error: invalid arguments for create_plan: {e}"))?;
        let plan: TaskPlan = structured(self.llm.as_ref(), &self.model, &plan_prompt(&args.goal))
            .await
            .map_err(|e| format!("Error creating plan: {e}"))?;
        serde_json::to_string_pretty(&plan).map_err(|e| format!("Error creating plan: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use serde_json::json;

    #[tokio::test]
    async fn test_plan_round_trips_through_schema() {
        let mock = MockLlmClient::new();
        mock.push_structured(
            "TaskPlan",
            json!({
                "goal": "Ship v1",
                "tasks": [
                    {"title": "Write tests", "description": "cover routing", "priority": "high"},
                    {"title": "Docs", "description": "README"}
                ],
                "summary": "two steps"
            }),
        );
        let tool = CreatePlanTool::new(Arc::new(mock), ModelSpec::default());
        let out = tool.execute(json!({"goal": "Ship v1"})).await.unwrap();
        let plan: TaskPlan = serde_json::from_str(&out).unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[1].priority, crate::schemas::Priority::Medium);
    }

    #[tokio::test]
    async fn test_invalid_plan_is_error_text() {
        let mock = MockLlmClient::new();
        mock.push_structured("TaskPlan", json!({"goal": "x"}));
        let tool = CreatePlanTool::new(Arc::new(mock), ModelSpec::default());
        let err = tool.execute(json!({"goal": "x"})).await.unwrap_err();
        assert!(err.starts_with("Error creating plan"));
    }
}
