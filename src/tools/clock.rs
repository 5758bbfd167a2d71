//! 当前时间工具

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// get_current_time 工具：本地时间
pub struct ClockTool;

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time."
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        Ok(chrono::Local::now().format(TIME_FORMAT).to_string())
    }
}
