//! 人机协同（HITL）中断载荷与 resume 值解析
//!
//! 载荷只能通过构造函数创建：checkbox / select 必带 options，review / confirm 必带 report。
//! resume 值保持为 JSON，由各挂起点按自己期望的形状解析（解析宽松，只取走分支所需的部分）。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schemas::ResearchReport;

/// 中断类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlType {
    Checkbox,
    YesNo,
    Select,
    Text,
    Review,
    Confirm,
}

/// 可选项
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HitlOption {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub selected: bool,
}

impl HitlOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: String::new(),
            selected: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn selected(mut self, selected: bool) -> Self {
        self.selected = selected;
        self
    }
}

/// 中断载荷：描述需要什么人工输入
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HitlPayload {
    hitl_type: HitlType,
    title: String,
    message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    options: Vec<HitlOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    report: Option<ResearchReport>,
}

impl HitlPayload {
    fn base(hitl_type: HitlType, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            hitl_type,
            title: title.into(),
            message: message.into(),
            options: Vec::new(),
            report: None,
        }
    }

    pub fn checkbox(
        title: impl Into<String>,
        message: impl Into<String>,
        options: Vec<HitlOption>,
    ) -> Self {
        Self {
            options,
            ..Self::base(HitlType::Checkbox, title, message)
        }
    }

    pub fn select(
        title: impl Into<String>,
        message: impl Into<String>,
        options: Vec<HitlOption>,
    ) -> Self {
        Self {
            options,
            ..Self::base(HitlType::Select, title, message)
        }
    }

    pub fn yes_no(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::base(HitlType::YesNo, title, message)
    }

    pub fn text(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::base(HitlType::Text, title, message)
    }

    pub fn review(
        title: impl Into<String>,
        message: impl Into<String>,
        report: ResearchReport,
        options: Vec<HitlOption>,
    ) -> Self {
        Self {
            options,
            report: Some(report),
            ..Self::base(HitlType::Review, title, message)
        }
    }

    pub fn confirm(
        title: impl Into<String>,
        message: impl Into<String>,
        report: ResearchReport,
        options: Vec<HitlOption>,
    ) -> Self {
        Self {
            options,
            report: Some(report),
            ..Self::base(HitlType::Confirm, title, message)
        }
    }

    pub fn hitl_type(&self) -> HitlType {
        self.hitl_type
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn options(&self) -> &[HitlOption] {
        &self.options
    }

    pub fn report(&self) -> Option<&ResearchReport> {
        self.report.as_ref()
    }

    /// 消费方校验：反序列化得到的载荷（如来自前端或旧检查点）需要再检查一次
    pub fn validate(&self) -> Result<(), String> {
        match self.hitl_type {
            HitlType::Checkbox | HitlType::Select if self.options.is_empty() => {
                Err(format!("{:?} payload requires options", self.hitl_type))
            }
            HitlType::Review | HitlType::Confirm if self.report.is_none() => {
                Err(format!("{:?} payload requires a report", self.hitl_type))
            }
            _ => Ok(()),
        }
    }
}

/// 挂起中的中断：id 唯一标识这一次挂起，用于拒绝过期的 resume
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interrupt {
    pub id: String,
    /// 挂起所在节点名
    pub node: String,
    pub payload: HitlPayload,
    pub created_at: i64,
}

impl Interrupt {
    pub fn new(node: impl Into<String>, payload: HitlPayload) -> Self {
        Self {
            id: format!("intr_{}", uuid::Uuid::new_v4().simple()),
            node: node.into(),
            payload,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 单步结果：继续（携带交给转移函数的事件），或在当前节点挂起等待人工输入
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutcome<E> {
    Continue(E),
    Suspended(HitlPayload),
}

/// checkbox 的 resume：选中的 option id 列表；非列表视为空
pub fn selected_ids(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        _ => Vec::new(),
    }
}

/// review 的 resume：`{action, edits?}`
#[derive(Clone, Debug, PartialEq)]
pub enum ReviewDecision {
    Approve,
    Edit(serde_json::Map<String, Value>),
    Redo,
}

impl ReviewDecision {
    /// 非对象或未知 action 一律按 approve 处理；edit 但没有 edits 也是 approve
    pub fn from_resume(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return ReviewDecision::Approve;
        };
        match obj.get("action").and_then(Value::as_str).unwrap_or("approve") {
            "redo" => ReviewDecision::Redo,
            "edit" => match obj.get("edits").and_then(Value::as_object) {
                Some(edits) if !edits.is_empty() => ReviewDecision::Edit(edits.clone()),
                _ => ReviewDecision::Approve,
            },
            _ => ReviewDecision::Approve,
        }
    }
}

/// confirm 的 resume：`{action}` 或裸字符串；缺省为 cancel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfirmAction {
    Save,
    Cancel,
}

impl ConfirmAction {
    pub fn from_resume(value: &Value) -> Self {
        let action = match value {
            Value::Object(obj) => obj.get("action").and_then(Value::as_str).unwrap_or("cancel"),
            Value::String(s) => s.as_str(),
            _ => "cancel",
        };
        if action == "save" {
            ConfirmAction::Save
        } else {
            ConfirmAction::Cancel
        }
    }
}
