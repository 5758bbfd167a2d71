//! 模型表：运行级模型键 → 具体模型名 + 可选推理强度
//!
//! 一次运行内模型键不变；未知键回落到默认键。

use serde::{Deserialize, Serialize};

/// 默认模型键
pub const DEFAULT_MODEL_KEY: &str = "gpt-4.1-mini";

/// (键, 模型名, 推理强度)
const MODEL_TABLE: &[(&str, &str, Option<&str>)] = &[
    ("gpt-4.1-mini", "gpt-4.1-mini", None),
    ("gpt-5-nano-high", "gpt-5-nano", Some("high")),
    ("gpt-5-nano-medium", "gpt-5-nano", Some("medium")),
    ("gpt-5-nano-low", "gpt-5-nano", Some("low")),
    ("gpt-5-nano-minimal", "gpt-5-nano", Some("minimal")),
];

/// 解析后的模型规格
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub key: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

impl ModelSpec {
    /// 按键查表；未知键使用默认键
    pub fn resolve(key: &str) -> Self {
        let (key, model, effort) = MODEL_TABLE
            .iter()
            .find(|(k, _, _)| *k == key)
            .or_else(|| MODEL_TABLE.iter().find(|(k, _, _)| *k == DEFAULT_MODEL_KEY))
            .copied()
            .unwrap_or((DEFAULT_MODEL_KEY, DEFAULT_MODEL_KEY, None));
        Self {
            key: key.to_string(),
            model: model.to_string(),
            reasoning_effort: effort.map(String::from),
        }
    }

    /// 直接指定模型名（结构化输出等固定模型的场景）
    pub fn plain(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            key: model.clone(),
            model,
            reasoning_effort: None,
        }
    }

    pub fn known_keys() -> impl Iterator<Item = &'static str> {
        MODEL_TABLE.iter().map(|(k, _, _)| *k)
    }
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self::resolve(DEFAULT_MODEL_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_reasoning_variant() {
        let spec = ModelSpec::resolve("gpt-5-nano-low");
        assert_eq!(spec.model, "gpt-5-nano");
        assert_eq!(spec.reasoning_effort.as_deref(), Some("low"));
    }

    #[test]
    fn test_unknown_key_falls_back() {
        let spec = ModelSpec::resolve("gpt-9000");
        assert_eq!(spec.key, DEFAULT_MODEL_KEY);
        assert_eq!(spec.model, "gpt-4.1-mini");
        assert!(spec.reasoning_effort.is_none());
    }

    #[test]
    fn test_known_keys() {
        assert_eq!(ModelSpec::known_keys().count(), 5);
    }
}
