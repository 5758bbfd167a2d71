//! 工具注册表
//!
//! 所有可执行工具实现 Tool trait（name / description / parameters_schema / execute）。
//! 注册表在构建时就把每个名字归类为 Real（可执行）或 Sentinel（仅作路由信号，本体从不执行），
//! 路由时按分类查表，不再逐轮比较字符串。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::ToolSpec;
use crate::tools::SentinelRoute;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema（供 LLM 生成正确的参数格式）
    /// 默认返回空对象，表示无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具；Err 中的文本会原样作为工具结果交还给模型
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具身份：可执行工具，或路由哨兵
#[derive(Clone)]
pub enum ToolKind {
    Real(Arc<dyn Tool>),
    Sentinel(SentinelRoute),
}

impl std::fmt::Debug for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolKind::Real(tool) => write!(f, "Real({})", tool.name()),
            ToolKind::Sentinel(route) => write!(f, "Sentinel({route:?})"),
        }
    }
}

struct Entry {
    spec: ToolSpec,
    kind: ToolKind,
}

/// 工具注册表：保持注册顺序（即暴露给模型的顺序），按名索引
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, spec: ToolSpec, kind: ToolKind) {
        match self.index.get(&spec.name) {
            Some(&i) => {
                tracing::warn!(tool = %spec.name, "tool re-registered, replacing previous entry");
                self.entries[i] = Entry { spec, kind };
            }
            None => {
                self.index.insert(spec.name.clone(), self.entries.len());
                self.entries.push(Entry { spec, kind });
            }
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let spec = ToolSpec {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        };
        self.insert(spec, ToolKind::Real(tool));
    }

    /// 注册哨兵：只有名称与 schema 暴露给模型，没有可执行体
    pub fn register_sentinel(
        &mut self,
        name: &str,
        description: &str,
        parameters: Value,
        route: SentinelRoute,
    ) {
        let spec = ToolSpec {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        };
        self.insert(spec, ToolKind::Sentinel(route));
    }

    pub fn kind(&self, name: &str) -> Option<&ToolKind> {
        self.index.get(name).map(|&i| &self.entries[i].kind)
    }

    /// 名称对应的哨兵路由；真实工具或未知名称返回 None
    pub fn sentinel(&self, name: &str) -> Option<SentinelRoute> {
        match self.kind(name) {
            Some(ToolKind::Sentinel(route)) => Some(*route),
            _ => None,
        }
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<String, String> {
        match self.kind(name) {
            Some(ToolKind::Real(tool)) => tool.execute(args).await,
            Some(ToolKind::Sentinel(_)) => {
                Err(format!("Error: {name} is a routing signal and cannot be executed."))
            }
            None => Err(format!("Error: Unknown tool: {name}")),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.spec.name.clone()).collect()
    }

    /// 暴露给模型的全部工具（真实 + 哨兵），按注册顺序
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.entries.iter().map(|e| e.spec.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase text"
        }
        async fn execute(&self, args: Value) -> Result<String, String> {
            Ok(args["text"].as_str().unwrap_or_default().to_uppercase())
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(Upper);
        r.register_sentinel("deep_research", "research", json!({}), SentinelRoute::DeepResearch);
        r
    }

    #[test]
    fn test_classification_resolved_at_registration() {
        let r = registry();
        assert!(matches!(r.kind("upper"), Some(ToolKind::Real(_))));
        assert_eq!(r.sentinel("deep_research"), Some(SentinelRoute::DeepResearch));
        assert_eq!(r.sentinel("upper"), None);
        assert!(r.kind("nope").is_none());
        assert_eq!(r.tool_names(), vec!["upper", "deep_research"]);
    }

    #[tokio::test]
    async fn test_sentinel_body_never_runs() {
        let r = registry();
        assert_eq!(r.execute("upper", json!({"text": "ab"})).await.unwrap(), "AB");
        assert!(r.execute("deep_research", json!({})).await.is_err());
        let err = r.execute("nope", json!({})).await.unwrap_err();
        assert!(err.contains("Unknown tool"));
    }

    #[test]
    fn test_reregister_replaces() {
        let mut r = registry();
        r.register_sentinel("upper", "now a sentinel", json!({}), SentinelRoute::SaveReport);
        assert_eq!(r.len(), 2);
        assert_eq!(r.sentinel("upper"), Some(SentinelRoute::SaveReport));
    }
}
